//! Supervision of "deadly" background tasks.
//!
//! Stream controllers, adapter background tasks and state pollers are meant to
//! live as long as the process.  If one of them returns, errors or panics, the
//! daemon is in an unknown state, so the supervisor invokes a fatal handler
//! that by default sends `SIGTERM` to our own process.  `main` treats that
//! signal like an operator shutdown, so the normal cleanup path still runs.
//!
//! During shutdown [`TaskSupervisor::stop_all`] aborts every task first; the
//! resulting cancellations are expected and never fatal.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Called with the task name when a deadly task dies.
pub type FatalHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Spawns and tracks deadly tasks.
pub struct TaskSupervisor {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    stopping: Arc<AtomicBool>,
    on_fatal: FatalHandler,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    /// A supervisor whose fatal handler terminates the process.
    pub fn new() -> Self {
        Self::with_fatal_handler(Arc::new(|_name: &str| terminate_self()))
    }

    pub fn with_fatal_handler(on_fatal: FatalHandler) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            on_fatal,
        }
    }

    /// Spawns `task`; any exit other than cancellation by
    /// [`stop_all`](Self::stop_all) is fatal.
    pub fn spawn_deadly<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let stopping = Arc::clone(&self.stopping);
        let on_fatal = Arc::clone(&self.on_fatal);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            if stopping.load(Ordering::SeqCst) {
                return;
            }
            match outcome {
                Ok(Ok(())) => {
                    error!("Deadly task {task_name} exited unexpectedly, killing myself ...")
                }
                Ok(Err(e)) => error!("Unhandled error in {task_name}: {e:#}, killing myself ..."),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Deadly task {task_name} panicked: {message}, killing myself ...");
                }
            }
            on_fatal(&task_name);
        });

        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((name, handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Cancels every task and waits for them to finish.
    pub async fn stop_all(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        info!("Stopping {} background task(s) ...", tasks.len());
        for (_, handle) in &tasks {
            handle.abort();
        }
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Task {name} failed while stopping: {e}"),
            }
        }
    }
}

/// Sends `SIGTERM` to the current process.
#[cfg(unix)]
pub fn terminate_self() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
        error!("Can't send SIGTERM to myself: {e}; exiting");
        std::process::exit(1);
    }
}

#[cfg(not(unix))]
pub fn terminate_self() {
    std::process::exit(1);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recording_supervisor() -> (TaskSupervisor, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = TaskSupervisor::with_fatal_handler(Arc::new(move |name: &str| {
            let _ = tx.send(name.to_string());
        }));
        (supervisor, rx)
    }

    #[tokio::test]
    async fn test_error_is_fatal() {
        let (supervisor, mut fatal) = recording_supervisor();
        supervisor.spawn_deadly("poller", async { anyhow::bail!("device gone") });

        assert_eq!(fatal.recv().await.as_deref(), Some("poller"));
    }

    #[tokio::test]
    async fn test_normal_return_is_fatal() {
        let (supervisor, mut fatal) = recording_supervisor();
        supervisor.spawn_deadly("controller", async { Ok(()) });

        assert_eq!(fatal.recv().await.as_deref(), Some("controller"));
    }

    #[tokio::test]
    async fn test_panic_is_fatal() {
        let (supervisor, mut fatal) = recording_supervisor();
        let explode = true;
        supervisor.spawn_deadly("panicky", async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });

        assert_eq!(fatal.recv().await.as_deref(), Some("panicky"));
    }

    #[tokio::test]
    async fn test_cancellation_during_shutdown_is_not_fatal() {
        // Arrange
        let (supervisor, mut fatal) = recording_supervisor();
        for i in 0..3 {
            supervisor.spawn_deadly(format!("forever-{i}"), async {
                std::future::pending::<()>().await;
                Ok(())
            });
        }
        assert_eq!(supervisor.task_count(), 3);

        // Act
        supervisor.stop_all().await;

        // Assert
        assert_eq!(supervisor.task_count(), 0);
        drop(supervisor);
        assert_eq!(
            tokio::time::timeout(Duration::from_millis(50), fatal.recv()).await,
            Ok(None),
            "no fatal report expected"
        );
    }
}
