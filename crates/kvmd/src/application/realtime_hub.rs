//! Broadcast set of open realtime sessions.
//!
//! Each session owns an unbounded outbound queue; the hub only holds the
//! sending halves.  Broadcasting never waits on a client: a send to a closed
//! queue just drops that session from the set.
//!
//! Opening or closing a session changes stream demand, so the hub also holds
//! the wake-up handles of every stream controller and pokes them all on each
//! membership change.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::RealtimeEvent;

struct Session {
    wants_stream: bool,
    sender: UnboundedSender<RealtimeEvent>,
}

/// Registry of realtime sessions plus the stream-controller wake-ups.
#[derive(Default)]
pub struct RealtimeHub {
    sessions: RwLock<HashMap<Uuid, Session>>,
    stream_wakers: RwLock<Vec<Arc<Notify>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions_read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sessions_write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a stream controller's notifier to the wake-on-membership set.
    pub fn attach_stream_waker(&self, notify: Arc<Notify>) {
        self.stream_wakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notify);
    }

    fn wake_streams(&self) {
        let wakers = self
            .stream_wakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for notify in wakers.iter() {
            notify.notify_one();
        }
    }

    /// Opens a session and returns its id plus the receiving end of its queue.
    pub fn register(&self, wants_stream: bool) -> (Uuid, UnboundedReceiver<RealtimeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let count = {
            let mut sessions = self.sessions_write();
            sessions.insert(
                id,
                Session {
                    wants_stream,
                    sender,
                },
            );
            sessions.len()
        };
        info!("Registered new client socket: {id} (stream={wants_stream}); clients now: {count}");
        self.wake_streams();
        (id, receiver)
    }

    /// Removes a session.  Unknown ids are ignored.
    pub fn unregister(&self, id: Uuid) {
        let removed = self.sessions_write().remove(&id).is_some();
        if removed {
            info!("Removed client socket: {id}");
            self.wake_streams();
        }
    }

    /// Queues `event` for every session, dropping sessions whose queue is
    /// closed.  Returns the number of sessions that accepted it.
    pub fn broadcast(&self, event: &RealtimeEvent) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, session) in self.sessions_read().iter() {
            if session.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        if !dead.is_empty() {
            let mut sessions = self.sessions_write();
            for id in &dead {
                sessions.remove(id);
            }
            drop(sessions);
            debug!("Dropped {} dead client(s) during broadcast", dead.len());
            self.wake_streams();
        }
        delivered
    }

    /// True if at least one open session asked for the video stream.
    pub fn has_stream_clients(&self) -> bool {
        self.sessions_read().values().any(|s| s.wants_stream)
    }

    pub fn session_count(&self) -> usize {
        self.sessions_read().len()
    }

    /// Drops every session.  Their receivers observe a closed queue, which
    /// makes each session task close its socket.
    pub fn close_all(&self) {
        let closed = {
            let mut sessions = self.sessions_write();
            let count = sessions.len();
            sessions.clear();
            count
        };
        if closed > 0 {
            info!("Disconnected {closed} realtime client(s)");
            self.wake_streams();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
