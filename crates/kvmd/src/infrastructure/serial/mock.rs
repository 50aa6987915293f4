//! Scripted serial link for tests.
//!
//! [`MockSerialLink`] is cheaply cloneable: hand one clone to the code under
//! test (boxed as a [`SerialLink`]) and keep another to script input and
//! inspect what happened.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{SerialError, SerialLink};

#[derive(Default)]
struct MockState {
    open: bool,
    open_count: u32,
    close_count: u32,
    fail_opens: u32,
    inbound: VecDeque<Result<Vec<u8>, String>>,
    replies: HashMap<String, Vec<u8>>,
    written: Vec<Vec<u8>>,
}

/// A [`SerialLink`] that plays back scripted input.
#[derive(Clone, Default)]
pub struct MockSerialLink {
    state: Arc<Mutex<MockState>>,
}

impl MockSerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Queues bytes to be returned by a future `read_available`.
    pub fn push_read(&self, data: impl AsRef<[u8]>) {
        self.state().inbound.push_back(Ok(data.as_ref().to_vec()));
    }

    /// Queues an I/O error for a future `read_available`.
    pub fn push_read_error(&self, message: &str) {
        self.state().inbound.push_back(Err(message.to_string()));
    }

    /// When `command` (trimmed) is written, queue `reply` as inbound data.
    pub fn reply_to(&self, command: &str, reply: impl AsRef<[u8]>) {
        self.state()
            .replies
            .insert(command.to_string(), reply.as_ref().to_vec());
    }

    /// Makes the next `count` opens fail.
    pub fn fail_opens(&self, count: u32) {
        self.state().fail_opens = count;
    }

    pub fn open_count(&self) -> u32 {
        self.state().open_count
    }

    pub fn close_count(&self) -> u32 {
        self.state().close_count
    }

    pub fn currently_open(&self) -> bool {
        self.state().open
    }

    /// Everything written so far, one entry per `write` call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }
}

#[async_trait]
impl SerialLink for MockSerialLink {
    fn port_name(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    async fn open(&mut self) -> Result<(), SerialError> {
        let mut state = self.state();
        if state.open {
            return Ok(());
        }
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(SerialError::Open {
                port: "mock".to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let mut state = self.state();
        if !state.open {
            return Err(SerialError::NotOpen);
        }
        state.written.push(data.to_vec());
        let command = String::from_utf8_lossy(data).trim().to_string();
        if let Some(reply) = state.replies.get(&command).cloned() {
            state.inbound.push_back(Ok(reply));
        }
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, SerialError> {
        let mut state = self.state();
        if !state.open {
            return Err(SerialError::NotOpen);
        }
        match state.inbound.pop_front() {
            Some(Ok(data)) => Ok(data),
            Some(Err(message)) => Err(SerialError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                message,
            ))),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_is_queued_after_matching_write() {
        // Arrange
        let observer = MockSerialLink::new();
        observer.reply_to("ver", "2.0\r\n");
        let mut link = observer.clone();
        link.open().await.unwrap();

        // Act
        link.write(b"ver\r\n").await.unwrap();

        // Assert
        assert_eq!(link.read_available().await.unwrap(), b"2.0\r\n".to_vec());
        assert!(link.read_available().await.unwrap().is_empty());
        assert_eq!(observer.written(), vec![b"ver\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_open_and_close_are_counted_once_per_transition() {
        let observer = MockSerialLink::new();
        let mut link = observer.clone();

        link.open().await.unwrap();
        link.open().await.unwrap();
        link.close();
        link.close();

        assert_eq!(observer.open_count(), 1);
        assert_eq!(observer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_open_failure() {
        let observer = MockSerialLink::new();
        observer.fail_opens(1);
        let mut link = observer.clone();

        assert!(link.open().await.is_err());
        assert!(link.open().await.is_ok());
    }
}
