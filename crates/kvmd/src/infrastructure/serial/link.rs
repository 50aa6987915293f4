//! Production [`SerialLink`] backed by `tokio-serial`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::{SerialError, SerialLink};

const READ_CHUNK: usize = 4096;

/// A real serial port, opened lazily.
pub struct TokioSerialLink {
    port: String,
    baud_rate: u32,
    read_timeout: Duration,
    stream: Option<SerialStream>,
}

impl TokioSerialLink {
    pub fn new(port: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            read_timeout,
            stream: None,
        }
    }
}

#[async_trait]
impl SerialLink for TokioSerialLink {
    fn port_name(&self) -> &str {
        &self.port
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self) -> Result<(), SerialError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .timeout(self.read_timeout)
            .open_native_async()
            .map_err(|e| SerialError::Open {
                port: self.port.clone(),
                reason: e.to_string(),
            })?;
        debug!("Serial port {} opened at {} baud", self.port, self.baud_rate);
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Serial port {} closed", self.port);
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let stream = self.stream.as_mut().ok_or(SerialError::NotOpen)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>, SerialError> {
        let stream = self.stream.as_mut().ok_or(SerialError::NotOpen)?;
        let mut buf = vec![0u8; READ_CHUNK];
        match tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_link_is_closed() {
        let link = TokioSerialLink::new("/dev/null-serial", 115_200, Duration::from_millis(10));
        assert!(!link.is_open());
        assert_eq!(link.port_name(), "/dev/null-serial");
    }

    #[tokio::test]
    async fn test_io_on_closed_link_is_not_open_error() {
        let mut link = TokioSerialLink::new("/dev/null-serial", 115_200, Duration::from_millis(10));
        assert!(matches!(link.write(b"x").await, Err(SerialError::NotOpen)));
        assert!(matches!(link.read_available().await, Err(SerialError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_missing_device_reports_port() {
        let mut link =
            TokioSerialLink::new("/dev/kvmd-does-not-exist", 115_200, Duration::from_millis(10));
        match link.open().await {
            Err(SerialError::Open { port, .. }) => assert_eq!(port, "/dev/kvmd-does-not-exist"),
            other => panic!("expected open error, got {other:?}"),
        }
        assert!(!link.is_open());
    }
}
