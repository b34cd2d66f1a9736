//! TCP transport

use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use cosem_core::{CosemError, CosemResult};
use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP transport settings.
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    /// Connect/read/write timeout. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// TCP transport to a meter.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    settings: TcpSettings,
    closed: bool,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Wrap an already-connected stream (used by the test harness).
    pub fn from_connected_stream(stream: TcpStream, timeout: Option<Duration>) -> Self {
        let address = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self {
            stream: Some(stream),
            settings: TcpSettings { address, timeout },
            closed: false,
        }
    }

    fn stream_mut(&mut self) -> CosemResult<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            CosemError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "TCP stream not connected",
            ))
        })
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> CosemResult<()> {
        if !self.closed {
            return Err(CosemError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "connection has already been opened",
            )));
        }

        debug!("connecting tcp transport: {}", self.settings.address);
        let connect = TcpStream::connect(self.settings.address);
        let stream = match self.settings.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| CosemError::Timeout)??,
            None => connect.await?,
        };

        self.stream = Some(stream);
        self.closed = false;
        debug!("tcp transport connected: {}", self.settings.address);
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.settings.timeout = timeout;
    }

    async fn read(&mut self, buf: &mut [u8]) -> CosemResult<usize> {
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;

        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.read(buf))
                .await
                .map_err(|_| CosemError::Timeout)?
                .map_err(CosemError::Transport),
            None => stream.read(buf).await.map_err(CosemError::Transport),
        };

        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> CosemResult<usize> {
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| CosemError::Timeout)?
                .map_err(CosemError::Transport),
            None => stream.write(buf).await.map_err(CosemError::Transport),
        }
    }

    async fn flush(&mut self) -> CosemResult<()> {
        let stream = self.stream_mut()?;
        stream.flush().await.map_err(CosemError::Transport)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> CosemResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_and_write_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = TcpTransport::new(TcpSettings::new(address));
        transport.open().await.unwrap();
        transport.write_all(&[1, 2, 3, 4]).await.unwrap();
        transport.flush().await.unwrap();

        let mut echo = [0u8; 4];
        transport.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, [1, 2, 3, 4]);

        transport.close().await.unwrap();
        assert!(transport.is_closed());
        // Closing twice is a no-op.
        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn double_open_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let mut transport = TcpTransport::new(TcpSettings::new(address));
        transport.open().await.unwrap();
        assert!(transport.open().await.is_err());
    }
}
