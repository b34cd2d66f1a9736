//! UDP transport
//!
//! Presents the datagram socket through the same byte-stream interface as
//! TCP: each received datagram is buffered and drained by subsequent
//! `read` calls, so the wrapper layer can read the header and the payload
//! separately.

use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use cosem_core::{CosemError, CosemResult};
use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Largest wrapper PDU plus header that fits a single datagram.
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport settings.
#[derive(Debug, Clone)]
pub struct UdpSettings {
    pub address: SocketAddr,
    pub timeout: Option<Duration>,
}

impl UdpSettings {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// UDP transport to a meter.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    settings: UdpSettings,
    pending: BytesMut,
    closed: bool,
}

impl UdpTransport {
    pub fn new(settings: UdpSettings) -> Self {
        Self {
            socket: None,
            settings,
            pending: BytesMut::new(),
            closed: true,
        }
    }

    fn socket(&self) -> CosemResult<&UdpSocket> {
        self.socket.as_ref().ok_or_else(|| {
            CosemError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "UDP socket not connected",
            ))
        })
    }
}

#[async_trait]
impl TransportLayer for UdpTransport {
    async fn open(&mut self) -> CosemResult<()> {
        if !self.closed {
            return Err(CosemError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "connection has already been opened",
            )));
        }

        debug!("connecting udp transport: {}", self.settings.address);
        let bind_address: SocketAddr = if self.settings.address.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_address).await?;
        socket.connect(self.settings.address).await?;
        self.socket = Some(socket);
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for UdpTransport {
    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.settings.timeout = timeout;
    }

    async fn read(&mut self, buf: &mut [u8]) -> CosemResult<usize> {
        if self.pending.is_empty() {
            let timeout = self.settings.timeout;
            let socket = self.socket()?;
            let mut datagram = vec![0u8; MAX_DATAGRAM];
            let received = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, socket.recv(&mut datagram))
                    .await
                    .map_err(|_| CosemError::Timeout)??,
                None => socket.recv(&mut datagram).await?,
            };
            self.pending.extend_from_slice(&datagram[..received]);
        }

        let count = buf.len().min(self.pending.len());
        buf[..count].copy_from_slice(&self.pending[..count]);
        self.pending.advance(count);
        Ok(count)
    }

    async fn write(&mut self, buf: &[u8]) -> CosemResult<usize> {
        let timeout = self.settings.timeout;
        let socket = self.socket()?;
        let sent = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, socket.send(buf))
                .await
                .map_err(|_| CosemError::Timeout)??,
            None => socket.send(buf).await?,
        };
        Ok(sent)
    }

    async fn flush(&mut self) -> CosemResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> CosemResult<()> {
        self.socket = None;
        self.pending.clear();
        self.closed = true;
        Ok(())
    }
}
