//! Stream accessor traits

use async_trait::async_trait;
use cosem_core::{CosemError, CosemResult};
use std::time::Duration;

/// Byte-stream access to a remote meter.
///
/// Implementations own the socket exclusively; callers serialize access
/// through `&mut self`.
#[async_trait]
pub trait StreamAccessor: Send {
    /// Set the read/write timeout. `None` waits forever.
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Read available bytes into `buf`, returning the count (0 on EOF).
    async fn read(&mut self, buf: &mut [u8]) -> CosemResult<usize>;

    /// Fill `buf` completely or fail.
    async fn read_exact(&mut self, mut buf: &mut [u8]) -> CosemResult<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(CosemError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended mid-read",
                )));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Write bytes, returning how many were accepted.
    async fn write(&mut self, buf: &[u8]) -> CosemResult<usize>;

    /// Write the whole buffer or fail.
    async fn write_all(&mut self, buf: &[u8]) -> CosemResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(CosemError::Transport(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "stream accepted no bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush buffered output.
    async fn flush(&mut self) -> CosemResult<()>;

    fn is_closed(&self) -> bool;

    /// Close the stream. Safe to call more than once.
    async fn close(&mut self) -> CosemResult<()>;
}

/// A transport that can also establish the physical connection.
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    /// Open the connection to the remote endpoint.
    async fn open(&mut self) -> CosemResult<()>;
}
