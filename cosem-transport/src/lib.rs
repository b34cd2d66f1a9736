//! Transport layer for the cosem DLMS/COSEM stack
//!
//! Byte-stream access to a remote meter over TCP or UDP. The session layer
//! (wrapper or HDLC) sits on top of the `StreamAccessor` trait and never
//! touches sockets directly.

pub mod stream;
pub mod tcp;
pub mod udp;

pub use stream::{StreamAccessor, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
pub use udp::{UdpSettings, UdpTransport};
