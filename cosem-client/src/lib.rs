//! DLMS/COSEM client
//!
//! The [`DlmsConnection`] facade owns the transport (wrapper over TCP/UDP,
//! or an HDLC link task) and the security state of one association. An
//! [`AppConnection`] binds client and logical-device addresses to it and
//! drives the confirmed services: get, set and action, with block
//! transfer in both directions.

pub mod app;
pub mod association;
pub mod connection;

pub use app::AppConnection;
pub use association::{generate_challenge, Hls5Settings};
pub use connection::{DlmsConnection, HdlcConnectSettings};
