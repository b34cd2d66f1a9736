//! Session layers for the cosem DLMS/COSEM stack
//!
//! Two framings over a byte stream: the 8-byte wrapper header used on
//! TCP/UDP, and the HDLC link layer (ISO/IEC 13239 subset) used for
//! serial-profile meters reached over TCP.

pub mod hdlc;
pub mod wrapper;

pub use wrapper::{wrapper_receive, wrapper_send, WrapperHeader, WRAPPER_HEADER_LENGTH};
