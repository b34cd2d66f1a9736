//! HDLC link layer
//!
//! Frame codec, addressing, FCS, and the link task that drives the
//! SNRM/UA/I/RR/DISC state machine over a byte stream.

pub mod address;
pub mod fcs;
pub mod frame;
pub mod link;

pub use address::HdlcAddress;
pub use frame::{FrameType, HdlcFrame, HdlcParameters, LLC_REQUEST, LLC_RESPONSE};
pub use link::{HdlcLink, HdlcSettings, LinkState};
