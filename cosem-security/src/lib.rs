//! Security layer for the cosem DLMS/COSEM stack
//!
//! AES-128-GCM ciphering of xDLMS APDUs (security suite 5) plus the GMAC
//! challenge tags used by the HLS-5 mutual authentication.

pub mod ciphering;
pub mod constants;
pub mod counter;
pub mod title;

pub use ciphering::{
    clear_to_glo, glo_to_clear, GcmSuite, GCM_TAG_LENGTH, GLO_INITIATE_REQUEST,
    GLO_INITIATE_RESPONSE, SECURITY_CONTROL_AUTH_ENC,
};
pub use constants::AuthenticationMechanism;
pub use counter::FrameCounter;
pub use title::SystemTitle;
