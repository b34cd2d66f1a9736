//! ASN.1 codecs for the cosem DLMS/COSEM stack
//!
//! Two encodings live here: A-XDR for xDLMS APDUs and COSEM data values,
//! and the BER subset needed by the ACSE association PDUs (AARQ/AARE).
//! Both are pure codecs; no protocol state.

pub mod acse;
pub mod axdr;
pub mod ber;

pub use acse::{AareApdu, AarqApdu, SourceDiagnostic};
pub use axdr::{AxdrDecoder, AxdrEncoder};
pub use ber::{BerDecoder, BerEncoder};
