//! COSEM data values
//!
//! `DlmsData` is the value type carried by Get/Set/Action payloads. The
//! A-XDR wire codec for it lives in `cosem-asn1`.

use crate::error::{CosemError, CosemResult};

/// A COSEM data value.
#[derive(Debug, Clone, PartialEq)]
pub enum DlmsData {
    Null,
    Boolean(bool),
    /// Bit string: packed bits plus the number of valid bits.
    BitString(Vec<u8>, usize),
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    Enumerate(u8),
    Array(Vec<DlmsData>),
    Structure(Vec<DlmsData>),
}

impl DlmsData {
    /// Extract the octet-string payload, failing on any other variant.
    pub fn octet_string(&self) -> CosemResult<&[u8]> {
        match self {
            DlmsData::OctetString(bytes) => Ok(bytes),
            other => Err(CosemError::Encoding(format!(
                "expected octet-string, got {}",
                other.type_name()
            ))),
        }
    }

    /// Name of the COSEM type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            DlmsData::Null => "null-data",
            DlmsData::Boolean(_) => "boolean",
            DlmsData::BitString(..) => "bit-string",
            DlmsData::Integer8(_) => "integer",
            DlmsData::Integer16(_) => "long",
            DlmsData::Integer32(_) => "double-long",
            DlmsData::Integer64(_) => "long64",
            DlmsData::Unsigned8(_) => "unsigned",
            DlmsData::Unsigned16(_) => "long-unsigned",
            DlmsData::Unsigned32(_) => "double-long-unsigned",
            DlmsData::Unsigned64(_) => "long64-unsigned",
            DlmsData::OctetString(_) => "octet-string",
            DlmsData::VisibleString(_) => "visible-string",
            DlmsData::Enumerate(_) => "enum",
            DlmsData::Array(_) => "array",
            DlmsData::Structure(_) => "structure",
        }
    }
}
