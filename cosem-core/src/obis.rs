use crate::error::{CosemError, CosemResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OBIS code: the 6-byte instance identifier of a COSEM object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Create an OBIS code from its six value groups A..F.
    pub fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Create an OBIS code from a 6-byte slice.
    pub fn from_slice(bytes: &[u8]) -> CosemResult<Self> {
        if bytes.len() != 6 {
            return Err(CosemError::Encoding(format!(
                "OBIS code must be 6 bytes, got {}",
                bytes.len()
            )));
        }
        let mut b = [0u8; 6];
        b.copy_from_slice(bytes);
        Ok(Self { bytes: b })
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(f, "{}.{}.{}.{}.{}.{}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl FromStr for ObisCode {
    type Err = CosemError;

    /// Parse the dotted form, e.g. `"0.0.40.0.0.255"`.
    fn from_str(s: &str) -> CosemResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 6 {
            return Err(CosemError::Encoding(format!(
                "invalid OBIS code {:?}: expected 6 dot-separated groups",
                s
            )));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = part.parse::<u8>().map_err(|_| {
                CosemError::Encoding(format!("invalid OBIS group {:?} in {:?}", part, s))
            })?;
        }
        Ok(Self { bytes })
    }
}
