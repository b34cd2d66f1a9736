use cosem_core::{CosemError, CosemResult};
use std::fmt;

/// 8-byte system title identifying a station.
///
/// The client title seeds outbound GCM nonces, the server title (learned
/// from the AARE) seeds inbound ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTitle {
    value: [u8; 8],
}

impl SystemTitle {
    pub fn new(value: [u8; 8]) -> Self {
        Self { value }
    }

    pub fn from_slice(bytes: &[u8]) -> CosemResult<Self> {
        if bytes.len() != 8 {
            return Err(CosemError::Security(format!(
                "system title length is {}, not 8",
                bytes.len()
            )));
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(bytes);
        Ok(Self { value })
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.value
    }

    /// GCM nonce for this station: title followed by the frame counter.
    pub fn nonce(&self, frame_counter: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.value);
        nonce[8..].copy_from_slice(&frame_counter.to_be_bytes());
        nonce
    }
}

impl fmt::Display for SystemTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.value {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
