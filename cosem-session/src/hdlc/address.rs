//! HDLC addressing
//!
//! Client addresses occupy one byte; server addresses carry a logical
//! device id and optionally a physical device id over 1, 2 or 4 bytes.
//! Each address byte holds 7 payload bits; bit 0 of the last byte is the
//! stop bit.

use cosem_core::{CosemError, CosemResult};
use std::fmt;

const ONE_BYTE_MAX: u16 = 0x7F;
const TWO_BYTE_MAX: u16 = 0x3FFF;

/// An HDLC station address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcAddress {
    logical: u16,
    physical: Option<u16>,
    byte_length: usize,
}

impl HdlcAddress {
    /// One-byte client address.
    pub fn client(address: u8) -> CosemResult<Self> {
        if u16::from(address) > ONE_BYTE_MAX {
            return Err(CosemError::Config(format!(
                "client address 0x{:02X} exceeds 7 bits",
                address
            )));
        }
        Ok(Self {
            logical: u16::from(address),
            physical: None,
            byte_length: 1,
        })
    }

    /// Server address from logical device, optional physical device and an
    /// optional explicit encoded length (1, 2 or 4 bytes, inferred when
    /// absent).
    pub fn server(
        logical: u16,
        physical: Option<u16>,
        byte_length: Option<usize>,
    ) -> CosemResult<Self> {
        let needed = |value: u16| if value > ONE_BYTE_MAX { 2 } else { 1 };
        let inferred = match physical {
            // A wide logical id needs the four-byte form even alone.
            None if logical > ONE_BYTE_MAX => 4,
            None => 1,
            Some(physical) => 2 * needed(logical).max(needed(physical)),
        };
        let byte_length = byte_length.unwrap_or(inferred);

        if !matches!(byte_length, 1 | 2 | 4) {
            return Err(CosemError::Config(format!(
                "server address length must be 1, 2 or 4 bytes, got {}",
                byte_length
            )));
        }
        if byte_length == 1 && physical.is_some() {
            return Err(CosemError::Config(
                "a one-byte server address cannot carry a physical device id".into(),
            ));
        }
        let max = if byte_length == 4 {
            TWO_BYTE_MAX
        } else {
            ONE_BYTE_MAX
        };
        if logical > max || physical.is_some_and(|p| p > max) {
            return Err(CosemError::Config(format!(
                "server address {}/{:?} does not fit {} bytes",
                logical, physical, byte_length
            )));
        }

        Ok(Self {
            logical,
            physical,
            byte_length,
        })
    }

    pub fn logical(&self) -> u16 {
        self.logical
    }

    pub fn physical(&self) -> Option<u16> {
        self.physical
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Encode with the stop bit on the final byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = match self.byte_length {
            1 => vec![(self.logical as u8) << 1],
            2 => vec![
                (self.logical as u8) << 1,
                (self.physical.unwrap_or(0) as u8) << 1,
            ],
            _ => {
                let physical = self.physical.unwrap_or(0);
                vec![
                    ((self.logical >> 7) as u8) << 1,
                    ((self.logical & 0x7F) as u8) << 1,
                    ((physical >> 7) as u8) << 1,
                    ((physical & 0x7F) as u8) << 1,
                ]
            }
        };
        *bytes.last_mut().unwrap() |= 0x01;
        bytes
    }

    /// Decode an address whose extent was already found via the stop bit.
    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let (logical, physical) = match bytes.len() {
            1 => (u16::from(bytes[0] >> 1), None),
            2 => (u16::from(bytes[0] >> 1), Some(u16::from(bytes[1] >> 1))),
            4 => (
                u16::from(bytes[0] >> 1) << 7 | u16::from(bytes[1] >> 1),
                Some(u16::from(bytes[2] >> 1) << 7 | u16::from(bytes[3] >> 1)),
            ),
            other => {
                return Err(CosemError::Framing(format!(
                    "HDLC address of {} bytes is invalid",
                    other
                )))
            }
        };
        Ok(Self {
            logical,
            physical,
            byte_length: bytes.len(),
        })
    }

    /// Split an address off the front of `data`, following the stop bit.
    pub fn take(data: &[u8]) -> CosemResult<(Self, usize)> {
        let mut length = 0;
        while length < 4 {
            if length >= data.len() {
                return Err(CosemError::Framing("HDLC address is truncated".into()));
            }
            length += 1;
            if data[length - 1] & 0x01 != 0 {
                let address = Self::decode(&data[..length])?;
                return Ok((address, length));
            }
        }
        Err(CosemError::Framing(
            "HDLC address has no stop bit within 4 bytes".into(),
        ))
    }
}

impl fmt::Display for HdlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.physical {
            Some(physical) => write!(f, "{}/{}", self.logical, physical),
            None => write!(f, "{}", self.logical),
        }
    }
}
