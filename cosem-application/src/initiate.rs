//! xDLMS initiate PDUs
//!
//! The initiate-request rides inside the AARQ user-information (ciphered
//! as `glo-initiate-request` under HLS-5); the initiate-response comes
//! back in the AARE and carries the negotiated PDU size and conformance.

use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult};

/// Cleartext APDU tag of initiate-request.
pub const INITIATE_REQUEST_TAG: u8 = 0x01;
/// Cleartext APDU tag of initiate-response.
pub const INITIATE_RESPONSE_TAG: u8 = 0x08;

const DLMS_VERSION: u8 = 6;
const CONFORMANCE_TAG: [u8; 2] = [0x5F, 0x1F];

/// xDLMS initiate-request.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateRequest {
    pub dedicated_key: Option<Vec<u8>>,
    pub response_allowed: bool,
    pub proposed_quality_of_service: Option<i8>,
    pub proposed_dlms_version: u8,
    /// Proposed conformance, 24 bits.
    pub proposed_conformance: [u8; 3],
    pub client_max_receive_pdu_size: u16,
}

impl Default for InitiateRequest {
    fn default() -> Self {
        Self {
            dedicated_key: None,
            response_allowed: true,
            proposed_quality_of_service: None,
            proposed_dlms_version: DLMS_VERSION,
            // Get, set, action, block transfer in both directions,
            // selective access, attribute 0 referencing.
            proposed_conformance: [0x00, 0x7E, 0x1F],
            client_max_receive_pdu_size: 0xFFFF,
        }
    }
}

impl InitiateRequest {
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(INITIATE_REQUEST_TAG);

        match &self.dedicated_key {
            None => out.write_u8(0x00),
            Some(key) => {
                out.write_u8(0x01);
                out.write_length(key.len())?;
                out.write_bytes(key);
            }
        }

        // response-allowed defaults to true; only the exception is encoded.
        if self.response_allowed {
            out.write_u8(0x00);
        } else {
            out.write_u8(0x01);
            out.write_u8(0x00);
        }

        match self.proposed_quality_of_service {
            None => out.write_u8(0x00),
            Some(qos) => {
                out.write_u8(0x01);
                out.write_u8(qos as u8);
            }
        }

        out.write_u8(self.proposed_dlms_version);
        out.write_bytes(&CONFORMANCE_TAG);
        out.write_u8(0x04);
        out.write_u8(0x00);
        out.write_bytes(&self.proposed_conformance);
        out.write_u16(self.client_max_receive_pdu_size);
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != INITIATE_REQUEST_TAG {
            return Err(CosemError::Encoding(format!(
                "expected initiate-request tag 0x01, found 0x{:02X}",
                tag
            )));
        }

        let dedicated_key = if decoder.read_u8()? != 0 {
            let length = decoder.read_length()?;
            Some(decoder.take(length)?.to_vec())
        } else {
            None
        };

        let response_allowed = if decoder.read_u8()? != 0 {
            decoder.read_u8()? != 0
        } else {
            true
        };

        let proposed_quality_of_service = if decoder.read_u8()? != 0 {
            Some(decoder.read_u8()? as i8)
        } else {
            None
        };

        let proposed_dlms_version = decoder.read_u8()?;
        let conformance = decode_conformance(&mut decoder)?;
        let client_max_receive_pdu_size = decoder.read_u16()?;

        Ok(Self {
            dedicated_key,
            response_allowed,
            proposed_quality_of_service,
            proposed_dlms_version,
            proposed_conformance: conformance,
            client_max_receive_pdu_size,
        })
    }
}

/// xDLMS initiate-response.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateResponse {
    pub negotiated_quality_of_service: Option<i8>,
    pub negotiated_dlms_version: u8,
    pub negotiated_conformance: [u8; 3],
    pub server_max_receive_pdu_size: u16,
    pub vaa_name: u16,
}

impl InitiateResponse {
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(INITIATE_RESPONSE_TAG);
        match self.negotiated_quality_of_service {
            None => out.write_u8(0x00),
            Some(qos) => {
                out.write_u8(0x01);
                out.write_u8(qos as u8);
            }
        }
        out.write_u8(self.negotiated_dlms_version);
        out.write_bytes(&CONFORMANCE_TAG);
        out.write_u8(0x04);
        out.write_u8(0x00);
        out.write_bytes(&self.negotiated_conformance);
        out.write_u16(self.server_max_receive_pdu_size);
        out.write_u16(self.vaa_name);
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != INITIATE_RESPONSE_TAG {
            return Err(CosemError::Encoding(format!(
                "expected initiate-response tag 0x08, found 0x{:02X}",
                tag
            )));
        }

        let negotiated_quality_of_service = if decoder.read_u8()? != 0 {
            Some(decoder.read_u8()? as i8)
        } else {
            None
        };
        let negotiated_dlms_version = decoder.read_u8()?;
        let negotiated_conformance = decode_conformance(&mut decoder)?;
        let server_max_receive_pdu_size = decoder.read_u16()?;
        let vaa_name = decoder.read_u16()?;

        Ok(Self {
            negotiated_quality_of_service,
            negotiated_dlms_version,
            negotiated_conformance,
            server_max_receive_pdu_size,
            vaa_name,
        })
    }
}

fn decode_conformance(decoder: &mut AxdrDecoder<'_>) -> CosemResult<[u8; 3]> {
    let tag = decoder.take(2)?;
    if tag != CONFORMANCE_TAG {
        return Err(CosemError::Encoding(format!(
            "expected conformance tag 5F 1F, found {:02X?}",
            tag
        )));
    }
    // 4 content bytes: unused-bits count plus 24 conformance bits.
    let length = decoder.read_u8()?;
    if length != 0x04 {
        return Err(CosemError::Encoding(format!(
            "conformance block of {} bytes",
            length
        )));
    }
    let _unused_bits = decoder.read_u8()?;
    let bits = decoder.take(3)?;
    Ok([bits[0], bits[1], bits[2]])
}
