//! ACTION service PDUs
//!
//! Only the normal variants are needed by a client: request `C3 01` and
//! response `C7 01`. The HLS-5 mutual authentication runs over these as a
//! method call on the current association object.

use crate::descriptor::MethodDescriptor;
use crate::invoke::InvokeIdAndPriority;
use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult, DlmsData};

pub const ACTION_REQUEST_TAG: u8 = 0xC3;
pub const ACTION_RESPONSE_TAG: u8 = 0xC7;

/// `action-request-normal`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequestNormal {
    pub invoke: InvokeIdAndPriority,
    pub method: MethodDescriptor,
    pub parameters: Option<DlmsData>,
}

impl ActionRequestNormal {
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(ACTION_REQUEST_TAG);
        out.write_u8(0x01);
        out.write_u8(self.invoke.byte());
        self.method.encode(&mut out);
        match &self.parameters {
            None => out.write_u8(0x00),
            Some(parameters) => {
                out.write_u8(0x01);
                out.write_data(parameters)?;
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        let choice = decoder.read_u8()?;
        if tag != ACTION_REQUEST_TAG || choice != 0x01 {
            return Err(CosemError::Encoding(format!(
                "expected action-request-normal, found 0x{:02X} 0x{:02X}",
                tag, choice
            )));
        }
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        let method = MethodDescriptor::decode(&mut decoder)?;
        let parameters = if decoder.read_u8()? != 0 {
            Some(decoder.read_data()?)
        } else {
            None
        };
        Ok(Self {
            invoke,
            method,
            parameters,
        })
    }
}

/// `action-response-normal`: the action result and an optional return value.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponseNormal {
    pub invoke: InvokeIdAndPriority,
    pub action_result: u8,
    pub return_data: Option<DlmsData>,
}

impl ActionResponseNormal {
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(ACTION_RESPONSE_TAG);
        out.write_u8(0x01);
        out.write_u8(self.invoke.byte());
        out.write_u8(self.action_result);
        match &self.return_data {
            None => out.write_u8(0x00),
            Some(data) => {
                out.write_u8(0x01);
                out.write_data(data)?;
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        let choice = decoder.read_u8()?;
        if tag != ACTION_RESPONSE_TAG || choice != 0x01 {
            return Err(CosemError::Encoding(format!(
                "expected action-response-normal, found 0x{:02X} 0x{:02X}",
                tag, choice
            )));
        }
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        let action_result = decoder.read_u8()?;
        let return_data = if decoder.read_u8()? != 0 {
            Some(decoder.read_data()?)
        } else {
            None
        };
        Ok(Self {
            invoke,
            action_result,
            return_data,
        })
    }
}
