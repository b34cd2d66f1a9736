//! GET service PDUs
//!
//! Requests: normal `C0 01`, next-data-block `C0 02`, with-list `C0 03`.
//! Responses: normal `C4 01`, with-datablock `C4 02`, with-list `C4 03`.
//! Every result carries its data-access-result byte (0 = success) so list
//! operations keep per-entry outcomes.

use crate::descriptor::{AttributeDescriptor, SelectiveAccess};
use crate::invoke::InvokeIdAndPriority;
use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult, DlmsData};

pub const GET_REQUEST_TAG: u8 = 0xC0;
pub const GET_RESPONSE_TAG: u8 = 0xC4;

/// Outcome of one GET: the access result byte and, on success, the value.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
    pub access_result: u8,
    pub data: Option<DlmsData>,
}

impl GetResult {
    pub fn success(data: DlmsData) -> Self {
        Self {
            access_result: 0,
            data: Some(data),
        }
    }

    pub fn failure(access_result: u8) -> Self {
        Self {
            access_result,
            data: None,
        }
    }

    /// Unwrap the value, turning a nonzero access result into an error.
    pub fn into_data(self) -> CosemResult<DlmsData> {
        match self.data {
            Some(data) if self.access_result == 0 => Ok(data),
            _ => Err(CosemError::Protocol(format!(
                "data access result {}",
                self.access_result
            ))),
        }
    }
}

/// One slice of an inbound block transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct GetDataBlock {
    pub last_block: bool,
    pub block_number: u32,
    pub access_result: u8,
    pub raw_data: Vec<u8>,
}

/// GET request APDU.
#[derive(Debug, Clone, PartialEq)]
pub enum GetRequest {
    Normal {
        invoke: InvokeIdAndPriority,
        attribute: AttributeDescriptor,
        access: Option<SelectiveAccess>,
    },
    Next {
        invoke: InvokeIdAndPriority,
        block_number: u32,
    },
    WithList {
        invoke: InvokeIdAndPriority,
        attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
    },
}

impl GetRequest {
    pub fn invoke(&self) -> InvokeIdAndPriority {
        match self {
            GetRequest::Normal { invoke, .. }
            | GetRequest::Next { invoke, .. }
            | GetRequest::WithList { invoke, .. } => *invoke,
        }
    }

    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(GET_REQUEST_TAG);
        match self {
            GetRequest::Normal {
                invoke,
                attribute,
                access,
            } => {
                out.write_u8(0x01);
                out.write_u8(invoke.byte());
                attribute.encode(&mut out);
                SelectiveAccess::encode_option(access.as_ref(), &mut out)?;
            }
            GetRequest::Next {
                invoke,
                block_number,
            } => {
                out.write_u8(0x02);
                out.write_u8(invoke.byte());
                out.write_u32(*block_number);
            }
            GetRequest::WithList { invoke, attributes } => {
                out.write_u8(0x03);
                out.write_u8(invoke.byte());
                out.write_length(attributes.len())?;
                for (attribute, access) in attributes {
                    attribute.encode(&mut out);
                    SelectiveAccess::encode_option(access.as_ref(), &mut out)?;
                }
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != GET_REQUEST_TAG {
            return Err(CosemError::Encoding(format!(
                "expected get-request tag 0xC0, found 0x{:02X}",
                tag
            )));
        }
        let choice = decoder.read_u8()?;
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        match choice {
            0x01 => {
                let attribute = AttributeDescriptor::decode(&mut decoder)?;
                let access = SelectiveAccess::decode_option(&mut decoder)?;
                Ok(GetRequest::Normal {
                    invoke,
                    attribute,
                    access,
                })
            }
            0x02 => Ok(GetRequest::Next {
                invoke,
                block_number: decoder.read_u32()?,
            }),
            0x03 => {
                let count = decoder.read_length()?;
                let mut attributes = Vec::with_capacity(count);
                for _ in 0..count {
                    let attribute = AttributeDescriptor::decode(&mut decoder)?;
                    let access = SelectiveAccess::decode_option(&mut decoder)?;
                    attributes.push((attribute, access));
                }
                Ok(GetRequest::WithList { invoke, attributes })
            }
            other => Err(CosemError::Encoding(format!(
                "unknown get-request choice 0x{:02X}",
                other
            ))),
        }
    }
}

/// GET response APDU.
#[derive(Debug, Clone, PartialEq)]
pub enum GetResponse {
    Normal {
        invoke: InvokeIdAndPriority,
        result: GetResult,
    },
    WithDataBlock {
        invoke: InvokeIdAndPriority,
        block: GetDataBlock,
    },
    WithList {
        invoke: InvokeIdAndPriority,
        results: Vec<GetResult>,
    },
}

impl GetResponse {
    pub fn invoke(&self) -> InvokeIdAndPriority {
        match self {
            GetResponse::Normal { invoke, .. }
            | GetResponse::WithDataBlock { invoke, .. }
            | GetResponse::WithList { invoke, .. } => *invoke,
        }
    }

    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(GET_RESPONSE_TAG);
        match self {
            GetResponse::Normal { invoke, result } => {
                out.write_u8(0x01);
                out.write_u8(invoke.byte());
                out.write_u8(result.access_result);
                if result.access_result == 0 {
                    let data = result.data.as_ref().ok_or_else(|| {
                        CosemError::Encoding("successful get-response without data".into())
                    })?;
                    out.write_data(data)?;
                }
            }
            GetResponse::WithDataBlock { invoke, block } => {
                out.write_u8(0x02);
                out.write_u8(invoke.byte());
                out.write_u8(u8::from(block.last_block));
                out.write_u32(block.block_number);
                out.write_u8(block.access_result);
                if block.access_result == 0 {
                    out.write_length(block.raw_data.len())?;
                    out.write_bytes(&block.raw_data);
                }
            }
            GetResponse::WithList { invoke, results } => {
                out.write_u8(0x03);
                out.write_u8(invoke.byte());
                encode_result_list(results, &mut out)?;
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != GET_RESPONSE_TAG {
            return Err(CosemError::Encoding(format!(
                "expected get-response tag 0xC4, found 0x{:02X}",
                tag
            )));
        }
        let choice = decoder.read_u8()?;
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        match choice {
            0x01 => {
                let access_result = decoder.read_u8()?;
                let data = if access_result == 0 {
                    Some(decoder.read_data()?)
                } else {
                    None
                };
                Ok(GetResponse::Normal {
                    invoke,
                    result: GetResult {
                        access_result,
                        data,
                    },
                })
            }
            0x02 => {
                let last_block = decoder.read_u8()? != 0;
                let block_number = decoder.read_u32()?;
                let access_result = decoder.read_u8()?;
                let raw_data = if access_result == 0 {
                    let length = decoder.read_length()?;
                    decoder.take(length)?.to_vec()
                } else {
                    Vec::new()
                };
                Ok(GetResponse::WithDataBlock {
                    invoke,
                    block: GetDataBlock {
                        last_block,
                        block_number,
                        access_result,
                        raw_data,
                    },
                })
            }
            0x03 => {
                let results = decode_result_list(&mut decoder)?;
                Ok(GetResponse::WithList { invoke, results })
            }
            other => Err(CosemError::Encoding(format!(
                "unknown get-response choice 0x{:02X}",
                other
            ))),
        }
    }
}

/// Encode a list of results: count, then access result and data per entry.
pub fn encode_result_list(results: &[GetResult], out: &mut AxdrEncoder) -> CosemResult<()> {
    out.write_length(results.len())?;
    for result in results {
        out.write_u8(result.access_result);
        if result.access_result == 0 {
            let data = result.data.as_ref().ok_or_else(|| {
                CosemError::Encoding("successful list entry without data".into())
            })?;
            out.write_data(data)?;
        }
    }
    Ok(())
}

/// Decode a list of results (the with-list response body).
pub fn decode_result_list(decoder: &mut AxdrDecoder<'_>) -> CosemResult<Vec<GetResult>> {
    let count = decoder.read_length()?;
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        let access_result = decoder.read_u8()?;
        let data = if access_result == 0 {
            Some(decoder.read_data()?)
        } else {
            None
        };
        results.push(GetResult {
            access_result,
            data,
        });
    }
    Ok(results)
}
