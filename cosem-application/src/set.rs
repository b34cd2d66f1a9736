//! SET service PDUs
//!
//! Requests: normal `C1 01`, first-block `C1 02`, with-datablock `C1 03`,
//! with-list `C1 04`, with-list first-block `C1 05`. Responses mirror them
//! as `C5 01..05`. Blocked requests carry length-prefixed raw slices of
//! the A-XDR encoded value; the descriptors travel only in the first
//! block, so the server can apply the reassembled value atomically.

use crate::descriptor::{AttributeDescriptor, SelectiveAccess};
use crate::invoke::InvokeIdAndPriority;
use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult, DlmsData};

pub const SET_REQUEST_TAG: u8 = 0xC1;
pub const SET_RESPONSE_TAG: u8 = 0xC5;

/// SET request APDU.
#[derive(Debug, Clone, PartialEq)]
pub enum SetRequest {
    Normal {
        invoke: InvokeIdAndPriority,
        attribute: AttributeDescriptor,
        access: Option<SelectiveAccess>,
        data: DlmsData,
    },
    /// First block of a blocked single set; carries the descriptor.
    FirstBlock {
        invoke: InvokeIdAndPriority,
        attribute: AttributeDescriptor,
        access: Option<SelectiveAccess>,
        last_block: bool,
        block_number: u32,
        raw_data: Vec<u8>,
    },
    /// Continuation block of any blocked set.
    WithDataBlock {
        invoke: InvokeIdAndPriority,
        last_block: bool,
        block_number: u32,
        raw_data: Vec<u8>,
    },
    WithList {
        invoke: InvokeIdAndPriority,
        attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
        data: Vec<DlmsData>,
    },
    /// First block of a blocked list set; carries all descriptors.
    WithListFirstBlock {
        invoke: InvokeIdAndPriority,
        attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
        last_block: bool,
        block_number: u32,
        raw_data: Vec<u8>,
    },
}

impl SetRequest {
    pub fn invoke(&self) -> InvokeIdAndPriority {
        match self {
            SetRequest::Normal { invoke, .. }
            | SetRequest::FirstBlock { invoke, .. }
            | SetRequest::WithDataBlock { invoke, .. }
            | SetRequest::WithList { invoke, .. }
            | SetRequest::WithListFirstBlock { invoke, .. } => *invoke,
        }
    }

    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(SET_REQUEST_TAG);
        match self {
            SetRequest::Normal {
                invoke,
                attribute,
                access,
                data,
            } => {
                out.write_u8(0x01);
                out.write_u8(invoke.byte());
                attribute.encode(&mut out);
                SelectiveAccess::encode_option(access.as_ref(), &mut out)?;
                out.write_data(data)?;
            }
            SetRequest::FirstBlock {
                invoke,
                attribute,
                access,
                last_block,
                block_number,
                raw_data,
            } => {
                out.write_u8(0x02);
                out.write_u8(invoke.byte());
                attribute.encode(&mut out);
                SelectiveAccess::encode_option(access.as_ref(), &mut out)?;
                encode_block(&mut out, *last_block, *block_number, raw_data)?;
            }
            SetRequest::WithDataBlock {
                invoke,
                last_block,
                block_number,
                raw_data,
            } => {
                out.write_u8(0x03);
                out.write_u8(invoke.byte());
                encode_block(&mut out, *last_block, *block_number, raw_data)?;
            }
            SetRequest::WithList {
                invoke,
                attributes,
                data,
            } => {
                out.write_u8(0x04);
                out.write_u8(invoke.byte());
                encode_descriptor_list(&mut out, attributes)?;
                out.write_length(data.len())?;
                for value in data {
                    out.write_data(value)?;
                }
            }
            SetRequest::WithListFirstBlock {
                invoke,
                attributes,
                last_block,
                block_number,
                raw_data,
            } => {
                out.write_u8(0x05);
                out.write_u8(invoke.byte());
                encode_descriptor_list(&mut out, attributes)?;
                encode_block(&mut out, *last_block, *block_number, raw_data)?;
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != SET_REQUEST_TAG {
            return Err(CosemError::Encoding(format!(
                "expected set-request tag 0xC1, found 0x{:02X}",
                tag
            )));
        }
        let choice = decoder.read_u8()?;
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        match choice {
            0x01 => {
                let attribute = AttributeDescriptor::decode(&mut decoder)?;
                let access = SelectiveAccess::decode_option(&mut decoder)?;
                let data = decoder.read_data()?;
                Ok(SetRequest::Normal {
                    invoke,
                    attribute,
                    access,
                    data,
                })
            }
            0x02 => {
                let attribute = AttributeDescriptor::decode(&mut decoder)?;
                let access = SelectiveAccess::decode_option(&mut decoder)?;
                let (last_block, block_number, raw_data) = decode_block(&mut decoder)?;
                Ok(SetRequest::FirstBlock {
                    invoke,
                    attribute,
                    access,
                    last_block,
                    block_number,
                    raw_data,
                })
            }
            0x03 => {
                let (last_block, block_number, raw_data) = decode_block(&mut decoder)?;
                Ok(SetRequest::WithDataBlock {
                    invoke,
                    last_block,
                    block_number,
                    raw_data,
                })
            }
            0x04 => {
                let attributes = decode_descriptor_list(&mut decoder)?;
                let count = decoder.read_length()?;
                let mut data = Vec::with_capacity(count);
                for _ in 0..count {
                    data.push(decoder.read_data()?);
                }
                Ok(SetRequest::WithList {
                    invoke,
                    attributes,
                    data,
                })
            }
            0x05 => {
                let attributes = decode_descriptor_list(&mut decoder)?;
                let (last_block, block_number, raw_data) = decode_block(&mut decoder)?;
                Ok(SetRequest::WithListFirstBlock {
                    invoke,
                    attributes,
                    last_block,
                    block_number,
                    raw_data,
                })
            }
            other => Err(CosemError::Encoding(format!(
                "unknown set-request choice 0x{:02X}",
                other
            ))),
        }
    }
}

/// SET response APDU.
#[derive(Debug, Clone, PartialEq)]
pub enum SetResponse {
    Normal {
        invoke: InvokeIdAndPriority,
        access_result: u8,
    },
    /// Acknowledges one intermediate block.
    ForDataBlock {
        invoke: InvokeIdAndPriority,
        block_number: u32,
    },
    ForLastDataBlock {
        invoke: InvokeIdAndPriority,
        access_result: u8,
        block_number: u32,
    },
    ForLastDataBlockWithList {
        invoke: InvokeIdAndPriority,
        access_results: Vec<u8>,
        block_number: u32,
    },
    WithList {
        invoke: InvokeIdAndPriority,
        access_results: Vec<u8>,
    },
}

impl SetResponse {
    pub fn invoke(&self) -> InvokeIdAndPriority {
        match self {
            SetResponse::Normal { invoke, .. }
            | SetResponse::ForDataBlock { invoke, .. }
            | SetResponse::ForLastDataBlock { invoke, .. }
            | SetResponse::ForLastDataBlockWithList { invoke, .. }
            | SetResponse::WithList { invoke, .. } => *invoke,
        }
    }

    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut out = AxdrEncoder::new();
        out.write_u8(SET_RESPONSE_TAG);
        match self {
            SetResponse::Normal {
                invoke,
                access_result,
            } => {
                out.write_u8(0x01);
                out.write_u8(invoke.byte());
                out.write_u8(*access_result);
            }
            SetResponse::ForDataBlock {
                invoke,
                block_number,
            } => {
                out.write_u8(0x02);
                out.write_u8(invoke.byte());
                out.write_u32(*block_number);
            }
            SetResponse::ForLastDataBlock {
                invoke,
                access_result,
                block_number,
            } => {
                out.write_u8(0x03);
                out.write_u8(invoke.byte());
                out.write_u8(*access_result);
                out.write_u32(*block_number);
            }
            SetResponse::ForLastDataBlockWithList {
                invoke,
                access_results,
                block_number,
            } => {
                out.write_u8(0x04);
                out.write_u8(invoke.byte());
                out.write_length(access_results.len())?;
                out.write_bytes(access_results);
                out.write_u32(*block_number);
            }
            SetResponse::WithList {
                invoke,
                access_results,
            } => {
                out.write_u8(0x05);
                out.write_u8(invoke.byte());
                out.write_length(access_results.len())?;
                out.write_bytes(access_results);
            }
        }
        Ok(out.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut decoder = AxdrDecoder::new(bytes);
        let tag = decoder.read_u8()?;
        if tag != SET_RESPONSE_TAG {
            return Err(CosemError::Encoding(format!(
                "expected set-response tag 0xC5, found 0x{:02X}",
                tag
            )));
        }
        let choice = decoder.read_u8()?;
        let invoke = InvokeIdAndPriority::from_byte(decoder.read_u8()?);
        match choice {
            0x01 => Ok(SetResponse::Normal {
                invoke,
                access_result: decoder.read_u8()?,
            }),
            0x02 => Ok(SetResponse::ForDataBlock {
                invoke,
                block_number: decoder.read_u32()?,
            }),
            0x03 => Ok(SetResponse::ForLastDataBlock {
                invoke,
                access_result: decoder.read_u8()?,
                block_number: decoder.read_u32()?,
            }),
            0x04 => {
                let count = decoder.read_length()?;
                let access_results = decoder.take(count)?.to_vec();
                Ok(SetResponse::ForLastDataBlockWithList {
                    invoke,
                    access_results,
                    block_number: decoder.read_u32()?,
                })
            }
            0x05 => {
                let count = decoder.read_length()?;
                Ok(SetResponse::WithList {
                    invoke,
                    access_results: decoder.take(count)?.to_vec(),
                })
            }
            other => Err(CosemError::Encoding(format!(
                "unknown set-response choice 0x{:02X}",
                other
            ))),
        }
    }
}

fn encode_block(
    out: &mut AxdrEncoder,
    last_block: bool,
    block_number: u32,
    raw_data: &[u8],
) -> CosemResult<()> {
    out.write_u8(u8::from(last_block));
    out.write_u32(block_number);
    out.write_length(raw_data.len())?;
    out.write_bytes(raw_data);
    Ok(())
}

fn decode_block(decoder: &mut AxdrDecoder<'_>) -> CosemResult<(bool, u32, Vec<u8>)> {
    let last_block = decoder.read_u8()? != 0;
    let block_number = decoder.read_u32()?;
    let length = decoder.read_length()?;
    Ok((last_block, block_number, decoder.take(length)?.to_vec()))
}

fn encode_descriptor_list(
    out: &mut AxdrEncoder,
    attributes: &[(AttributeDescriptor, Option<SelectiveAccess>)],
) -> CosemResult<()> {
    out.write_length(attributes.len())?;
    for (attribute, access) in attributes {
        attribute.encode(out);
        SelectiveAccess::encode_option(access.as_ref(), out)?;
    }
    Ok(())
}

fn decode_descriptor_list(
    decoder: &mut AxdrDecoder<'_>,
) -> CosemResult<Vec<(AttributeDescriptor, Option<SelectiveAccess>)>> {
    let count = decoder.read_length()?;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let attribute = AttributeDescriptor::decode(decoder)?;
        let access = SelectiveAccess::decode_option(decoder)?;
        attributes.push((attribute, access));
    }
    Ok(attributes)
}
