//! COSEM object references
//!
//! An attribute or method of a COSEM object is addressed by class id,
//! 6-byte OBIS instance id and the attribute/method id. Attribute access
//! may carry a selective-access selector plus parameters.

use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemResult, DlmsData, ObisCode};

/// Selective access: selector plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectiveAccess {
    pub selector: u8,
    pub parameters: DlmsData,
}

impl SelectiveAccess {
    /// Encode the OPTIONAL access-selection field (presence byte first).
    pub fn encode_option(
        access: Option<&SelectiveAccess>,
        out: &mut AxdrEncoder,
    ) -> CosemResult<()> {
        match access {
            None => out.write_u8(0x00),
            Some(access) => {
                out.write_u8(0x01);
                out.write_u8(access.selector);
                out.write_data(&access.parameters)?;
            }
        }
        Ok(())
    }

    /// Decode the OPTIONAL access-selection field.
    pub fn decode_option(decoder: &mut AxdrDecoder<'_>) -> CosemResult<Option<SelectiveAccess>> {
        if decoder.read_u8()? == 0 {
            return Ok(None);
        }
        let selector = decoder.read_u8()?;
        let parameters = decoder.read_data()?;
        Ok(Some(SelectiveAccess {
            selector,
            parameters,
        }))
    }
}

/// Reference to one attribute of a COSEM object.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: i8,
}

impl AttributeDescriptor {
    pub fn new(class_id: u16, instance_id: ObisCode, attribute_id: i8) -> Self {
        Self {
            class_id,
            instance_id,
            attribute_id,
        }
    }

    pub fn encode(&self, out: &mut AxdrEncoder) {
        out.write_u16(self.class_id);
        out.write_bytes(self.instance_id.as_bytes());
        out.write_u8(self.attribute_id as u8);
    }

    pub fn decode(decoder: &mut AxdrDecoder<'_>) -> CosemResult<Self> {
        let class_id = decoder.read_u16()?;
        let instance_id = ObisCode::from_slice(decoder.take(6)?)?;
        let attribute_id = decoder.read_u8()? as i8;
        Ok(Self {
            class_id,
            instance_id,
            attribute_id,
        })
    }
}

/// Reference to one method of a COSEM object.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub method_id: i8,
}

impl MethodDescriptor {
    pub fn new(class_id: u16, instance_id: ObisCode, method_id: i8) -> Self {
        Self {
            class_id,
            instance_id,
            method_id,
        }
    }

    pub fn encode(&self, out: &mut AxdrEncoder) {
        out.write_u16(self.class_id);
        out.write_bytes(self.instance_id.as_bytes());
        out.write_u8(self.method_id as u8);
    }

    pub fn decode(decoder: &mut AxdrDecoder<'_>) -> CosemResult<Self> {
        let class_id = decoder.read_u16()?;
        let instance_id = ObisCode::from_slice(decoder.take(6)?)?;
        let method_id = decoder.read_u8()? as i8;
        Ok(Self {
            class_id,
            instance_id,
            method_id,
        })
    }
}
