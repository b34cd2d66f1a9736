//! A-XDR encoding and decoding
//!
//! A-XDR is the aligned transfer syntax used by xDLMS APDUs. The length
//! form here (one byte below 0x80, else 0x81/0x82 prefix) is shared by the
//! APDU bodies and by the ciphered `glo-*` envelopes.

use cosem_core::{CosemError, CosemResult, DlmsData};

// COSEM Data choice tags.
const TAG_NULL: u8 = 0;
const TAG_ARRAY: u8 = 1;
const TAG_STRUCTURE: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_BIT_STRING: u8 = 4;
const TAG_DOUBLE_LONG: u8 = 5;
const TAG_DOUBLE_LONG_UNSIGNED: u8 = 6;
const TAG_OCTET_STRING: u8 = 9;
const TAG_VISIBLE_STRING: u8 = 10;
const TAG_INTEGER: u8 = 15;
const TAG_LONG: u8 = 16;
const TAG_UNSIGNED: u8 = 17;
const TAG_LONG_UNSIGNED: u8 = 18;
const TAG_LONG64: u8 = 20;
const TAG_LONG64_UNSIGNED: u8 = 21;
const TAG_ENUM: u8 = 22;

/// A-XDR byte writer.
#[derive(Debug, Default)]
pub struct AxdrEncoder {
    buffer: Vec<u8>,
}

impl AxdrEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a variable length field.
    pub fn write_length(&mut self, length: usize) -> CosemResult<()> {
        match length {
            0..=0x7F => self.buffer.push(length as u8),
            0x80..=0xFF => {
                self.buffer.push(0x81);
                self.buffer.push(length as u8);
            }
            0x100..=0xFFFF => {
                self.buffer.push(0x82);
                self.buffer.extend_from_slice(&(length as u16).to_be_bytes());
            }
            _ => {
                return Err(CosemError::Encoding(format!(
                    "length {} exceeds the A-XDR two-byte form",
                    length
                )))
            }
        }
        Ok(())
    }

    /// Write a COSEM data value as a tagged Data choice.
    pub fn write_data(&mut self, data: &DlmsData) -> CosemResult<()> {
        match data {
            DlmsData::Null => self.buffer.push(TAG_NULL),
            DlmsData::Boolean(v) => {
                self.buffer.push(TAG_BOOLEAN);
                self.buffer.push(u8::from(*v));
            }
            DlmsData::BitString(bytes, bits) => {
                let capacity = bytes.len() * 8;
                if *bits > capacity {
                    return Err(CosemError::Encoding(format!(
                        "bit-string claims {} bits in {} bytes",
                        bits,
                        bytes.len()
                    )));
                }
                self.buffer.push(TAG_BIT_STRING);
                self.write_length(*bits)?;
                self.buffer.extend_from_slice(bytes);
            }
            DlmsData::Integer8(v) => {
                self.buffer.push(TAG_INTEGER);
                self.buffer.push(*v as u8);
            }
            DlmsData::Integer16(v) => {
                self.buffer.push(TAG_LONG);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::Integer32(v) => {
                self.buffer.push(TAG_DOUBLE_LONG);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::Integer64(v) => {
                self.buffer.push(TAG_LONG64);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::Unsigned8(v) => {
                self.buffer.push(TAG_UNSIGNED);
                self.buffer.push(*v);
            }
            DlmsData::Unsigned16(v) => {
                self.buffer.push(TAG_LONG_UNSIGNED);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::Unsigned32(v) => {
                self.buffer.push(TAG_DOUBLE_LONG_UNSIGNED);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::Unsigned64(v) => {
                self.buffer.push(TAG_LONG64_UNSIGNED);
                self.buffer.extend_from_slice(&v.to_be_bytes());
            }
            DlmsData::OctetString(bytes) => {
                self.buffer.push(TAG_OCTET_STRING);
                self.write_length(bytes.len())?;
                self.buffer.extend_from_slice(bytes);
            }
            DlmsData::VisibleString(bytes) => {
                self.buffer.push(TAG_VISIBLE_STRING);
                self.write_length(bytes.len())?;
                self.buffer.extend_from_slice(bytes);
            }
            DlmsData::Enumerate(v) => {
                self.buffer.push(TAG_ENUM);
                self.buffer.push(*v);
            }
            DlmsData::Array(items) => {
                self.buffer.push(TAG_ARRAY);
                self.write_length(items.len())?;
                for item in items {
                    self.write_data(item)?;
                }
            }
            DlmsData::Structure(fields) => {
                self.buffer.push(TAG_STRUCTURE);
                self.write_length(fields.len())?;
                for field in fields {
                    self.write_data(field)?;
                }
            }
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// A-XDR byte reader over a borrowed buffer.
#[derive(Debug)]
pub struct AxdrDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> AxdrDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.position..]
    }

    pub fn read_u8(&mut self) -> CosemResult<u8> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> CosemResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> CosemResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume exactly `count` bytes.
    pub fn take(&mut self, count: usize) -> CosemResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(CosemError::Encoding(format!(
                "truncated A-XDR input: wanted {} bytes, {} left",
                count,
                self.remaining()
            )));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read a variable length field.
    pub fn read_length(&mut self) -> CosemResult<usize> {
        let first = self.read_u8()?;
        match first {
            0..=0x7F => Ok(first as usize),
            0x81 => Ok(self.read_u8()? as usize),
            0x82 => Ok(self.read_u16()? as usize),
            other => Err(CosemError::Encoding(format!(
                "unsupported A-XDR length form 0x{:02X}",
                other
            ))),
        }
    }

    /// Read a tagged COSEM data value.
    pub fn read_data(&mut self) -> CosemResult<DlmsData> {
        let tag = self.read_u8()?;
        match tag {
            TAG_NULL => Ok(DlmsData::Null),
            TAG_BOOLEAN => Ok(DlmsData::Boolean(self.read_u8()? != 0)),
            TAG_BIT_STRING => {
                let bits = self.read_length()?;
                let bytes = self.take(bits.div_ceil(8))?;
                Ok(DlmsData::BitString(bytes.to_vec(), bits))
            }
            TAG_INTEGER => Ok(DlmsData::Integer8(self.read_u8()? as i8)),
            TAG_LONG => Ok(DlmsData::Integer16(self.read_u16()? as i16)),
            TAG_DOUBLE_LONG => Ok(DlmsData::Integer32(self.read_u32()? as i32)),
            TAG_LONG64 => {
                let bytes = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(DlmsData::Integer64(i64::from_be_bytes(buf)))
            }
            TAG_UNSIGNED => Ok(DlmsData::Unsigned8(self.read_u8()?)),
            TAG_LONG_UNSIGNED => Ok(DlmsData::Unsigned16(self.read_u16()?)),
            TAG_DOUBLE_LONG_UNSIGNED => Ok(DlmsData::Unsigned32(self.read_u32()?)),
            TAG_LONG64_UNSIGNED => {
                let bytes = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(DlmsData::Unsigned64(u64::from_be_bytes(buf)))
            }
            TAG_OCTET_STRING => {
                let length = self.read_length()?;
                Ok(DlmsData::OctetString(self.take(length)?.to_vec()))
            }
            TAG_VISIBLE_STRING => {
                let length = self.read_length()?;
                Ok(DlmsData::VisibleString(self.take(length)?.to_vec()))
            }
            TAG_ENUM => Ok(DlmsData::Enumerate(self.read_u8()?)),
            TAG_ARRAY => {
                let count = self.read_length()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_data()?);
                }
                Ok(DlmsData::Array(items))
            }
            TAG_STRUCTURE => {
                let count = self.read_length()?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(self.read_data()?);
                }
                Ok(DlmsData::Structure(fields))
            }
            other => Err(CosemError::Encoding(format!(
                "unknown COSEM data tag {}",
                other
            ))),
        }
    }
}
