//! Wrapper session layer
//!
//! IP meters frame every APDU with an 8-byte header: protocol version 1,
//! source and destination wrapper ports, payload length, all big-endian.
//! The layer is stateless; addressing comes in with every call.

use cosem_core::{CosemError, CosemResult};
use cosem_transport::StreamAccessor;
use log::debug;

/// Wrapper header length in bytes.
pub const WRAPPER_HEADER_LENGTH: usize = 8;

const PROTOCOL_VERSION: u16 = 0x0001;

/// The wrapper header preceding every PDU on TCP/UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    pub src_wport: u16,
    pub dst_wport: u16,
    pub length: u16,
}

impl WrapperHeader {
    pub fn new(src_wport: u16, dst_wport: u16, length: u16) -> Self {
        Self {
            src_wport,
            dst_wport,
            length,
        }
    }

    /// Encode to the 8-byte big-endian wire form.
    pub fn encode(&self) -> [u8; WRAPPER_HEADER_LENGTH] {
        let mut header = [0u8; WRAPPER_HEADER_LENGTH];
        header[0..2].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        header[2..4].copy_from_slice(&self.src_wport.to_be_bytes());
        header[4..6].copy_from_slice(&self.dst_wport.to_be_bytes());
        header[6..8].copy_from_slice(&self.length.to_be_bytes());
        header
    }

    /// Decode from the wire form.
    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        if bytes.len() < WRAPPER_HEADER_LENGTH {
            return Err(CosemError::Framing(format!(
                "wrapper header too short: {} bytes",
                bytes.len()
            )));
        }
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version != PROTOCOL_VERSION {
            return Err(CosemError::Framing(format!(
                "wrapper protocol version {} not supported",
                version
            )));
        }
        Ok(Self {
            src_wport: u16::from_be_bytes([bytes[2], bytes[3]]),
            dst_wport: u16::from_be_bytes([bytes[4], bytes[5]]),
            length: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Send one PDU with its wrapper header in a single write.
pub async fn wrapper_send<S: StreamAccessor + ?Sized>(
    stream: &mut S,
    src_wport: u16,
    dst_wport: u16,
    pdu: &[u8],
) -> CosemResult<()> {
    let length = u16::try_from(pdu.len()).map_err(|_| {
        CosemError::Encoding(format!("PDU of {} bytes exceeds the wrapper limit", pdu.len()))
    })?;

    let header = WrapperHeader::new(src_wport, dst_wport, length);
    let mut wpdu = Vec::with_capacity(WRAPPER_HEADER_LENGTH + pdu.len());
    wpdu.extend_from_slice(&header.encode());
    wpdu.extend_from_slice(pdu);

    debug!("sending wrapper pdu: {:02X?}", wpdu);
    stream.write_all(&wpdu).await?;
    stream.flush().await
}

/// Receive one PDU, checking the wrapper ports when `expected` is given.
///
/// Returns the header's (src, dst) ports along with the payload.
pub async fn wrapper_receive<S: StreamAccessor + ?Sized>(
    stream: &mut S,
    expected: Option<(u16, u16)>,
) -> CosemResult<(u16, u16, Vec<u8>)> {
    let mut header_bytes = [0u8; WRAPPER_HEADER_LENGTH];
    stream.read_exact(&mut header_bytes).await?;
    let header = WrapperHeader::decode(&header_bytes)?;

    if let Some((src, dst)) = expected {
        if header.src_wport != src {
            return Err(CosemError::Framing(format!(
                "wrong source wport {}, expected {}",
                header.src_wport, src
            )));
        }
        if header.dst_wport != dst {
            return Err(CosemError::Framing(format!(
                "wrong destination wport {}, expected {}",
                header.dst_wport, dst
            )));
        }
    }

    let mut pdu = vec![0u8; header.length as usize];
    stream.read_exact(&mut pdu).await?;
    debug!("received wrapper pdu: {:02X?}", pdu);
    Ok((header.src_wport, header.dst_wport, pdu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wire_form() {
        let header = WrapperHeader::new(0x0001, 0x0011, 2);
        assert_eq!(
            header.encode(),
            [0x00, 0x01, 0x00, 0x01, 0x00, 0x11, 0x00, 0x02]
        );
        assert_eq!(WrapperHeader::decode(&header.encode()).unwrap(), header);

        // A whole frame is the header followed by exactly `length` bytes.
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x01, 0x00, 0x11, 0x00, 0x02, 0xAA, 0xBB]
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes = [0x00, 0x02, 0x00, 0x01, 0x00, 0x11, 0x00, 0x02];
        assert!(matches!(
            WrapperHeader::decode(&bytes),
            Err(CosemError::Framing(_))
        ));
    }
}
