//! HDLC frame codec
//!
//! Frame layout between the 0x7E flags:
//! `format(2) | destination | source | control | [HCS(2) | information] | FCS(2)`.
//! The format field carries 0xA in the top nibble, the segmentation bit and
//! an 11-bit frame length. HCS covers the header, FCS the whole frame.

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::fcs::{checksum, Fcs};
use cosem_core::{CosemError, CosemResult};

/// Frame delimiter flag.
pub const FLAG: u8 = 0x7E;

/// LLC prefix of a client-to-server information field.
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];
/// LLC prefix of a server-to-client information field.
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

const FORMAT_TYPE: u8 = 0xA0;
const SEGMENT_BIT: u8 = 0x08;
const POLL_FINAL_BIT: u8 = 0x10;

/// Decoded control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Numbered information frame carrying N(S) and N(R).
    Information { send_seq: u8, recv_seq: u8 },
    ReceiveReady { recv_seq: u8 },
    ReceiveNotReady { recv_seq: u8 },
    Reject { recv_seq: u8 },
    SetNormalResponseMode,
    Disconnect,
    UnnumberedAcknowledge,
    DisconnectedMode,
    FrameReject,
}

impl FrameType {
    /// Decode a control byte; the poll/final bit is returned separately.
    pub fn from_control(control: u8) -> CosemResult<(Self, bool)> {
        let poll_final = control & POLL_FINAL_BIT != 0;
        let frame_type = if control & 0x01 == 0 {
            FrameType::Information {
                send_seq: (control >> 1) & 0x07,
                recv_seq: (control >> 5) & 0x07,
            }
        } else {
            match control & 0x0F {
                0x01 => FrameType::ReceiveReady {
                    recv_seq: (control >> 5) & 0x07,
                },
                0x05 => FrameType::ReceiveNotReady {
                    recv_seq: (control >> 5) & 0x07,
                },
                0x09 => FrameType::Reject {
                    recv_seq: (control >> 5) & 0x07,
                },
                _ => match control & !POLL_FINAL_BIT {
                    0x83 => FrameType::SetNormalResponseMode,
                    0x43 => FrameType::Disconnect,
                    0x63 => FrameType::UnnumberedAcknowledge,
                    0x0F => FrameType::DisconnectedMode,
                    0x87 => FrameType::FrameReject,
                    _ => {
                        return Err(CosemError::Framing(format!(
                            "unknown HDLC control byte 0x{:02X}",
                            control
                        )))
                    }
                },
            }
        };
        Ok((frame_type, poll_final))
    }

    /// Encode to a control byte with the given poll/final bit.
    pub fn to_control(self, poll_final: bool) -> u8 {
        let base = match self {
            FrameType::Information { send_seq, recv_seq } => (send_seq << 1) | (recv_seq << 5),
            FrameType::ReceiveReady { recv_seq } => 0x01 | (recv_seq << 5),
            FrameType::ReceiveNotReady { recv_seq } => 0x05 | (recv_seq << 5),
            FrameType::Reject { recv_seq } => 0x09 | (recv_seq << 5),
            FrameType::SetNormalResponseMode => 0x83,
            FrameType::Disconnect => 0x43,
            FrameType::UnnumberedAcknowledge => 0x63,
            FrameType::DisconnectedMode => 0x0F,
            FrameType::FrameReject => 0x87,
        };
        if poll_final {
            base | POLL_FINAL_BIT
        } else {
            base
        }
    }
}

/// One HDLC frame, without the surrounding flags.
#[derive(Debug, Clone, PartialEq)]
pub struct HdlcFrame {
    pub destination: HdlcAddress,
    pub source: HdlcAddress,
    pub frame_type: FrameType,
    pub poll_final: bool,
    pub segmented: bool,
    pub information: Vec<u8>,
}

impl HdlcFrame {
    pub fn new(
        destination: HdlcAddress,
        source: HdlcAddress,
        frame_type: FrameType,
        poll_final: bool,
    ) -> Self {
        Self {
            destination,
            source,
            frame_type,
            poll_final,
            segmented: false,
            information: Vec::new(),
        }
    }

    pub fn with_information(mut self, information: Vec<u8>, segmented: bool) -> Self {
        self.information = information;
        self.segmented = segmented;
        self
    }

    /// Encode the frame body (flags are added by the writer).
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let destination = self.destination.encode();
        let source = self.source.encode();

        let header_length = 2 + destination.len() + source.len() + 1;
        let length = if self.information.is_empty() {
            header_length + 2
        } else {
            header_length + 2 + self.information.len() + 2
        };
        if length > 0x07FF {
            return Err(CosemError::Framing(format!(
                "HDLC frame of {} bytes exceeds the 11-bit length field",
                length
            )));
        }

        let mut bytes = Vec::with_capacity(length);
        let mut format = FORMAT_TYPE | ((length >> 8) as u8 & 0x07);
        if self.segmented {
            format |= SEGMENT_BIT;
        }
        bytes.push(format);
        bytes.push((length & 0xFF) as u8);
        bytes.extend_from_slice(&destination);
        bytes.extend_from_slice(&source);
        bytes.push(self.frame_type.to_control(self.poll_final));

        if self.information.is_empty() {
            let fcs = checksum(&bytes);
            bytes.extend_from_slice(&fcs);
        } else {
            let hcs = checksum(&bytes);
            bytes.extend_from_slice(&hcs);
            bytes.extend_from_slice(&self.information);
            let fcs = checksum(&bytes);
            bytes.extend_from_slice(&fcs);
        }

        debug_assert_eq!(bytes.len(), length);
        Ok(bytes)
    }

    /// Decode a frame body (without flags).
    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        if bytes.len() < 6 {
            return Err(CosemError::Framing(format!(
                "HDLC frame too short: {} bytes",
                bytes.len()
            )));
        }

        let format = bytes[0];
        if format & 0xF0 != FORMAT_TYPE {
            return Err(CosemError::Framing(format!(
                "illegal HDLC frame format 0x{:02X}",
                format
            )));
        }
        let segmented = format & SEGMENT_BIT != 0;
        let length = usize::from(format & 0x07) << 8 | usize::from(bytes[1]);
        if length != bytes.len() {
            return Err(CosemError::Framing(format!(
                "HDLC length field says {} bytes, frame has {}",
                length,
                bytes.len()
            )));
        }

        let mut position = 2;
        let (destination, used) = HdlcAddress::take(&bytes[position..])?;
        position += used;
        let (source, used) = HdlcAddress::take(&bytes[position..])?;
        position += used;

        if position >= bytes.len() {
            return Err(CosemError::Framing("HDLC frame lost its control field".into()));
        }
        let control = bytes[position];
        position += 1;
        let (frame_type, poll_final) = FrameType::from_control(control)?;

        let remaining = bytes.len() - position;
        let information = if remaining > 2 {
            // Header checksum, then information, then frame checksum.
            let mut hcs = Fcs::new();
            hcs.update(&bytes[..position + 2]);
            if !hcs.is_good() {
                return Err(CosemError::Framing("HDLC header checksum failed".into()));
            }
            let mut fcs = Fcs::new();
            fcs.update(bytes);
            if !fcs.is_good() {
                return Err(CosemError::Framing("HDLC frame checksum failed".into()));
            }
            bytes[position + 2..bytes.len() - 2].to_vec()
        } else {
            let mut fcs = Fcs::new();
            fcs.update(bytes);
            if !fcs.is_good() {
                return Err(CosemError::Framing("HDLC frame checksum failed".into()));
            }
            Vec::new()
        };

        Ok(Self {
            destination,
            source,
            frame_type,
            poll_final,
            segmented,
            information,
        })
    }
}

/// Link parameters carried in the SNRM/UA negotiation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcParameters {
    pub max_information_field_length_tx: u16,
    pub max_information_field_length_rx: u16,
    pub window_size_tx: u8,
    pub window_size_rx: u8,
}

impl Default for HdlcParameters {
    fn default() -> Self {
        Self {
            max_information_field_length_tx: 128,
            max_information_field_length_rx: 128,
            window_size_tx: 1,
            window_size_rx: 1,
        }
    }
}

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;
const PARAM_MAX_INFO_TX: u8 = 0x05;
const PARAM_MAX_INFO_RX: u8 = 0x06;
const PARAM_WINDOW_TX: u8 = 0x07;
const PARAM_WINDOW_RX: u8 = 0x08;

impl HdlcParameters {
    /// Encode as the SNRM/UA negotiation information field.
    pub fn encode(&self) -> Vec<u8> {
        fn push_param(out: &mut Vec<u8>, id: u8, value: u32) {
            out.push(id);
            if value <= 0xFF {
                out.push(1);
                out.push(value as u8);
            } else {
                out.push(2);
                out.extend_from_slice(&(value as u16).to_be_bytes());
            }
        }

        let mut group = Vec::new();
        push_param(&mut group, PARAM_MAX_INFO_TX, u32::from(self.max_information_field_length_tx));
        push_param(&mut group, PARAM_MAX_INFO_RX, u32::from(self.max_information_field_length_rx));
        push_param(&mut group, PARAM_WINDOW_TX, u32::from(self.window_size_tx));
        push_param(&mut group, PARAM_WINDOW_RX, u32::from(self.window_size_rx));

        let mut out = vec![FORMAT_IDENTIFIER, GROUP_IDENTIFIER, group.len() as u8];
        out.extend_from_slice(&group);
        out
    }

    /// Decode a negotiation payload; an empty payload keeps the defaults.
    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut params = HdlcParameters::default();
        if bytes.is_empty() {
            return Ok(params);
        }
        if bytes.len() < 3 || bytes[0] != FORMAT_IDENTIFIER || bytes[1] != GROUP_IDENTIFIER {
            return Err(CosemError::Framing(
                "malformed HDLC parameter negotiation field".into(),
            ));
        }
        let group_length = usize::from(bytes[2]);
        if bytes.len() < 3 + group_length {
            return Err(CosemError::Framing(
                "truncated HDLC parameter negotiation field".into(),
            ));
        }

        let mut rest = &bytes[3..3 + group_length];
        while rest.len() >= 2 {
            let id = rest[0];
            let length = usize::from(rest[1]);
            if rest.len() < 2 + length {
                return Err(CosemError::Framing(
                    "truncated HDLC negotiation parameter".into(),
                ));
            }
            let mut value: u32 = 0;
            for &byte in &rest[2..2 + length] {
                value = (value << 8) | u32::from(byte);
            }
            match id {
                PARAM_MAX_INFO_TX => params.max_information_field_length_tx = value as u16,
                PARAM_MAX_INFO_RX => params.max_information_field_length_rx = value as u16,
                PARAM_WINDOW_TX => params.window_size_tx = value as u8,
                PARAM_WINDOW_RX => params.window_size_rx = value as u8,
                _ => {}
            }
            rest = &rest[2 + length..];
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses() -> (HdlcAddress, HdlcAddress) {
        (
            HdlcAddress::server(1, None, None).unwrap(),
            HdlcAddress::client(1).unwrap(),
        )
    }

    #[test]
    fn control_byte_roundtrip() {
        let cases = [
            FrameType::Information {
                send_seq: 3,
                recv_seq: 5,
            },
            FrameType::ReceiveReady { recv_seq: 7 },
            FrameType::Reject { recv_seq: 2 },
            FrameType::SetNormalResponseMode,
            FrameType::Disconnect,
            FrameType::UnnumberedAcknowledge,
            FrameType::DisconnectedMode,
        ];
        for case in cases {
            for poll_final in [false, true] {
                let control = case.to_control(poll_final);
                assert_eq!(FrameType::from_control(control).unwrap(), (case, poll_final));
            }
        }
    }

    #[test]
    fn snrm_roundtrip() {
        let (server, client) = addresses();
        let frame = HdlcFrame::new(server, client, FrameType::SetNormalResponseMode, true)
            .with_information(HdlcParameters::default().encode(), false);
        let bytes = frame.encode().unwrap();
        assert_eq!(HdlcFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn information_frame_roundtrip() {
        let (server, client) = addresses();
        let frame = HdlcFrame::new(
            server,
            client,
            FrameType::Information {
                send_seq: 2,
                recv_seq: 4,
            },
            true,
        )
        .with_information(vec![0xE6, 0xE6, 0x00, 0xC0, 0x01, 0x81], true);
        let bytes = frame.encode().unwrap();
        let decoded = HdlcFrame::decode(&bytes).unwrap();
        assert!(decoded.segmented);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn corrupted_information_fails_fcs() {
        let (server, client) = addresses();
        let frame = HdlcFrame::new(server, client, FrameType::ReceiveReady { recv_seq: 1 }, true);
        let mut bytes = frame.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            HdlcFrame::decode(&bytes),
            Err(CosemError::Framing(_))
        ));
    }

    #[test]
    fn negotiation_payload_roundtrip() {
        let params = HdlcParameters {
            max_information_field_length_tx: 1024,
            max_information_field_length_rx: 256,
            window_size_tx: 1,
            window_size_rx: 3,
        };
        let bytes = params.encode();
        assert_eq!(HdlcParameters::decode(&bytes).unwrap(), params);
        assert_eq!(
            HdlcParameters::decode(&[]).unwrap(),
            HdlcParameters::default()
        );
    }
}
