//! APDU ciphering for security suite 5
//!
//! Ciphered APDU layout:
//! `glo-tag | A-XDR length | SC (0x30) | FC (4, big-endian) | ciphertext | tag (12)`.
//! The GCM nonce is the sender's system title followed by FC; the AAD is
//! SC followed by the authentication key.

use crate::title::SystemTitle;
use aes::Aes128;
use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit};
use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult};
use log::debug;

/// Security control byte: authentication and encryption, suite 0.
pub const SECURITY_CONTROL_AUTH_ENC: u8 = 0x30;

/// DLMS truncates the GCM tag to 12 bytes.
pub const GCM_TAG_LENGTH: usize = 12;

/// Ciphered counterpart of the cleartext `initiate-request` (tag 1).
pub const GLO_INITIATE_REQUEST: u8 = 33;
/// Ciphered counterpart of the cleartext `initiate-response` (tag 8).
pub const GLO_INITIATE_RESPONSE: u8 = 40;

/// AES-128-GCM with the DLMS 12-byte tag.
type Cipher = AesGcm<Aes128, U12, U12>;

/// Map a cleartext APDU tag to its `glo-` ciphered counterpart.
pub fn clear_to_glo(tag: u8) -> CosemResult<u8> {
    match tag {
        1 => Ok(33),
        5 => Ok(37),
        6 => Ok(38),
        8 => Ok(40),
        12 => Ok(44),
        13 => Ok(45),
        14 => Ok(46),
        22 => Ok(54),
        24 => Ok(56),
        192..=197 => Ok(tag + 8),
        199 => Ok(207),
        other => Err(CosemError::Protocol(format!(
            "APDU tag 0x{:02X} has no ciphered counterpart",
            other
        ))),
    }
}

/// Map a `glo-` ciphered tag back to its cleartext counterpart.
pub fn glo_to_clear(tag: u8) -> CosemResult<u8> {
    match tag {
        33 => Ok(1),
        37 => Ok(5),
        38 => Ok(6),
        40 => Ok(8),
        44 => Ok(12),
        45 => Ok(13),
        46 => Ok(14),
        54 => Ok(22),
        56 => Ok(24),
        200..=205 => Ok(tag - 8),
        207 => Ok(199),
        other => Err(CosemError::Protocol(format!(
            "0x{:02X} is not a ciphered APDU tag",
            other
        ))),
    }
}

/// HLS-5 key material: 16-byte encryption and authentication keys.
#[derive(Clone)]
pub struct GcmSuite {
    encryption_key: [u8; 16],
    authentication_key: [u8; 16],
}

impl GcmSuite {
    pub fn new(encryption_key: &[u8], authentication_key: &[u8]) -> CosemResult<Self> {
        if encryption_key.len() != 16 {
            return Err(CosemError::Config(format!(
                "encryption key length is {}, not 16",
                encryption_key.len()
            )));
        }
        if authentication_key.len() != 16 {
            return Err(CosemError::Config(format!(
                "authentication key length is {}, not 16",
                authentication_key.len()
            )));
        }
        let mut ek = [0u8; 16];
        ek.copy_from_slice(encryption_key);
        let mut ak = [0u8; 16];
        ak.copy_from_slice(authentication_key);
        Ok(Self {
            encryption_key: ek,
            authentication_key: ak,
        })
    }

    fn cipher(&self) -> Cipher {
        Cipher::new(GenericArray::from_slice(&self.encryption_key))
    }

    /// AAD for plain APDU ciphering: SC followed by AK.
    fn apdu_aad(&self) -> [u8; 17] {
        let mut aad = [0u8; 17];
        aad[0] = SECURITY_CONTROL_AUTH_ENC;
        aad[1..].copy_from_slice(&self.authentication_key);
        aad
    }

    /// Cipher one APDU under the sender's title and frame counter.
    pub fn encrypt_apdu(
        &self,
        title: &SystemTitle,
        frame_counter: u32,
        apdu: &[u8],
    ) -> CosemResult<Vec<u8>> {
        let clear_tag = *apdu
            .first()
            .ok_or_else(|| CosemError::Protocol("empty APDU".into()))?;
        let glo_tag = clear_to_glo(clear_tag)?;

        let nonce = title.nonce(frame_counter);
        let mut buffer = apdu.to_vec();
        let tag = self
            .cipher()
            .encrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &self.apdu_aad(),
                &mut buffer,
            )
            .map_err(|_| CosemError::Security("AES-GCM encryption failed".into()))?;

        let body_length = 1 + 4 + buffer.len() + GCM_TAG_LENGTH;
        let mut out = AxdrEncoder::new();
        out.write_u8(glo_tag);
        out.write_length(body_length)?;
        out.write_u8(SECURITY_CONTROL_AUTH_ENC);
        out.write_u32(frame_counter);
        out.write_bytes(&buffer);
        out.write_bytes(&tag);

        debug!("ciphered APDU tag 0x{:02X} under FC {}", clear_tag, frame_counter);
        Ok(out.into_bytes())
    }

    /// Decipher one APDU under the peer's title.
    ///
    /// The embedded frame counter is returned alongside the plaintext; the
    /// security layer itself does not police its ordering.
    pub fn decrypt_apdu(&self, title: &SystemTitle, pdu: &[u8]) -> CosemResult<(u32, Vec<u8>)> {
        let glo_tag = *pdu
            .first()
            .ok_or_else(|| CosemError::Framing("empty ciphered APDU".into()))?;
        glo_to_clear(glo_tag)
            .map_err(|_| CosemError::Security(format!("unexpected APDU tag 0x{:02X}", glo_tag)))?;

        let mut decoder = AxdrDecoder::new(&pdu[1..]);
        let body_length = decoder.read_length()?;
        let body = decoder.take(body_length).map_err(|_| {
            CosemError::Framing("ciphered APDU shorter than its length field".into())
        })?;
        if body.len() < 1 + 4 + GCM_TAG_LENGTH {
            return Err(CosemError::Framing("truncated ciphered APDU".into()));
        }

        let security_control = body[0];
        if security_control != SECURITY_CONTROL_AUTH_ENC {
            return Err(CosemError::Security(format!(
                "unexpected security control 0x{:02X}",
                security_control
            )));
        }
        let frame_counter = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);

        let split = body.len() - GCM_TAG_LENGTH;
        let mut buffer = body[5..split].to_vec();
        let tag = &body[split..];

        let nonce = title.nonce(frame_counter);
        self.cipher()
            .decrypt_in_place_detached(
                GenericArray::from_slice(&nonce),
                &self.apdu_aad(),
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CosemError::Authentication("unexpected authentication tag".into()))?;

        Ok((frame_counter, buffer))
    }

    /// GMAC over a challenge: the `f(StoC)`/`f(CtoS)` tag of the HLS-5
    /// exchange. AAD is SC, AK, then the challenge; the plaintext is empty.
    pub fn challenge_tag(
        &self,
        title: &SystemTitle,
        frame_counter: u32,
        challenge: &[u8],
    ) -> CosemResult<[u8; GCM_TAG_LENGTH]> {
        let mut aad = Vec::with_capacity(17 + challenge.len());
        aad.push(SECURITY_CONTROL_AUTH_ENC);
        aad.extend_from_slice(&self.authentication_key);
        aad.extend_from_slice(challenge);

        let nonce = title.nonce(frame_counter);
        let mut empty: Vec<u8> = Vec::new();
        let tag = self
            .cipher()
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), &aad, &mut empty)
            .map_err(|_| CosemError::Security("GMAC computation failed".into()))?;

        let mut out = [0u8; GCM_TAG_LENGTH];
        out.copy_from_slice(&tag);
        Ok(out)
    }
}

impl std::fmt::Debug for GcmSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("GcmSuite").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> GcmSuite {
        GcmSuite::new(&[0u8; 16], &[0u8; 16]).unwrap()
    }

    fn client_title() -> SystemTitle {
        SystemTitle::new([0x4D, 0x45, 0x4C, 0x00, 0x00, 0x00, 0x00, 0x01])
    }

    #[test]
    fn tag_map_examples() {
        assert_eq!(clear_to_glo(0x01).unwrap(), 0x21);
        assert_eq!(clear_to_glo(0xC0).unwrap(), 0xC8);
        assert_eq!(clear_to_glo(0xC5).unwrap(), 0xCD);
        assert_eq!(glo_to_clear(0x21).unwrap(), 0x01);
        assert_eq!(glo_to_clear(0xCF).unwrap(), 0xC7);
    }

    #[test]
    fn tag_map_roundtrip() {
        let mapped: Vec<u8> = (0..=u8::MAX).filter(|&t| clear_to_glo(t).is_ok()).collect();
        assert_eq!(mapped.len(), 16);
        for tag in mapped {
            assert_eq!(glo_to_clear(clear_to_glo(tag).unwrap()).unwrap(), tag);
        }
        // Unmapped tags fail in both directions.
        assert!(clear_to_glo(0x02).is_err());
        assert!(glo_to_clear(0x02).is_err());
        assert!(clear_to_glo(198).is_err());
        assert!(glo_to_clear(206).is_err());
    }

    #[test]
    fn key_lengths_are_enforced() {
        assert!(GcmSuite::new(&[0u8; 15], &[0u8; 16]).is_err());
        assert!(GcmSuite::new(&[0u8; 16], &[0u8; 17]).is_err());
    }

    #[test]
    fn ciphered_apdu_layout() {
        let apdu = [0x01, 0x00, 0x01, 0x00, 0x00, 0x28, 0x00, 0x00, 0xFF, 0x02, 0x00];
        let out = suite().encrypt_apdu(&client_title(), 1, &apdu).unwrap();

        assert_eq!(out[0], GLO_INITIATE_REQUEST);
        let body_length = 1 + 4 + apdu.len() + GCM_TAG_LENGTH;
        assert_eq!(out[1] as usize, body_length);
        assert_eq!(out[2], SECURITY_CONTROL_AUTH_ENC);
        assert_eq!(&out[3..7], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(out.len(), 2 + body_length);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let apdu = [0xC0, 0x01, 0x81, 0x00, 0x03, 0x01, 0x01, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00];
        let title = client_title();
        let ciphered = suite().encrypt_apdu(&title, 0x42, &apdu).unwrap();
        let (frame_counter, plain) = suite().decrypt_apdu(&title, &ciphered).unwrap();
        assert_eq!(frame_counter, 0x42);
        assert_eq!(plain, apdu);
    }

    #[test]
    fn tampering_is_detected() {
        let apdu = [0xC0, 0x01, 0x81];
        let title = client_title();
        let mut ciphered = suite().encrypt_apdu(&title, 9, &apdu).unwrap();
        let index = ciphered.len() - 1;
        ciphered[index] ^= 0x01;
        assert!(matches!(
            suite().decrypt_apdu(&title, &ciphered),
            Err(CosemError::Authentication(_))
        ));
    }

    #[test]
    fn wrong_security_control_is_rejected() {
        let apdu = [0xC0, 0x01, 0x81];
        let title = client_title();
        let mut ciphered = suite().encrypt_apdu(&title, 9, &apdu).unwrap();
        ciphered[2] = 0x10;
        assert!(matches!(
            suite().decrypt_apdu(&title, &ciphered),
            Err(CosemError::Security(_))
        ));
    }

    #[test]
    fn challenge_tag_matches_between_peers() {
        let title = client_title();
        let ours = suite().challenge_tag(&title, 2, b"P6wRJ21F").unwrap();
        let theirs = suite().challenge_tag(&title, 2, b"P6wRJ21F").unwrap();
        assert_eq!(ours, theirs);
        let different = suite().challenge_tag(&title, 3, b"P6wRJ21F").unwrap();
        assert_ne!(ours, different);
    }
}
