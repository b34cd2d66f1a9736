//! ACSE association PDUs
//!
//! AARQ and AARE carry the fields DLMS clients actually use: application
//! context, AP titles (system titles), ACSE requirements, authentication
//! mechanism and value, and the xDLMS initiate PDU as user-information.
//! Fields are BER TLVs with context-specific tags.

use crate::ber::{decode_integer, decode_oid, encode_integer, encode_oid, BerDecoder, BerEncoder};
use cosem_core::{CosemError, CosemResult};

const TAG_AARQ: u8 = 0x60;
const TAG_AARE: u8 = 0x61;
const TAG_OID: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_INTEGER: u8 = 0x02;

// Context-specific field tags inside AARQ.
const AARQ_APPLICATION_CONTEXT: u8 = 0xA1;
const AARQ_CALLING_AP_TITLE: u8 = 0xA6;
const AARQ_SENDER_ACSE_REQUIREMENTS: u8 = 0x8A;
const AARQ_MECHANISM_NAME: u8 = 0x8B;
const AARQ_CALLING_AUTH_VALUE: u8 = 0xAC;
const AARQ_USER_INFORMATION: u8 = 0xBE;

// Context-specific field tags inside AARE.
const AARE_APPLICATION_CONTEXT: u8 = 0xA1;
const AARE_RESULT: u8 = 0xA2;
const AARE_SOURCE_DIAGNOSTIC: u8 = 0xA3;
const AARE_RESPONDING_AP_TITLE: u8 = 0xA4;
const AARE_RESPONDER_ACSE_REQUIREMENTS: u8 = 0x88;
const AARE_MECHANISM_NAME: u8 = 0x89;
const AARE_RESPONDING_AUTH_VALUE: u8 = 0xAA;
const AARE_USER_INFORMATION: u8 = 0xBE;

// Authentication-value is a CHOICE; charstring is alternative [0].
const AUTH_VALUE_CHARSTRING: u8 = 0x80;

/// Association request, client to server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AarqApdu {
    pub application_context_name: Vec<u32>,
    /// Client system title.
    pub calling_ap_title: Option<Vec<u8>>,
    /// Bit 0 set selects the authentication functional unit.
    pub sender_acse_requirements: bool,
    pub mechanism_name: Option<Vec<u32>>,
    /// Client-to-server challenge or password (GraphicString choice).
    pub calling_authentication_value: Option<Vec<u8>>,
    /// xDLMS initiate-request, possibly glo-ciphered.
    pub user_information: Option<Vec<u8>>,
}

impl AarqApdu {
    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut fields = BerEncoder::new();

        let mut context = BerEncoder::new();
        context.write_tlv(TAG_OID, &encode_oid(&self.application_context_name)?)?;
        fields.write_tlv(AARQ_APPLICATION_CONTEXT, &context.into_bytes())?;

        if let Some(ref title) = self.calling_ap_title {
            let mut inner = BerEncoder::new();
            inner.write_tlv(TAG_OCTET_STRING, title)?;
            fields.write_tlv(AARQ_CALLING_AP_TITLE, &inner.into_bytes())?;
        }

        if self.sender_acse_requirements {
            // BIT STRING with the single authentication bit set.
            fields.write_tlv(AARQ_SENDER_ACSE_REQUIREMENTS, &[0x07, 0x80])?;
        }

        if let Some(ref mechanism) = self.mechanism_name {
            fields.write_tlv(AARQ_MECHANISM_NAME, &encode_oid(mechanism)?)?;
        }

        if let Some(ref value) = self.calling_authentication_value {
            let mut inner = BerEncoder::new();
            inner.write_tlv(AUTH_VALUE_CHARSTRING, value)?;
            fields.write_tlv(AARQ_CALLING_AUTH_VALUE, &inner.into_bytes())?;
        }

        if let Some(ref info) = self.user_information {
            let mut inner = BerEncoder::new();
            inner.write_tlv(TAG_OCTET_STRING, info)?;
            fields.write_tlv(AARQ_USER_INFORMATION, &inner.into_bytes())?;
        }

        let mut apdu = BerEncoder::new();
        apdu.write_tlv(TAG_AARQ, &fields.into_bytes())?;
        Ok(apdu.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut outer = BerDecoder::new(bytes);
        let contents = outer.expect_tlv(TAG_AARQ)?;
        let mut fields = BerDecoder::new(contents);
        let mut aarq = AarqApdu::default();

        while fields.has_remaining() {
            let (tag, value) = fields.read_tlv()?;
            match tag {
                AARQ_APPLICATION_CONTEXT => {
                    let mut inner = BerDecoder::new(value);
                    aarq.application_context_name = decode_oid(inner.expect_tlv(TAG_OID)?)?;
                }
                AARQ_CALLING_AP_TITLE => {
                    let mut inner = BerDecoder::new(value);
                    aarq.calling_ap_title = Some(inner.expect_tlv(TAG_OCTET_STRING)?.to_vec());
                }
                AARQ_SENDER_ACSE_REQUIREMENTS => {
                    aarq.sender_acse_requirements =
                        value.len() >= 2 && value[1] & 0x80 != 0;
                }
                AARQ_MECHANISM_NAME => {
                    aarq.mechanism_name = Some(decode_oid(value)?);
                }
                AARQ_CALLING_AUTH_VALUE => {
                    let mut inner = BerDecoder::new(value);
                    aarq.calling_authentication_value =
                        Some(inner.expect_tlv(AUTH_VALUE_CHARSTRING)?.to_vec());
                }
                AARQ_USER_INFORMATION => {
                    let mut inner = BerDecoder::new(value);
                    aarq.user_information = Some(inner.expect_tlv(TAG_OCTET_STRING)?.to_vec());
                }
                // Fields this client never sends (invocation ids, qualifiers)
                // are skipped, not rejected.
                _ => {}
            }
        }

        if aarq.application_context_name.is_empty() {
            return Err(CosemError::Encoding(
                "AARQ is missing the application context name".into(),
            ));
        }
        Ok(aarq)
    }
}

/// `result-source-diagnostic` of an AARE.
///
/// `tag` 1 is acse-service-user, 2 is acse-service-provider; `value` is the
/// diagnostic code (14 = authentication-required).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceDiagnostic {
    pub tag: u8,
    pub value: i64,
}

/// Association response, server to client.
#[derive(Debug, Clone, PartialEq)]
pub struct AareApdu {
    pub application_context_name: Vec<u32>,
    pub result: u8,
    pub result_source_diagnostic: SourceDiagnostic,
    /// Server system title.
    pub responding_ap_title: Option<Vec<u8>>,
    pub mechanism_name: Option<Vec<u32>>,
    /// Server-to-client challenge (GraphicString choice).
    pub responding_authentication_value: Option<Vec<u8>>,
    /// xDLMS initiate-response, possibly glo-ciphered.
    pub user_information: Option<Vec<u8>>,
}

impl AareApdu {
    pub fn decode(bytes: &[u8]) -> CosemResult<Self> {
        let mut outer = BerDecoder::new(bytes);
        let contents = outer.expect_tlv(TAG_AARE)?;
        let mut fields = BerDecoder::new(contents);

        let mut application_context_name = Vec::new();
        let mut result = None;
        let mut diagnostic = None;
        let mut responding_ap_title = None;
        let mut mechanism_name = None;
        let mut responding_authentication_value = None;
        let mut user_information = None;

        while fields.has_remaining() {
            let (tag, value) = fields.read_tlv()?;
            match tag {
                AARE_APPLICATION_CONTEXT => {
                    let mut inner = BerDecoder::new(value);
                    application_context_name = decode_oid(inner.expect_tlv(TAG_OID)?)?;
                }
                AARE_RESULT => {
                    let mut inner = BerDecoder::new(value);
                    result = Some(decode_integer(inner.expect_tlv(TAG_INTEGER)?)? as u8);
                }
                AARE_SOURCE_DIAGNOSTIC => {
                    let mut inner = BerDecoder::new(value);
                    let (choice_tag, choice_value) = inner.read_tlv()?;
                    let mut nested = BerDecoder::new(choice_value);
                    diagnostic = Some(SourceDiagnostic {
                        tag: choice_tag & 0x0F,
                        value: decode_integer(nested.expect_tlv(TAG_INTEGER)?)?,
                    });
                }
                AARE_RESPONDING_AP_TITLE => {
                    let mut inner = BerDecoder::new(value);
                    responding_ap_title = Some(inner.expect_tlv(TAG_OCTET_STRING)?.to_vec());
                }
                AARE_RESPONDER_ACSE_REQUIREMENTS => {}
                AARE_MECHANISM_NAME => {
                    mechanism_name = Some(decode_oid(value)?);
                }
                AARE_RESPONDING_AUTH_VALUE => {
                    let mut inner = BerDecoder::new(value);
                    responding_authentication_value =
                        Some(inner.expect_tlv(AUTH_VALUE_CHARSTRING)?.to_vec());
                }
                AARE_USER_INFORMATION => {
                    let mut inner = BerDecoder::new(value);
                    user_information = Some(inner.expect_tlv(TAG_OCTET_STRING)?.to_vec());
                }
                _ => {}
            }
        }

        Ok(Self {
            application_context_name,
            result: result
                .ok_or_else(|| CosemError::Encoding("AARE is missing the result field".into()))?,
            result_source_diagnostic: diagnostic.ok_or_else(|| {
                CosemError::Encoding("AARE is missing the source diagnostic".into())
            })?,
            responding_ap_title,
            mechanism_name,
            responding_authentication_value,
            user_information,
        })
    }

    pub fn encode(&self) -> CosemResult<Vec<u8>> {
        let mut fields = BerEncoder::new();

        let mut context = BerEncoder::new();
        context.write_tlv(TAG_OID, &encode_oid(&self.application_context_name)?)?;
        fields.write_tlv(AARE_APPLICATION_CONTEXT, &context.into_bytes())?;

        let mut result = BerEncoder::new();
        result.write_tlv(TAG_INTEGER, &encode_integer(i64::from(self.result)))?;
        fields.write_tlv(AARE_RESULT, &result.into_bytes())?;

        let mut nested = BerEncoder::new();
        nested.write_tlv(
            TAG_INTEGER,
            &encode_integer(self.result_source_diagnostic.value),
        )?;
        let mut choice = BerEncoder::new();
        choice.write_tlv(
            0xA0 | self.result_source_diagnostic.tag,
            &nested.into_bytes(),
        )?;
        fields.write_tlv(AARE_SOURCE_DIAGNOSTIC, &choice.into_bytes())?;

        if let Some(ref title) = self.responding_ap_title {
            let mut inner = BerEncoder::new();
            inner.write_tlv(TAG_OCTET_STRING, title)?;
            fields.write_tlv(AARE_RESPONDING_AP_TITLE, &inner.into_bytes())?;
        }

        if let Some(ref mechanism) = self.mechanism_name {
            fields.write_tlv(AARE_MECHANISM_NAME, &encode_oid(mechanism)?)?;
        }

        if let Some(ref value) = self.responding_authentication_value {
            let mut inner = BerEncoder::new();
            inner.write_tlv(AUTH_VALUE_CHARSTRING, value)?;
            fields.write_tlv(AARE_RESPONDING_AUTH_VALUE, &inner.into_bytes())?;
        }

        if let Some(ref info) = self.user_information {
            let mut inner = BerEncoder::new();
            inner.write_tlv(TAG_OCTET_STRING, info)?;
            fields.write_tlv(AARE_USER_INFORMATION, &inner.into_bytes())?;
        }

        let mut apdu = BerEncoder::new();
        apdu.write_tlv(TAG_AARE, &fields.into_bytes())?;
        Ok(apdu.into_bytes())
    }
}
