//! ACSE association establishment
//!
//! AARQ/AARE over the already-connected transport. Three levels: no
//! authentication, password (low level security), and HLS-5 where the
//! initiate PDUs travel glo-ciphered and both sides prove possession of
//! the keys by exchanging GMAC tags over each other's challenges.

use crate::app::AppConnection;
use crate::connection::DlmsConnection;
use cosem_asn1::{AareApdu, AarqApdu};
use cosem_application::{InitiateRequest, InitiateResponse, MethodDescriptor};
use cosem_core::{CosemError, CosemResult, DlmsData, ObisCode};
use cosem_security::constants::{CONTEXT_LN_CIPHER, CONTEXT_LN_NO_CIPHER};
use cosem_security::{
    AuthenticationMechanism, FrameCounter, GcmSuite, SystemTitle, GCM_TAG_LENGTH,
    GLO_INITIATE_RESPONSE, SECURITY_CONTROL_AUTH_ENC,
};
use log::debug;
use rand::RngCore;

/// Class and instance of the "current association" object; its method 1
/// (`reply_to_hls_authentication`) carries the HLS challenge tags.
const ASSOCIATION_LN_CLASS: u16 = 15;
const ASSOCIATION_LN_METHOD: i8 = 1;

fn association_ln_instance() -> ObisCode {
    ObisCode::new(0, 0, 40, 0, 0, 255)
}

/// Generate a printable challenge of the given length (8..=64 bytes).
pub fn generate_challenge(length: usize) -> CosemResult<Vec<u8>> {
    if !(8..=64).contains(&length) {
        return Err(CosemError::Config(format!(
            "challenge length {} outside 8..=64",
            length
        )));
    }
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    // GraphicString wants printable ASCII.
    for byte in &mut bytes {
        *byte = b'!' + *byte % 94;
    }
    Ok(bytes)
}

/// Parameters of an HLS-5 (GMAC) association.
#[derive(Debug, Clone)]
pub struct Hls5Settings {
    /// 16-byte authentication key.
    pub authentication_key: Vec<u8>,
    /// 16-byte global unicast encryption key.
    pub encryption_key: Vec<u8>,
    /// Application context; ciphered logical-name by default.
    pub application_context_name: Vec<u32>,
    pub client_system_title: [u8; 8],
    /// Client-to-server challenge, at least 8 bytes.
    pub client_to_server_challenge: Vec<u8>,
    pub initiate_request: InitiateRequest,
    /// Frame counter seed; the first ciphered APDU uses seed + 1.
    pub initial_frame_counter: u32,
}

impl Hls5Settings {
    pub fn new(
        authentication_key: Vec<u8>,
        encryption_key: Vec<u8>,
        client_system_title: [u8; 8],
        client_to_server_challenge: Vec<u8>,
    ) -> Self {
        Self {
            authentication_key,
            encryption_key,
            application_context_name: CONTEXT_LN_CIPHER.to_vec(),
            client_system_title,
            client_to_server_challenge,
            initiate_request: InitiateRequest::default(),
            initial_frame_counter: 0,
        }
    }
}

impl DlmsConnection {
    async fn associate(
        &self,
        client_address: u16,
        logical_device: u16,
        aarq: &AarqApdu,
    ) -> CosemResult<AareApdu> {
        let reply = self
            .request(client_address, logical_device, &aarq.encode()?)
            .await?;
        AareApdu::decode(&reply)
    }

    /// Associate without authentication.
    pub async fn app_connect_lowest_level(
        &self,
        client_address: u16,
        logical_device: u16,
    ) -> CosemResult<AppConnection> {
        let aarq = AarqApdu {
            application_context_name: CONTEXT_LN_NO_CIPHER.to_vec(),
            user_information: Some(InitiateRequest::default().encode()?),
            ..AarqApdu::default()
        };
        let aare = self.associate(client_address, logical_device, &aarq).await?;
        ensure_accepted(&aare)?;
        debug!("application connected without authentication");
        Ok(AppConnection::new(
            self.clone(),
            client_address,
            logical_device,
        ))
    }

    /// Associate with password authentication (low level security).
    pub async fn app_connect_low_level(
        &self,
        client_address: u16,
        logical_device: u16,
        password: &[u8],
    ) -> CosemResult<AppConnection> {
        let aarq = AarqApdu {
            application_context_name: CONTEXT_LN_NO_CIPHER.to_vec(),
            sender_acse_requirements: true,
            mechanism_name: Some(AuthenticationMechanism::Low.oid()),
            calling_authentication_value: Some(password.to_vec()),
            user_information: Some(InitiateRequest::default().encode()?),
            ..AarqApdu::default()
        };
        let aare = self.associate(client_address, logical_device, &aarq).await?;
        ensure_accepted(&aare)?;
        debug!("application connected with password authentication");
        Ok(AppConnection::new(
            self.clone(),
            client_address,
            logical_device,
        ))
    }

    /// Exchange caller-supplied AARQ bytes and require a byte-identical
    /// AARE reply.
    pub async fn app_connect_raw(
        &self,
        client_address: u16,
        logical_device: u16,
        aarq: &[u8],
        expected_aare: &[u8],
    ) -> CosemResult<AppConnection> {
        let reply = self.request(client_address, logical_device, aarq).await?;
        if reply != expected_aare {
            return Err(CosemError::Protocol("received unexpected AARE".into()));
        }
        Ok(AppConnection::new(
            self.clone(),
            client_address,
            logical_device,
        ))
    }

    /// Associate with HLS-5 (GMAC): ciphered initiate exchange, then the
    /// mutual challenge round. On success every subsequent APDU of this
    /// connection is ciphered.
    pub async fn app_connect_hls5(
        &self,
        client_address: u16,
        logical_device: u16,
        settings: Hls5Settings,
    ) -> CosemResult<(AppConnection, InitiateResponse)> {
        let suite = GcmSuite::new(&settings.encryption_key, &settings.authentication_key)?;
        if settings.client_to_server_challenge.len() < 8 {
            return Err(CosemError::Config(format!(
                "client-to-server challenge of {} bytes is shorter than 8",
                settings.client_to_server_challenge.len()
            )));
        }
        let client_title = SystemTitle::new(settings.client_system_title);

        // Seed the security state and cipher the initiate-request. The
        // association itself still travels as cleartext ACSE; only the
        // user-information is ciphered.
        let user_information = {
            let mut inner = self.inner.lock().await;
            inner.security.suite = Some(suite.clone());
            inner.security.client_title = Some(client_title);
            inner.security.client_to_server_challenge =
                settings.client_to_server_challenge.clone();
            let mut frame_counter = FrameCounter::new(settings.initial_frame_counter);
            let first = frame_counter.advance()?;
            inner.security.frame_counter = Some(frame_counter);
            suite.encrypt_apdu(&client_title, first, &settings.initiate_request.encode()?)?
        };

        let aarq = AarqApdu {
            application_context_name: settings.application_context_name.clone(),
            calling_ap_title: Some(settings.client_system_title.to_vec()),
            sender_acse_requirements: true,
            mechanism_name: Some(AuthenticationMechanism::Hls5Gmac.oid()),
            calling_authentication_value: Some(settings.client_to_server_challenge.clone()),
            user_information: Some(user_information),
        };

        let aare = self.associate(client_address, logical_device, &aarq).await?;
        // A plain rejection leaves the connection usable.
        ensure_accepted(&aare)?;

        // Security verification failures past this point end the
        // connection.
        let initiate_response = match self.verify_hls5_aare(&aare, &suite).await {
            Ok(response) => response,
            Err(error) => {
                let _ = self.close().await;
                return Err(error);
            }
        };

        let aconn = AppConnection::new(self.clone(), client_address, logical_device);
        if let Err(error) = authenticate_hls5(&aconn, &suite).await {
            let _ = self.close().await;
            return Err(error);
        }

        self.inner.lock().await.security.mechanism = AuthenticationMechanism::Hls5Gmac;
        debug!("application connected with HLS-5 authentication");
        Ok((aconn, initiate_response))
    }

    async fn verify_hls5_aare(
        &self,
        aare: &AareApdu,
        suite: &GcmSuite,
    ) -> CosemResult<InitiateResponse> {
        let diagnostic = aare.result_source_diagnostic;
        if !(diagnostic.tag == 1 && diagnostic.value == 14) {
            return Err(CosemError::Security(
                "meter did not require authentication".into(),
            ));
        }

        let mechanism = aare
            .mechanism_name
            .as_deref()
            .ok_or_else(|| CosemError::Security("AARE carries no mechanism name".into()))?;
        if AuthenticationMechanism::from_oid(mechanism)
            .ok()
            .filter(|m| *m == AuthenticationMechanism::Hls5Gmac)
            .is_none()
        {
            return Err(CosemError::Security("mechanism mismatch".into()));
        }

        let server_title = aare
            .responding_ap_title
            .as_deref()
            .ok_or_else(|| CosemError::Security("meter did not send its system title".into()))
            .and_then(SystemTitle::from_slice)?;

        let server_challenge = aare
            .responding_authentication_value
            .clone()
            .ok_or_else(|| {
                CosemError::Security("meter did not send a server-to-client challenge".into())
            })?;

        let user_information = aare
            .user_information
            .as_deref()
            .ok_or_else(|| CosemError::Security("AARE carries no user-information".into()))?;
        if user_information.first() != Some(&GLO_INITIATE_RESPONSE) {
            return Err(CosemError::Security(
                "wrong tag for the ciphered initiate-response".into(),
            ));
        }
        let (_, plain) = suite.decrypt_apdu(&server_title, user_information)?;
        let initiate_response = InitiateResponse::decode(&plain)?;

        let mut inner = self.inner.lock().await;
        inner.security.server_title = Some(server_title);
        inner.security.server_to_client_challenge = server_challenge;
        Ok(initiate_response)
    }
}

fn ensure_accepted(aare: &AareApdu) -> CosemResult<()> {
    if aare.result != 0 {
        return Err(CosemError::AssociationRejected {
            result: aare.result,
            diagnostic: aare.result_source_diagnostic.value,
        });
    }
    Ok(())
}

/// The HLS-5 mutual challenge: send f(StoC) as a method call on the
/// current association object, verify the returned f(CtoS).
async fn authenticate_hls5(aconn: &AppConnection, suite: &GcmSuite) -> CosemResult<()> {
    let conn = aconn.connection();
    let (payload, client_challenge, server_title) = {
        let mut inner = conn.inner.lock().await;
        let client_title = inner
            .security
            .client_title
            .ok_or_else(|| CosemError::Config("client system title is not set".into()))?;
        let server_title = inner
            .security
            .server_title
            .ok_or_else(|| CosemError::Config("server system title is not set".into()))?;
        let server_challenge = inner.security.server_to_client_challenge.clone();
        let frame_counter = inner
            .security
            .frame_counter
            .as_mut()
            .ok_or_else(|| CosemError::Config("frame counter is not set".into()))?
            .advance()?;
        let tag = suite.challenge_tag(&client_title, frame_counter, &server_challenge)?;

        let mut payload = Vec::with_capacity(1 + 4 + GCM_TAG_LENGTH);
        payload.push(SECURITY_CONTROL_AUTH_ENC);
        payload.extend_from_slice(&frame_counter.to_be_bytes());
        payload.extend_from_slice(&tag);
        (
            payload,
            inner.security.client_to_server_challenge.clone(),
            server_title,
        )
    };

    debug!("authenticating with the server, sending f(StoC)");
    let method = MethodDescriptor::new(
        ASSOCIATION_LN_CLASS,
        association_ln_instance(),
        ASSOCIATION_LN_METHOD,
    );
    let (action_result, return_data) = aconn
        .action(method, Some(DlmsData::OctetString(payload)))
        .await?;
    if action_result != 0 {
        return Err(CosemError::Authentication(format!(
            "server did not authenticate the client, action result {}",
            action_result
        )));
    }

    let reply = return_data
        .ok_or_else(|| {
            CosemError::Authentication("server returned no authentication value".into())
        })?
        .octet_string()?
        .to_vec();
    if reply.len() != 1 + 4 + GCM_TAG_LENGTH {
        return Err(CosemError::Authentication(format!(
            "malformed f(CtoS) of {} bytes",
            reply.len()
        )));
    }
    if reply[0] != SECURITY_CONTROL_AUTH_ENC {
        return Err(CosemError::Security(format!(
            "wrong security control 0x{:02X} in f(CtoS)",
            reply[0]
        )));
    }

    // Big-endian reconstruction, the mirror of the encode path.
    let server_counter = u32::from_be_bytes([reply[1], reply[2], reply[3], reply[4]]);
    let received_tag = &reply[5..];

    debug!("authenticating server, verifying f(CtoS)");
    let expected = suite.challenge_tag(&server_title, server_counter, &client_challenge)?;
    // Constant-time comparison.
    let difference = expected
        .iter()
        .zip(received_tag)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if difference != 0 {
        return Err(CosemError::Authentication(
            "did not authenticate the server, authentication tag differs".into(),
        ));
    }

    debug!("server authenticated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_printable_and_sized() {
        let challenge = generate_challenge(16).unwrap();
        assert_eq!(challenge.len(), 16);
        assert!(challenge.iter().all(|b| (0x21..=0x7E).contains(b)));
        assert!(generate_challenge(4).is_err());
        assert!(generate_challenge(65).is_err());
    }
}
