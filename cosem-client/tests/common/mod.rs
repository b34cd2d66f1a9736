//! Mock meter harness for the client integration tests
//!
//! One loopback TCP listener per test, wrapper framing, a tiny COSEM
//! object store, optional HLS-5 security, and a few misbehaviour knobs to
//! provoke the client's error paths.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use cosem_application::get::encode_result_list;
use cosem_application::{
    ActionRequestNormal, ActionResponseNormal, AttributeDescriptor, GetDataBlock, GetRequest,
    GetResponse, GetResult, InitiateResponse, SelectiveAccess, SetRequest, SetResponse,
};
use cosem_asn1::{AareApdu, AarqApdu, AxdrDecoder, AxdrEncoder, SourceDiagnostic};
use cosem_core::{CosemResult, DlmsData, ObisCode};
use cosem_security::{
    AuthenticationMechanism, FrameCounter, GcmSuite, SystemTitle, GCM_TAG_LENGTH,
    SECURITY_CONTROL_AUTH_ENC,
};
use cosem_session::{wrapper_receive, wrapper_send};
use cosem_transport::TcpTransport;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// HLS-5 credentials of the mock meter.
#[derive(Clone)]
pub struct MeterSecurity {
    pub authentication_key: Vec<u8>,
    pub encryption_key: Vec<u8>,
    pub server_system_title: [u8; 8],
    pub server_to_client_challenge: Vec<u8>,
    pub initial_frame_counter: u32,
}

impl Default for MeterSecurity {
    fn default() -> Self {
        Self {
            authentication_key: vec![0u8; 16],
            encryption_key: vec![0u8; 16],
            server_system_title: [0x53, 0x52, 0x56, 0x00, 0x00, 0x00, 0x00, 0x02],
            server_to_client_challenge: b"P6wRJ21F".to_vec(),
            initial_frame_counter: 0x1000,
        }
    }
}

/// Mock meter behaviour.
#[derive(Clone, Default)]
pub struct MeterConfig {
    pub client_address: u16,
    pub logical_device: u16,
    /// Objects served for GET and accepted for SET.
    pub objects: Vec<(u16, ObisCode, i8, DlmsData)>,
    /// When nonzero, GET responses use inbound block transfer with this
    /// slice size.
    pub block_length: usize,
    /// HLS-5 credentials; `None` accepts any association unauthenticated.
    pub security: Option<MeterSecurity>,
    /// Respond to every AARQ with this rejection result.
    pub reject_result: Option<u8>,
    /// Advertise this mechanism name in the AARE instead of the real one.
    pub mechanism_override: Option<Vec<u32>>,
    /// Mislabel the data block that would carry this number.
    pub skip_block: Option<u32>,
    /// Corrupt the f(CtoS) tag in the challenge reply.
    pub corrupt_challenge_reply: bool,
}

impl MeterConfig {
    pub fn new(client_address: u16, logical_device: u16) -> Self {
        Self {
            client_address,
            logical_device,
            ..Self::default()
        }
    }
}

/// Spawn the meter; it serves a single connection and stops with it.
pub async fn spawn_meter(config: MeterConfig) -> (SocketAddr, JoinHandle<()>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let transport = TcpTransport::from_connected_stream(stream, Some(Duration::from_secs(10)));
        let mut meter = Meter::new(config, transport);
        meter.serve().await;
    });
    (address, handle)
}

struct SetAssembly {
    attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
    with_list: bool,
    raw: Vec<u8>,
    expected_number: u32,
}

struct Meter {
    config: MeterConfig,
    transport: TcpTransport,
    store: HashMap<(u16, [u8; 6], i8), DlmsData>,
    suite: Option<GcmSuite>,
    client_title: Option<SystemTitle>,
    client_challenge: Vec<u8>,
    frame_counter: FrameCounter,
    ciphered: bool,
    get_blocks: HashMap<u8, Vec<Vec<u8>>>,
    set_state: HashMap<u8, SetAssembly>,
}

impl Meter {
    fn new(config: MeterConfig, transport: TcpTransport) -> Self {
        let mut store = HashMap::new();
        for (class_id, instance, attribute, data) in &config.objects {
            store.insert((*class_id, *instance.as_bytes(), *attribute), data.clone());
        }
        let frame_counter = FrameCounter::new(
            config
                .security
                .as_ref()
                .map(|s| s.initial_frame_counter)
                .unwrap_or(0),
        );
        Self {
            config,
            transport,
            store,
            suite: None,
            client_title: None,
            client_challenge: Vec::new(),
            frame_counter,
            ciphered: false,
            get_blocks: HashMap::new(),
            set_state: HashMap::new(),
        }
    }

    async fn serve(&mut self) {
        loop {
            let received = wrapper_receive(&mut self.transport, None).await;
            let (_, _, pdu) = match received {
                Ok(message) => message,
                // Client went away; the meter's work is done.
                Err(_) => return,
            };
            let reply = match self.handle(pdu) {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("mock meter error: {}", e);
                    return;
                }
            };
            let src = self.config.logical_device;
            let dst = self.config.client_address;
            if wrapper_send(&mut self.transport, src, dst, &reply)
                .await
                .is_err()
            {
                return;
            }
        }
    }

    fn handle(&mut self, pdu: Vec<u8>) -> CosemResult<Option<Vec<u8>>> {
        // Ciphering switches on with the challenge reply itself still in
        // the clear, so latch the state as of this request.
        let was_ciphered = self.ciphered;
        let pdu = if was_ciphered {
            let suite = self.suite.as_ref().unwrap();
            let title = self.client_title.as_ref().unwrap();
            suite.decrypt_apdu(title, &pdu)?.1
        } else {
            pdu
        };

        let reply = match pdu.first() {
            Some(0x60) => Some(self.handle_aarq(&pdu)?),
            Some(0xC0) => self.handle_get(&pdu)?,
            Some(0xC1) => Some(self.handle_set(&pdu)?),
            Some(0xC3) => Some(self.handle_action(&pdu)?),
            other => {
                eprintln!("mock meter: unhandled APDU tag {:?}", other);
                None
            }
        };

        match reply {
            Some(reply) if was_ciphered => {
                let suite = self.suite.as_ref().unwrap();
                let title = SystemTitle::new(
                    self.config.security.as_ref().unwrap().server_system_title,
                );
                let frame_counter = self.frame_counter.advance()?;
                Ok(Some(suite.encrypt_apdu(&title, frame_counter, &reply)?))
            }
            other => Ok(other),
        }
    }

    fn handle_aarq(&mut self, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        let aarq = AarqApdu::decode(pdu)?;

        if let Some(result) = self.config.reject_result {
            let aare = AareApdu {
                application_context_name: aarq.application_context_name,
                result,
                result_source_diagnostic: SourceDiagnostic { tag: 1, value: 13 },
                responding_ap_title: None,
                mechanism_name: None,
                responding_authentication_value: None,
                user_information: None,
            };
            return aare.encode();
        }

        let Some(security) = self.config.security.clone() else {
            let aare = AareApdu {
                application_context_name: aarq.application_context_name,
                result: 0,
                result_source_diagnostic: SourceDiagnostic { tag: 1, value: 0 },
                responding_ap_title: None,
                mechanism_name: aarq.mechanism_name,
                responding_authentication_value: None,
                user_information: None,
            };
            return aare.encode();
        };

        // HLS-5 association: learn the client identity, answer with our
        // own and a ciphered initiate-response.
        let suite = GcmSuite::new(&security.encryption_key, &security.authentication_key)?;
        let client_title = SystemTitle::from_slice(
            aarq.calling_ap_title
                .as_deref()
                .expect("AARQ without calling AP title"),
        )?;
        self.client_challenge = aarq
            .calling_authentication_value
            .clone()
            .expect("AARQ without a client challenge");

        let initiate_response = InitiateResponse {
            negotiated_quality_of_service: None,
            negotiated_dlms_version: 6,
            negotiated_conformance: [0x00, 0x50, 0x1F],
            server_max_receive_pdu_size: 1024,
            vaa_name: 0x0007,
        };
        let server_title = SystemTitle::new(security.server_system_title);
        let frame_counter = self.frame_counter.advance()?;
        let user_information =
            suite.encrypt_apdu(&server_title, frame_counter, &initiate_response.encode()?)?;

        let mechanism = self
            .config
            .mechanism_override
            .clone()
            .unwrap_or_else(|| AuthenticationMechanism::Hls5Gmac.oid());

        self.suite = Some(suite);
        self.client_title = Some(client_title);

        let aare = AareApdu {
            application_context_name: aarq.application_context_name,
            result: 0,
            result_source_diagnostic: SourceDiagnostic { tag: 1, value: 14 },
            responding_ap_title: Some(security.server_system_title.to_vec()),
            mechanism_name: Some(mechanism),
            responding_authentication_value: Some(security.server_to_client_challenge.clone()),
            user_information: Some(user_information),
        };
        aare.encode()
    }

    fn lookup(&self, attribute: &AttributeDescriptor) -> GetResult {
        match self.store.get(&(
            attribute.class_id,
            *attribute.instance_id.as_bytes(),
            attribute.attribute_id,
        )) {
            Some(data) => GetResult::success(data.clone()),
            None => GetResult::failure(1),
        }
    }

    /// Label for the data block about to be sent, honouring `skip_block`.
    fn block_number_label(&self, number: u32) -> u32 {
        if self.config.skip_block == Some(number) {
            number + 1
        } else {
            number
        }
    }

    fn first_block_response(
        &mut self,
        invoke: cosem_application::InvokeIdAndPriority,
        payload: Vec<u8>,
    ) -> CosemResult<Vec<u8>> {
        let blocks: Vec<Vec<u8>> = payload
            .chunks(self.config.block_length)
            .map(<[u8]>::to_vec)
            .collect();
        let last_block = blocks.len() == 1;
        let first = blocks[0].clone();
        self.get_blocks.insert(invoke.invoke_id(), blocks);
        GetResponse::WithDataBlock {
            invoke,
            block: GetDataBlock {
                last_block,
                block_number: self.block_number_label(1),
                access_result: 0,
                raw_data: first,
            },
        }
        .encode()
    }

    fn handle_get(&mut self, pdu: &[u8]) -> CosemResult<Option<Vec<u8>>> {
        match GetRequest::decode(pdu)? {
            GetRequest::Normal {
                invoke, attribute, ..
            } => {
                let result = self.lookup(&attribute);
                if self.config.block_length > 0 && result.access_result == 0 {
                    let mut out = AxdrEncoder::new();
                    out.write_data(result.data.as_ref().unwrap())?;
                    let response = self.first_block_response(invoke, out.into_bytes())?;
                    return Ok(Some(response));
                }
                Ok(Some(GetResponse::Normal { invoke, result }.encode()?))
            }
            GetRequest::WithList { invoke, attributes } => {
                let results: Vec<GetResult> = attributes
                    .iter()
                    .map(|(attribute, _)| self.lookup(attribute))
                    .collect();
                if self.config.block_length > 0 {
                    let mut out = AxdrEncoder::new();
                    encode_result_list(&results, &mut out)?;
                    let response = self.first_block_response(invoke, out.into_bytes())?;
                    return Ok(Some(response));
                }
                Ok(Some(GetResponse::WithList { invoke, results }.encode()?))
            }
            GetRequest::Next {
                invoke,
                block_number,
            } => {
                let invoke_id = invoke.invoke_id();
                let Some(blocks) = self.get_blocks.get(&invoke_id) else {
                    return Ok(Some(
                        GetResponse::WithDataBlock {
                            invoke,
                            block: GetDataBlock {
                                last_block: true,
                                block_number,
                                access_result: 1,
                                raw_data: Vec::new(),
                            },
                        }
                        .encode()?,
                    ));
                };

                let index = block_number as usize;
                let last_block = index + 1 == blocks.len();
                let raw_data = blocks[index].clone();
                if last_block {
                    self.get_blocks.remove(&invoke_id);
                }
                Ok(Some(
                    GetResponse::WithDataBlock {
                        invoke,
                        block: GetDataBlock {
                            last_block,
                            block_number: self.block_number_label(block_number + 1),
                            access_result: 0,
                            raw_data,
                        },
                    }
                    .encode()?,
                ))
            }
        }
    }

    fn apply_set(
        &mut self,
        attributes: &[(AttributeDescriptor, Option<SelectiveAccess>)],
        values: Vec<DlmsData>,
    ) -> Vec<u8> {
        attributes
            .iter()
            .zip(values)
            .map(|((attribute, _), value)| {
                let key = (
                    attribute.class_id,
                    *attribute.instance_id.as_bytes(),
                    attribute.attribute_id,
                );
                if self.store.contains_key(&key) {
                    self.store.insert(key, value);
                    0
                } else {
                    1
                }
            })
            .collect()
    }

    fn handle_set(&mut self, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        match SetRequest::decode(pdu)? {
            SetRequest::Normal {
                invoke,
                attribute,
                data,
                ..
            } => {
                let access_result = self.apply_set(&[(attribute, None)], vec![data])[0];
                SetResponse::Normal {
                    invoke,
                    access_result,
                }
                .encode()
            }
            SetRequest::WithList {
                invoke,
                attributes,
                data,
            } => {
                let access_results = self.apply_set(&attributes, data);
                SetResponse::WithList {
                    invoke,
                    access_results,
                }
                .encode()
            }
            SetRequest::FirstBlock {
                invoke,
                attribute,
                access,
                last_block,
                block_number,
                raw_data,
            } => {
                self.set_state.insert(
                    invoke.invoke_id(),
                    SetAssembly {
                        attributes: vec![(attribute, access)],
                        with_list: false,
                        raw: raw_data,
                        expected_number: block_number,
                    },
                );
                self.set_block_reply(invoke, last_block, block_number)
            }
            SetRequest::WithListFirstBlock {
                invoke,
                attributes,
                last_block,
                block_number,
                raw_data,
            } => {
                self.set_state.insert(
                    invoke.invoke_id(),
                    SetAssembly {
                        attributes,
                        with_list: true,
                        raw: raw_data,
                        expected_number: block_number,
                    },
                );
                self.set_block_reply(invoke, last_block, block_number)
            }
            SetRequest::WithDataBlock {
                invoke,
                last_block,
                block_number,
                raw_data,
            } => {
                let assembly = self
                    .set_state
                    .get_mut(&invoke.invoke_id())
                    .expect("set data block without a first block");
                assert_eq!(block_number, assembly.expected_number + 1);
                assembly.expected_number = block_number;
                assembly.raw.extend_from_slice(&raw_data);
                self.set_block_reply(invoke, last_block, block_number)
            }
        }
    }

    fn set_block_reply(
        &mut self,
        invoke: cosem_application::InvokeIdAndPriority,
        last_block: bool,
        block_number: u32,
    ) -> CosemResult<Vec<u8>> {
        if !last_block {
            return SetResponse::ForDataBlock {
                invoke,
                block_number,
            }
            .encode();
        }

        let assembly = self
            .set_state
            .remove(&invoke.invoke_id())
            .expect("last set block without state");
        let mut decoder = AxdrDecoder::new(&assembly.raw);
        if assembly.with_list {
            let count = decoder.read_length()?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decoder.read_data()?);
            }
            let access_results = self.apply_set(&assembly.attributes, values);
            SetResponse::ForLastDataBlockWithList {
                invoke,
                access_results,
                block_number,
            }
            .encode()
        } else {
            let value = decoder.read_data()?;
            let access_result = self.apply_set(&assembly.attributes, vec![value])[0];
            SetResponse::ForLastDataBlock {
                invoke,
                access_result,
                block_number,
            }
            .encode()
        }
    }

    fn handle_action(&mut self, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        let request = ActionRequestNormal::decode(pdu)?;

        let is_hls_reply = request.method.class_id == 15
            && request.method.instance_id == ObisCode::new(0, 0, 40, 0, 0, 255)
            && request.method.method_id == 1
            && self.suite.is_some();
        if !is_hls_reply {
            return ActionResponseNormal {
                invoke: request.invoke,
                action_result: 0,
                return_data: None,
            }
            .encode();
        }

        let security = self.config.security.clone().unwrap();
        let suite = self.suite.clone().unwrap();
        let client_title = self.client_title.unwrap();

        let parameter = request
            .parameters
            .as_ref()
            .expect("HLS reply without parameters")
            .octet_string()?
            .to_vec();
        assert_eq!(parameter.len(), 1 + 4 + GCM_TAG_LENGTH);
        assert_eq!(parameter[0], SECURITY_CONTROL_AUTH_ENC);
        let client_counter =
            u32::from_be_bytes([parameter[1], parameter[2], parameter[3], parameter[4]]);
        let expected = suite.challenge_tag(
            &client_title,
            client_counter,
            &security.server_to_client_challenge,
        )?;

        if parameter[5..] != expected {
            return ActionResponseNormal {
                invoke: request.invoke,
                action_result: 1,
                return_data: None,
            }
            .encode();
        }

        // Client verified; answer with f(CtoS) under our own identity.
        let server_title = SystemTitle::new(security.server_system_title);
        let frame_counter = self.frame_counter.advance()?;
        let mut tag = suite.challenge_tag(&server_title, frame_counter, &self.client_challenge)?;
        if self.config.corrupt_challenge_reply {
            tag[0] ^= 0xFF;
        }

        let mut reply = Vec::with_capacity(1 + 4 + GCM_TAG_LENGTH);
        reply.push(SECURITY_CONTROL_AUTH_ENC);
        reply.extend_from_slice(&frame_counter.to_be_bytes());
        reply.extend_from_slice(&tag);

        let response = ActionResponseNormal {
            invoke: request.invoke,
            action_result: 0,
            return_data: Some(DlmsData::OctetString(reply)),
        }
        .encode();
        // Every APDU after a successful mutual challenge is ciphered.
        if !self.config.corrupt_challenge_reply {
            self.ciphered = true;
        }
        response
    }
}
