//! Connection facade
//!
//! A `DlmsConnection` owns exactly one channel to a meter: a wrapper
//! framing over TCP/UDP, or an HDLC link task for serial-profile meters
//! reached over TCP. It also holds the security state of the association
//! (keys, titles, challenges, frame counter). All of that state mutates
//! only under the connection lock, which serializes ciphering and keeps
//! GCM nonces unique.

use cosem_core::{CosemError, CosemResult};
use cosem_security::{AuthenticationMechanism, FrameCounter, GcmSuite, SystemTitle};
use cosem_session::hdlc::{HdlcLink, HdlcSettings};
use cosem_session::{wrapper_receive, wrapper_send};
use cosem_transport::{
    StreamAccessor, TcpSettings, TcpTransport, TransportLayer, UdpSettings, UdpTransport,
};
use log::{debug, error};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Smallest HDLC read buffer; grows to the negotiated receive length.
const HDLC_READ_BUFFER: usize = 3 * 1024;

/// HDLC connection parameters (see `HdlcSettings` for the link knobs).
#[derive(Debug, Clone)]
pub struct HdlcConnectSettings {
    pub client_address: u8,
    pub logical_device: u16,
    pub physical_device: Option<u16>,
    pub server_address_length: Option<usize>,
    /// Per-I-frame acknowledgement/reply wait; effectively infinite values
    /// suit reliable TCP underneath.
    pub response_timeout: Duration,
    /// Expected peer compute latency; suppresses RR polls while the meter
    /// is still working on a reply.
    pub cosem_wait_time: Option<Duration>,
    /// Hard ceiling on the SNRM/UA exchange.
    pub snrm_timeout: Duration,
    /// Hard ceiling on the DISC/UA exchange during close.
    pub disc_timeout: Duration,
}

impl HdlcConnectSettings {
    pub fn new(client_address: u8, logical_device: u16) -> Self {
        Self {
            client_address,
            logical_device,
            physical_device: None,
            server_address_length: None,
            response_timeout: Duration::from_secs(3600),
            cosem_wait_time: None,
            snrm_timeout: Duration::from_secs(45),
            disc_timeout: Duration::from_secs(45),
        }
    }
}

pub(crate) enum Channel {
    Wrapper {
        stream: Box<dyn StreamAccessor>,
    },
    Hdlc {
        link: HdlcLink,
        disc_timeout: Duration,
        read_buffer: usize,
    },
}

/// Security state of one association.
#[derive(Debug, Default)]
pub(crate) struct SecurityContext {
    pub mechanism: AuthenticationMechanism,
    pub suite: Option<GcmSuite>,
    pub client_title: Option<SystemTitle>,
    pub server_title: Option<SystemTitle>,
    pub frame_counter: Option<FrameCounter>,
    pub client_to_server_challenge: Vec<u8>,
    pub server_to_client_challenge: Vec<u8>,
}

pub(crate) struct Inner {
    pub channel: Channel,
    pub closed: bool,
    pub security: SecurityContext,
}

impl Inner {
    /// Cipher an outbound APDU if the association mandates it.
    fn encrypt(&mut self, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        match self.security.mechanism {
            AuthenticationMechanism::Lowest | AuthenticationMechanism::Low => Ok(pdu.to_vec()),
            AuthenticationMechanism::Hls5Gmac => {
                let suite = self
                    .security
                    .suite
                    .as_ref()
                    .ok_or_else(|| CosemError::Config("ciphering keys are not set".into()))?;
                let title = self
                    .security
                    .client_title
                    .ok_or_else(|| CosemError::Config("client system title is not set".into()))?;
                let frame_counter = self
                    .security
                    .frame_counter
                    .as_mut()
                    .ok_or_else(|| CosemError::Config("frame counter is not set".into()))?
                    .advance()?;
                suite.encrypt_apdu(&title, frame_counter, pdu)
            }
        }
    }

    /// Decipher an inbound APDU if the association mandates it.
    fn decrypt(&self, pdu: Vec<u8>) -> CosemResult<Vec<u8>> {
        match self.security.mechanism {
            AuthenticationMechanism::Lowest | AuthenticationMechanism::Low => Ok(pdu),
            AuthenticationMechanism::Hls5Gmac => {
                let suite = self
                    .security
                    .suite
                    .as_ref()
                    .ok_or_else(|| CosemError::Config("ciphering keys are not set".into()))?;
                let title = self
                    .security
                    .server_title
                    .ok_or_else(|| CosemError::Config("server system title is not set".into()))?;
                let (frame_counter, plain) = suite.decrypt_apdu(&title, &pdu)?;
                debug!("deciphered inbound APDU under FC {}", frame_counter);
                Ok(plain)
            }
        }
    }

    /// A transport or authentication failure kills the association.
    fn note_fatal(&mut self, error: &CosemError) {
        if matches!(
            error,
            CosemError::Transport(_) | CosemError::Authentication(_)
        ) {
            self.closed = true;
        }
    }

    pub async fn send(&mut self, src: u16, dst: u16, pdu: &[u8]) -> CosemResult<()> {
        if self.closed {
            return Err(CosemError::Closed);
        }
        debug!("sending app pdu: {:02X?}", pdu);
        let pdu = self.encrypt(pdu)?;

        let result = match &mut self.channel {
            Channel::Wrapper { stream } => wrapper_send(stream.as_mut(), src, dst, &pdu).await,
            // HDLC addressing was fixed at connect time; src/dst only route
            // the wrapper.
            Channel::Hdlc { link, .. } => link.send(&pdu).await,
        };
        if let Err(ref error) = result {
            self.note_fatal(error);
        }
        result
    }

    pub async fn receive(&mut self, src: u16, dst: u16) -> CosemResult<Vec<u8>> {
        if self.closed {
            return Err(CosemError::Closed);
        }

        let result = match &mut self.channel {
            Channel::Wrapper { stream } => wrapper_receive(stream.as_mut(), Some((src, dst)))
                .await
                .map(|(_, _, pdu)| pdu),
            Channel::Hdlc {
                link, read_buffer, ..
            } => {
                let mut buf = vec![0u8; *read_buffer];
                match link.read(&mut buf).await {
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(buf)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        let pdu = match result {
            Ok(pdu) => pdu,
            Err(error) => {
                self.note_fatal(&error);
                return Err(error);
            }
        };

        match self.decrypt(pdu) {
            Ok(plain) => {
                debug!("received app pdu: {:02X?}", plain);
                Ok(plain)
            }
            Err(error) => {
                self.note_fatal(&error);
                Err(error)
            }
        }
    }
}

/// A transport connection to one meter.
///
/// Cheap to clone; clones share the same underlying channel and security
/// state. An [`crate::AppConnection`] holds such a shared handle.
#[derive(Clone)]
pub struct DlmsConnection {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for DlmsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlmsConnection").finish_non_exhaustive()
    }
}

impl DlmsConnection {
    fn from_channel(channel: Channel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                channel,
                closed: false,
                security: SecurityContext::default(),
            })),
        }
    }

    /// Connect the wrapper transport over TCP.
    pub async fn tcp_connect(address: IpAddr, port: u16) -> CosemResult<Self> {
        let mut transport = TcpTransport::new(TcpSettings::new(SocketAddr::new(address, port)));
        transport.open().await?;
        debug!("tcp transport connected: {}:{}", address, port);
        Ok(Self::from_channel(Channel::Wrapper {
            stream: Box::new(transport),
        }))
    }

    /// Connect the wrapper transport over UDP.
    pub async fn udp_connect(address: IpAddr, port: u16) -> CosemResult<Self> {
        let mut transport = UdpTransport::new(UdpSettings::new(SocketAddr::new(address, port)));
        transport.open().await?;
        debug!("udp transport connected: {}:{}", address, port);
        Ok(Self::from_channel(Channel::Wrapper {
            stream: Box::new(transport),
        }))
    }

    /// Connect an HDLC link over TCP: dial, spawn the link task, then run
    /// the SNRM/UA exchange under `snrm_timeout`.
    pub async fn hdlc_connect(
        address: IpAddr,
        port: u16,
        settings: HdlcConnectSettings,
    ) -> CosemResult<Self> {
        let mut transport = TcpTransport::new(TcpSettings::new(SocketAddr::new(address, port)));
        transport.open().await?;
        // The link applies its own per-exchange waits.
        transport.set_timeout(None);

        let link_settings = HdlcSettings {
            client_address: settings.client_address,
            logical_device: settings.logical_device,
            physical_device: settings.physical_device,
            server_address_length: settings.server_address_length,
            response_timeout: settings.response_timeout,
            cosem_wait_time: settings.cosem_wait_time,
            max_information_field_length: 128,
        };
        let mut link = HdlcLink::start(transport, link_settings)?;

        let negotiated = match tokio::time::timeout(settings.snrm_timeout, link.connect()).await {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => {
                error!("SNRM exchange failed: {}", e);
                link.abort();
                return Err(e);
            }
            Err(_) => {
                error!("SNRM exchange timed out");
                link.abort();
                return Err(CosemError::Timeout);
            }
        };

        let read_buffer =
            HDLC_READ_BUFFER.max(usize::from(negotiated.max_information_field_length_rx));
        Ok(Self::from_channel(Channel::Hdlc {
            link,
            disc_timeout: settings.disc_timeout,
            read_buffer,
        }))
    }

    /// Send one APDU to (src, dst), ciphering if the association mandates it.
    pub async fn transport_send(&self, src: u16, dst: u16, pdu: &[u8]) -> CosemResult<()> {
        self.inner.lock().await.send(src, dst, pdu).await
    }

    /// Receive one APDU addressed from `src` to `dst`.
    pub async fn transport_receive(&self, src: u16, dst: u16) -> CosemResult<Vec<u8>> {
        self.inner.lock().await.receive(src, dst).await
    }

    /// One request/reply exchange under a single hold of the connection
    /// lock, so concurrent callers cannot interleave mid-exchange.
    pub(crate) async fn request(&self, src: u16, dst: u16, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        inner.send(src, dst, pdu).await?;
        inner.receive(dst, src).await
    }

    /// Whether `close` has run or a fatal error ended the association.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Close the connection.
    ///
    /// Idempotent: only the first call tears anything down, later calls
    /// return `Ok`. On HDLC the DISC exchange runs under `disc_timeout`;
    /// the byte stream is released whether or not DISC succeeded.
    pub async fn close(&self) -> CosemResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        debug!("closing transport connection");

        match &mut inner.channel {
            Channel::Wrapper { stream } => stream.close().await,
            Channel::Hdlc {
                link, disc_timeout, ..
            } => match tokio::time::timeout(*disc_timeout, link.disconnect()).await {
                Ok(result) => result,
                Err(_) => {
                    error!("DISC exchange timed out, dropping the link");
                    link.abort();
                    Err(CosemError::Timeout)
                }
            },
        }
    }
}
