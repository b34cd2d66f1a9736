//! HDLC link task
//!
//! The link runs as its own tokio task and owns the byte stream
//! exclusively. The rest of the stack talks to it through a command
//! channel; every command carries a oneshot reply, so the `HdlcLink`
//! handle exposes plain request/reply futures.
//!
//! Sequence state: V(S)/V(R) modulo 8, window 1 (one unacknowledged
//! I-frame in flight). Out-of-sequence receive triggers REJ; a lost reply
//! is recovered by polling with RR, up to the retry cap, after which the
//! link is failed.

use crate::hdlc::address::HdlcAddress;
use crate::hdlc::frame::{FrameType, HdlcFrame, HdlcParameters, FLAG, LLC_REQUEST, LLC_RESPONSE};
use cosem_core::{CosemError, CosemResult};
use cosem_transport::StreamAccessor;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Retransmissions/polls before the link is declared lost.
const RETRY_LIMIT: u32 = 3;

/// HDLC link configuration.
#[derive(Debug, Clone)]
pub struct HdlcSettings {
    /// Application client address (one byte).
    pub client_address: u8,
    /// Logical device (upper server) address.
    pub logical_device: u16,
    /// Physical device (lower server) address, if addressed.
    pub physical_device: Option<u16>,
    /// Encoded server address length (1, 2 or 4); inferred when `None`.
    pub server_address_length: Option<usize>,
    /// Wait on every I-frame acknowledgement and reply. Effectively
    /// infinite values are appropriate over TCP, where the transport does
    /// not lose frames and RR polling is just noise.
    pub response_timeout: Duration,
    /// Expected peer compute latency; added to the first reply wait so no
    /// RR poll is sent while the meter is still working.
    pub cosem_wait_time: Option<Duration>,
    /// Proposed maximum information field length for both directions.
    pub max_information_field_length: u16,
}

impl HdlcSettings {
    pub fn new(client_address: u8, logical_device: u16) -> Self {
        Self {
            client_address,
            logical_device,
            physical_device: None,
            server_address_length: None,
            response_timeout: Duration::from_secs(30),
            cosem_wait_time: None,
            max_information_field_length: 128,
        }
    }
}

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

enum Command {
    Connect(oneshot::Sender<CosemResult<HdlcParameters>>),
    Send(Vec<u8>, oneshot::Sender<CosemResult<()>>),
    Receive(oneshot::Sender<CosemResult<Vec<u8>>>),
    Disconnect(oneshot::Sender<CosemResult<()>>),
}

/// Handle to a running HDLC link task.
pub struct HdlcLink {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    negotiated: Option<HdlcParameters>,
}

impl HdlcLink {
    /// Spawn the link task over an already-open transport.
    pub fn start<T>(transport: T, settings: HdlcSettings) -> CosemResult<Self>
    where
        T: StreamAccessor + Send + 'static,
    {
        let client = HdlcAddress::client(settings.client_address)?;
        let server = HdlcAddress::server(
            settings.logical_device,
            settings.physical_device,
            settings.server_address_length,
        )?;

        let proposal = HdlcParameters {
            max_information_field_length_tx: settings.max_information_field_length,
            max_information_field_length_rx: settings.max_information_field_length,
            window_size_tx: 1,
            window_size_rx: 1,
        };

        let (commands, receiver) = mpsc::channel(4);
        let worker = LinkWorker {
            transport,
            settings,
            client,
            server,
            params: proposal,
            state: LinkState::Disconnected,
            send_seq: 0,
            recv_seq: 0,
        };
        let task = tokio::spawn(worker.run(receiver));

        Ok(Self {
            commands,
            task,
            negotiated: None,
        })
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<CosemResult<R>>) -> Command) -> CosemResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CosemError::Closed)?;
        response.await.map_err(|_| CosemError::Closed)?
    }

    /// Send SNRM and wait for UA; returns the negotiated parameters.
    pub async fn connect(&mut self) -> CosemResult<HdlcParameters> {
        let params = self.request(Command::Connect).await?;
        self.negotiated = Some(params);
        Ok(params)
    }

    /// Parameters negotiated in the SNRM/UA exchange.
    pub fn negotiated(&self) -> Option<HdlcParameters> {
        self.negotiated
    }

    /// Send one APDU; the LLC header and segmentation are applied here.
    pub async fn send(&self, payload: &[u8]) -> CosemResult<()> {
        self.request(|reply| Command::Send(payload.to_vec(), reply))
            .await
    }

    /// Read one reassembled information field (LLC stripped) into `buf`.
    ///
    /// A buffer shorter than the negotiated maximum receive length is a
    /// caller bug and is rejected outright.
    pub async fn read(&self, buf: &mut [u8]) -> CosemResult<usize> {
        let max_rx = self
            .negotiated
            .map(|p| usize::from(p.max_information_field_length_rx))
            .unwrap_or(0);
        if buf.len() < max_rx {
            return Err(CosemError::Config(format!(
                "read buffer of {} bytes is shorter than the negotiated maximum of {}",
                buf.len(),
                max_rx
            )));
        }

        let payload = self.receive().await?;
        if payload.len() > buf.len() {
            return Err(CosemError::Framing(format!(
                "reassembled information field of {} bytes exceeds the read buffer",
                payload.len()
            )));
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Read one reassembled information field (LLC stripped).
    pub async fn receive(&self) -> CosemResult<Vec<u8>> {
        self.request(Command::Receive).await
    }

    /// Send DISC and wait for UA/DM; closes the stream either way.
    pub async fn disconnect(&self) -> CosemResult<()> {
        self.request(Command::Disconnect).await
    }

    /// Forcibly stop the link task; the byte stream is dropped with it.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for HdlcLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct LinkWorker<T> {
    transport: T,
    settings: HdlcSettings,
    client: HdlcAddress,
    server: HdlcAddress,
    params: HdlcParameters,
    state: LinkState,
    /// V(S): sequence number of the next I-frame to send.
    send_seq: u8,
    /// V(R): sequence number of the next expected I-frame.
    recv_seq: u8,
}

impl<T: StreamAccessor> LinkWorker<T> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Connect(reply) => {
                    let _ = reply.send(self.connect().await);
                }
                Command::Send(payload, reply) => {
                    let _ = reply.send(self.send(&payload).await);
                }
                Command::Receive(reply) => {
                    let _ = reply.send(self.receive().await);
                }
                Command::Disconnect(reply) => {
                    let _ = reply.send(self.disconnect().await);
                }
            }
        }
        let _ = self.transport.close().await;
    }

    /// Mark the link dead and release the stream.
    async fn fail(&mut self, error: CosemError) -> CosemError {
        self.state = LinkState::Closed;
        let _ = self.transport.close().await;
        error
    }

    fn guard_connected(&self) -> CosemResult<()> {
        match self.state {
            LinkState::Connected => Ok(()),
            LinkState::Closed => Err(CosemError::Closed),
            other => Err(CosemError::Protocol(format!(
                "HDLC link is {:?}, not connected",
                other
            ))),
        }
    }

    async fn connect(&mut self) -> CosemResult<HdlcParameters> {
        if self.state != LinkState::Disconnected {
            return Err(CosemError::Protocol(format!(
                "SNRM sent while the link is {:?}",
                self.state
            )));
        }
        self.state = LinkState::Connecting;

        let snrm = HdlcFrame::new(self.server, self.client, FrameType::SetNormalResponseMode, true)
            .with_information(self.params.encode(), false);
        if let Err(e) = self.write_frame(&snrm).await {
            return Err(self.fail(e).await);
        }

        loop {
            let frame = match self.read_frame(self.settings.response_timeout).await {
                Ok(frame) => frame,
                Err(e) => return Err(self.fail(e).await),
            };
            if !self.is_for_us(&frame) {
                debug!("ignoring frame for {}", frame.destination);
                continue;
            }
            match frame.frame_type {
                FrameType::UnnumberedAcknowledge => {
                    let negotiated = match HdlcParameters::decode(&frame.information) {
                        Ok(params) => params,
                        Err(e) => return Err(self.fail(e).await),
                    };
                    self.params = negotiated;
                    self.send_seq = 0;
                    self.recv_seq = 0;
                    self.state = LinkState::Connected;
                    debug!(
                        "HDLC link up: max tx {}, max rx {}, window {}/{}",
                        negotiated.max_information_field_length_tx,
                        negotiated.max_information_field_length_rx,
                        negotiated.window_size_tx,
                        negotiated.window_size_rx,
                    );
                    return Ok(negotiated);
                }
                FrameType::DisconnectedMode => {
                    return Err(self
                        .fail(CosemError::Protocol("server refused SNRM with DM".into()))
                        .await);
                }
                other => {
                    return Err(self
                        .fail(CosemError::Protocol(format!(
                            "unexpected {:?} while waiting for UA",
                            other
                        )))
                        .await);
                }
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) -> CosemResult<()> {
        self.guard_connected()?;

        let mut information = Vec::with_capacity(LLC_REQUEST.len() + payload.len());
        information.extend_from_slice(&LLC_REQUEST);
        information.extend_from_slice(payload);

        let segment_size = usize::from(self.params.max_information_field_length_tx).max(1);
        let segments: Vec<&[u8]> = information.chunks(segment_size).collect();
        let count = segments.len();
        for (index, segment) in segments.into_iter().enumerate() {
            self.send_segment(segment, index + 1 < count).await?;
        }
        Ok(())
    }

    async fn send_segment(&mut self, segment: &[u8], segmented: bool) -> CosemResult<()> {
        let send_seq = self.send_seq;
        let frame = HdlcFrame::new(
            self.server,
            self.client,
            FrameType::Information {
                send_seq,
                recv_seq: self.recv_seq,
            },
            true,
        )
        .with_information(segment.to_vec(), segmented);

        let acked_seq = (send_seq + 1) & 0x07;
        let mut attempts = 0u32;
        loop {
            if let Err(e) = self.write_frame(&frame).await {
                return Err(self.fail(e).await);
            }
            if !segmented {
                // The acknowledgement rides on the reply I-frame.
                self.send_seq = acked_seq;
                return Ok(());
            }

            match self.read_frame(self.settings.response_timeout).await {
                Ok(reply) if !self.is_for_us(&reply) => continue,
                Ok(reply) => match reply.frame_type {
                    FrameType::ReceiveReady { recv_seq } if recv_seq == acked_seq => {
                        self.send_seq = acked_seq;
                        return Ok(());
                    }
                    FrameType::ReceiveReady { recv_seq } | FrameType::Reject { recv_seq } => {
                        warn!(
                            "peer acknowledged N(R)={}, expected {}; retransmitting",
                            recv_seq, acked_seq
                        );
                    }
                    FrameType::DisconnectedMode => {
                        return Err(self
                            .fail(CosemError::Protocol("link terminated by server (DM)".into()))
                            .await);
                    }
                    other => {
                        return Err(self
                            .fail(CosemError::Protocol(format!(
                                "unexpected {:?} while waiting for segment acknowledgement",
                                other
                            )))
                            .await);
                    }
                },
                Err(CosemError::Timeout) => {
                    warn!("no acknowledgement for I-frame N(S)={}", send_seq);
                }
                Err(e) => return Err(self.fail(e).await),
            }

            attempts += 1;
            if attempts >= RETRY_LIMIT {
                return Err(self.fail(CosemError::Timeout).await);
            }
        }
    }

    async fn receive(&mut self) -> CosemResult<Vec<u8>> {
        self.guard_connected()?;

        let mut assembled: Vec<u8> = Vec::new();
        let mut polls = 0u32;
        // The first wait covers the peer's compute latency so no RR poll
        // fires while the meter is still preparing its reply.
        let mut wait = self
            .settings
            .response_timeout
            .saturating_add(self.settings.cosem_wait_time.unwrap_or(Duration::ZERO));

        loop {
            match self.read_frame(wait).await {
                Ok(frame) => {
                    if !self.is_for_us(&frame) {
                        continue;
                    }
                    match frame.frame_type {
                        FrameType::Information { send_seq, .. } => {
                            if send_seq != self.recv_seq {
                                warn!(
                                    "I-frame N(S)={} out of sequence, expected {}; rejecting",
                                    send_seq, self.recv_seq
                                );
                                let reject = HdlcFrame::new(
                                    self.server,
                                    self.client,
                                    FrameType::Reject {
                                        recv_seq: self.recv_seq,
                                    },
                                    true,
                                );
                                if let Err(e) = self.write_frame(&reject).await {
                                    return Err(self.fail(e).await);
                                }
                                continue;
                            }

                            self.recv_seq = (self.recv_seq + 1) & 0x07;
                            assembled.extend_from_slice(&frame.information);

                            if frame.segmented {
                                let ready = HdlcFrame::new(
                                    self.server,
                                    self.client,
                                    FrameType::ReceiveReady {
                                        recv_seq: self.recv_seq,
                                    },
                                    true,
                                );
                                if let Err(e) = self.write_frame(&ready).await {
                                    return Err(self.fail(e).await);
                                }
                                wait = self.settings.response_timeout;
                                continue;
                            }

                            if assembled.len() < LLC_RESPONSE.len()
                                || assembled[..LLC_RESPONSE.len()] != LLC_RESPONSE
                            {
                                return Err(self
                                    .fail(CosemError::Framing("wrong LLC header".into()))
                                    .await);
                            }
                            assembled.drain(..LLC_RESPONSE.len());
                            return Ok(assembled);
                        }
                        FrameType::ReceiveReady { .. } => continue,
                        FrameType::Disconnect | FrameType::DisconnectedMode => {
                            return Err(self
                                .fail(CosemError::Protocol("link terminated by server".into()))
                                .await);
                        }
                        other => {
                            return Err(self
                                .fail(CosemError::Protocol(format!(
                                    "unexpected {:?} while waiting for a reply",
                                    other
                                )))
                                .await);
                        }
                    }
                }
                Err(CosemError::Timeout) => {
                    polls += 1;
                    if polls > RETRY_LIMIT {
                        return Err(self.fail(CosemError::Timeout).await);
                    }
                    debug!("reply overdue, polling with RR({})", self.recv_seq);
                    let ready = HdlcFrame::new(
                        self.server,
                        self.client,
                        FrameType::ReceiveReady {
                            recv_seq: self.recv_seq,
                        },
                        true,
                    );
                    if let Err(e) = self.write_frame(&ready).await {
                        return Err(self.fail(e).await);
                    }
                    wait = self.settings.response_timeout;
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    async fn disconnect(&mut self) -> CosemResult<()> {
        match self.state {
            LinkState::Closed => return Ok(()),
            LinkState::Disconnected => {
                self.state = LinkState::Closed;
                let _ = self.transport.close().await;
                return Ok(());
            }
            _ => {}
        }
        self.state = LinkState::Disconnecting;

        let disc = HdlcFrame::new(self.server, self.client, FrameType::Disconnect, true);
        if let Err(e) = self.write_frame(&disc).await {
            return Err(self.fail(e).await);
        }

        let result = loop {
            match self.read_frame(self.settings.response_timeout).await {
                Ok(frame) if !self.is_for_us(&frame) => continue,
                Ok(frame) => match frame.frame_type {
                    FrameType::UnnumberedAcknowledge | FrameType::DisconnectedMode => break Ok(()),
                    other => {
                        debug!("ignoring {:?} while waiting for the DISC reply", other);
                        continue;
                    }
                },
                Err(e) => break Err(e),
            }
        };

        self.state = LinkState::Closed;
        let _ = self.transport.close().await;
        result
    }

    fn is_for_us(&self, frame: &HdlcFrame) -> bool {
        frame.destination.logical() == self.client.logical()
            && frame.source.logical() == self.server.logical()
    }

    async fn write_frame(&mut self, frame: &HdlcFrame) -> CosemResult<()> {
        let body = frame.encode()?;
        let mut bytes = Vec::with_capacity(body.len() + 2);
        bytes.push(FLAG);
        bytes.extend_from_slice(&body);
        bytes.push(FLAG);
        debug!("sending hdlc frame: {:02X?}", bytes);
        self.transport.write_all(&bytes).await?;
        self.transport.flush().await
    }

    async fn read_frame(&mut self, wait: Duration) -> CosemResult<HdlcFrame> {
        self.transport.set_timeout(Some(wait));

        let mut byte = [0u8; 1];
        let format_h = loop {
            self.transport.read_exact(&mut byte).await?;
            if byte[0] != FLAG {
                break byte[0];
            }
        };
        if format_h & 0xF0 != 0xA0 {
            return Err(CosemError::Framing(format!(
                "illegal HDLC frame format 0x{:02X}",
                format_h
            )));
        }
        self.transport.read_exact(&mut byte).await?;
        let format_l = byte[0];

        let length = usize::from(format_h & 0x07) << 8 | usize::from(format_l);
        if length < 6 {
            return Err(CosemError::Framing(format!(
                "HDLC frame length {} is too short",
                length
            )));
        }

        let mut frame_bytes = vec![0u8; length];
        frame_bytes[0] = format_h;
        frame_bytes[1] = format_l;
        self.transport.read_exact(&mut frame_bytes[2..]).await?;

        self.transport.read_exact(&mut byte).await?;
        if byte[0] != FLAG {
            return Err(CosemError::Framing(format!(
                "missing HDLC closing flag, found 0x{:02X}",
                byte[0]
            )));
        }

        let frame = HdlcFrame::decode(&frame_bytes)?;
        debug!("received hdlc frame: {:02X?}", frame_bytes);
        Ok(frame)
    }
}
