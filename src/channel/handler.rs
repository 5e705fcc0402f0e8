//! The data-endpoint handler: the request/ack state machine, cEMI dispatch
//! policy, tunneling-feature responses, the `CONNECTIONSTATE_REQ`
//! compatibility quirk, and port-mismatch recovery (§4.1).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::callbacks::{BusFrameSink, CloseReason, ControlEndpointCallbacks, OutboundDatagramSink, SubnetStatus};
use crate::error::ChannelError;
use crate::frame::{
    AckBody, AckStatus, CemiFrame, ConnectionStateReqBody, FeatureResult, FeatureService,
    HostProtocol, KnxIpHeader, MessageCode, RequestBody, ServiceType,
};
use crate::session::store::SecureSessionStore;

use super::connection_base::AckOutcome;
use super::{Channel, ChannelRole, ConnectionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Blocking,
    NonBlocking,
}

/// Per-channel protocol engine. The caller (loop adapter glue, out of
/// scope) is responsible for forcing `mode = NonBlocking` on a TCP-fallback
/// connection before calling [`Self::send`], since this type has no notion
/// of which transport delivered the channel.
pub struct DataEndpointHandler {
    channel: Arc<Channel>,
    control: Arc<dyn ControlEndpointCallbacks>,
    bus: Arc<dyn BusFrameSink>,
    sink: Arc<dyn OutboundDatagramSink>,
    session_store: Arc<SecureSessionStore>,
    shutdown: CancellationToken,
}

impl DataEndpointHandler {
    pub fn new(
        channel: Arc<Channel>,
        control: Arc<dyn ControlEndpointCallbacks>,
        bus: Arc<dyn BusFrameSink>,
        sink: Arc<dyn OutboundDatagramSink>,
        session_store: Arc<SecureSessionStore>,
    ) -> Self {
        Self {
            channel,
            control,
            bus,
            sink,
            session_store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Consumes a parsed inbound packet whose outer session layer, if any,
    /// has already been stripped. Returns `false` only when the service
    /// type is not one this handler owns.
    pub async fn accept_data_service(
        &self,
        header: KnxIpHeader,
        payload: &[u8],
    ) -> Result<bool, ChannelError> {
        self.close_if_session_gone().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match header.service_type {
            ServiceType::TunnelingReq | ServiceType::DeviceConfigurationReq => {
                self.handle_request(header, payload).await?;
                Ok(true)
            }
            ServiceType::TunnelingAck | ServiceType::DeviceConfigurationAck => {
                self.handle_ack(header, payload)?;
                Ok(true)
            }
            ServiceType::TunnelingFeatureGet | ServiceType::TunnelingFeatureSet => {
                self.handle_feature(header, payload).await?;
                Ok(true)
            }
            ServiceType::ConnectionStateReq => {
                self.handle_connection_state_req(header, payload).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn handle_request(&self, header: KnxIpHeader, payload: &[u8]) -> Result<(), ChannelError> {
        let is_device_config = header.service_type == ServiceType::DeviceConfigurationReq;
        let body = RequestBody::parse(payload)?;

        if body.channel_id != self.channel.channel_id {
            if is_device_config {
                self.control
                    .rebind_and_redispatch(
                        body.channel_id,
                        self.channel.local_data_port,
                        header,
                        payload.to_vec(),
                    )
                    .await?;
            } else {
                tracing::debug!(
                    expected = self.channel.channel_id,
                    got = body.channel_id,
                    "channel id mismatch, dropping request"
                );
            }
            return Ok(());
        }

        if !header.is_supported_version() {
            self.send_ack(body.channel_id, body.seq, AckStatus::VersionNotSupported, is_device_config)
                .await;
            self.close(CloseReason::ProtocolVersionMismatch).await;
            return Err(ChannelError::VersionMismatch(header.version));
        }

        let expected = self.channel.base.seq_recv();
        let is_duplicate = self.channel.role.is_tunneling() && body.seq == expected.wrapping_sub(1);
        if body.seq != expected && !is_duplicate {
            return Err(ChannelError::SequenceRejected {
                expected,
                got: body.seq,
            });
        }

        self.send_ack(body.channel_id, body.seq, AckStatus::NoError, is_device_config)
            .await;

        if body.seq == expected {
            self.channel.base.bump_recv();
            self.channel.base.touch();
            self.dispatch_cemi(body.cemi).await;
        }
        Ok(())
    }

    fn handle_ack(&self, header: KnxIpHeader, payload: &[u8]) -> Result<(), ChannelError> {
        let ack = AckBody::parse(payload)?;
        if ack.channel_id != self.channel.channel_id {
            return Ok(());
        }
        if ack.seq != self.channel.base.seq_send() {
            tracing::debug!(
                expected = self.channel.base.seq_send(),
                got = ack.seq,
                "ack sequence mismatch, ignoring"
            );
            return Ok(());
        }
        if !header.is_supported_version() {
            return Err(ChannelError::VersionMismatch(header.version));
        }
        self.channel.base.bump_send();
        let outcome = if ack.status.is_ok() {
            AckOutcome::Ok
        } else {
            AckOutcome::Error(ack.status)
        };
        self.channel.base.deliver_ack(outcome);
        Ok(())
    }

    async fn dispatch_cemi(&self, mut cemi: CemiFrame) {
        match self.channel.role {
            ChannelRole::TunnelingLinklayer => {
                if cemi.message_code != MessageCode::LDataReq {
                    tracing::debug!(?cemi.message_code, "dropping non L_Data.req on linklayer channel");
                    return;
                }
                if let Some(addr) = cemi.source_address() {
                    if addr.is_unassigned() {
                        cemi.set_source_address(self.channel.assigned_address);
                    }
                }
                self.bus.accept_from_channel(self.channel.channel_id, cemi).await;
            }
            ChannelRole::TunnelingBusmonitor => {
                tracing::debug!("busmonitor channel rejects all inbound cEMI");
            }
            ChannelRole::DeviceManagement => match cemi.message_code {
                MessageCode::ResetReq => {
                    self.bus.accept_from_channel(self.channel.channel_id, cemi).await;
                    self.bus.on_reset(self.channel.channel_id).await;
                }
                MessageCode::PropReadReq | MessageCode::PropWriteReq => {
                    self.bus.accept_from_channel(self.channel.channel_id, cemi).await;
                }
                _ => tracing::debug!(?cemi.message_code, "dropping non-request cEMI on device-management channel"),
            },
        }
    }

    fn role_accepts_outbound(&self, code: MessageCode) -> bool {
        match self.channel.role {
            ChannelRole::TunnelingLinklayer => matches!(code, MessageCode::LDataCon | MessageCode::LDataInd),
            ChannelRole::TunnelingBusmonitor => matches!(code, MessageCode::BusmonInd),
            ChannelRole::DeviceManagement => {
                !matches!(code, MessageCode::PropReadReq | MessageCode::PropWriteReq | MessageCode::ResetReq)
            }
        }
    }

    /// Sends a cEMI frame downward to the client. Fails with
    /// `frame-type-mismatch` when `cemi`'s class does not belong to this
    /// channel's role.
    pub async fn send(&self, cemi: CemiFrame, mode: SendMode) -> Result<(), ChannelError> {
        self.close_if_session_gone().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if !self.role_accepts_outbound(cemi.message_code) {
            return Err(ChannelError::FrameTypeMismatch(cemi.message_code.to_byte()));
        }

        let is_device_config = self.channel.role == ChannelRole::DeviceManagement;
        let seq = self.channel.base.seq_send();
        let body = RequestBody {
            channel_id: self.channel.channel_id,
            seq,
            cemi,
        };
        let service = if is_device_config {
            ServiceType::DeviceConfigurationReq
        } else {
            ServiceType::TunnelingReq
        };
        let mut plain = KnxIpHeader::new(service, 0).to_bytes().to_vec();
        plain.extend_from_slice(&body.to_bytes());
        let total_len = (plain.len() as u16).to_be_bytes();
        plain[4..6].copy_from_slice(&total_len);

        match mode {
            SendMode::NonBlocking => {
                self.emit_to_data(plain).await;
                self.channel.base.set_state(ConnectionState::Ok);
                Ok(())
            }
            SendMode::Blocking => {
                self.channel
                    .base
                    .send_and_wait(|| {
                        let bytes = plain.clone();
                        async move { self.emit_to_data(bytes).await }
                    })
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle_feature(&self, header: KnxIpHeader, payload: &[u8]) -> Result<(), ChannelError> {
        let req = FeatureService::parse(payload)?;
        if req.channel_id != self.channel.channel_id {
            return Ok(());
        }
        let is_set = header.service_type == ServiceType::TunnelingFeatureSet;
        let (result, value) = if is_set {
            let result = self.channel.features.lock().set(req.feature_id, &req.value);
            let value = self.channel.features.lock().get(req.feature_id, self.channel.assigned_address);
            (result, if result == FeatureResult::Success { value } else { Vec::new() })
        } else {
            (
                FeatureResult::Success,
                self.channel.features.lock().get(req.feature_id, self.channel.assigned_address),
            )
        };
        let response = FeatureService::response(self.channel.channel_id, req.seq, req.feature_id, result, value);
        let header = KnxIpHeader::new(ServiceType::TunnelingFeatureResponse, 6 + response.len() as u16);
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&response);
        self.emit_to_data(out).await;
        Ok(())
    }

    /// Accepted as a compatibility quirk: the spec places `CONNECTIONSTATE_REQ`
    /// on the control endpoint, but this handler answers it when it arrives
    /// here anyway, replying on the *control* endpoint rather than the data
    /// endpoint it was received on.
    async fn handle_connection_state_req(
        &self,
        header: KnxIpHeader,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let req = ConnectionStateReqBody::parse(payload)?;
        if req.channel_id != self.channel.channel_id {
            return Ok(());
        }
        if !header.is_supported_version() {
            return Err(ChannelError::VersionMismatch(header.version));
        }
        if req.control_endpoint.host_protocol != HostProtocol::Ipv4Udp {
            return Ok(());
        }
        let status = self.control.subnet_status(self.channel.channel_id).await;
        let status_byte: u8 = match status {
            SubnetStatus::Ok => 0x00,
            SubnetStatus::Unreachable => 0x21,
        };
        let body = [self.channel.channel_id, status_byte];
        let resp_header = KnxIpHeader::new(ServiceType::ConnectionStateRes, 6 + body.len() as u16);
        let mut out = resp_header.to_bytes().to_vec();
        out.extend_from_slice(&body);
        self.emit_to(self.channel.remote_control_endpoint, out).await;
        Ok(())
    }

    /// Idempotent. Notifies the owning control endpoint and marks the
    /// channel closed; does not itself remove the session it may be bound
    /// to (session removal cascades to channels, not the reverse, per §3).
    pub async fn close(&self, reason: CloseReason) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.channel.base.set_state(ConnectionState::Closed);
        self.control.on_channel_closed(self.channel.channel_id, reason).await;
    }

    /// Lets an external sweeper observe heartbeat timeouts and dormant-session
    /// cascades.
    pub async fn tick(&self, now: Instant, heartbeat_timeout: Duration) {
        self.close_if_session_gone().await;
        if self.is_closed() {
            return;
        }
        if self.channel.base.idle_for(now) > heartbeat_timeout {
            self.close(CloseReason::HeartbeatTimeout).await;
        }
    }

    /// Session removal cascades: a channel bound to a secure session
    /// observes the session's closure on its next operation (§3) rather
    /// than being notified directly.
    async fn close_if_session_gone(&self) {
        if self.channel.session_id != 0
            && !self.is_closed()
            && !self.session_store.is_session_alive(self.channel.session_id)
        {
            self.close(CloseReason::SessionClosed).await;
        }
    }

    async fn send_ack(&self, channel_id: u8, seq: u8, status: AckStatus, is_device_config: bool) {
        let ack = AckBody {
            channel_id,
            seq,
            status,
        };
        let service = if is_device_config {
            ServiceType::DeviceConfigurationAck
        } else {
            ServiceType::TunnelingAck
        };
        let header = KnxIpHeader::new(service, 6 + 4);
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&ack.to_bytes());
        self.emit_to_data(out).await;
    }

    async fn emit_to_data(&self, plain: Vec<u8>) {
        self.emit_to(self.channel.remote_data_endpoint, plain).await;
    }

    async fn emit_to(&self, dst: SocketAddr, plain: Vec<u8>) {
        let bytes = if self.channel.session_id != 0 {
            match self.session_store.wrap(self.channel.session_id, &plain) {
                Ok(wrapped) => wrapped,
                Err(err) => {
                    tracing::warn!(%err, "dropping outgoing packet, session is gone");
                    return;
                }
            }
        } else {
            plain
        };
        self.sink.send_datagram(dst, bytes).await;
    }
}
