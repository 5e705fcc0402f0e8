//! Collaborator boundaries for components this crate does not own (§1, §4.5,
//! §4.6). A real server wires concrete implementations of these traits in;
//! tests use simple in-memory stand-ins.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::frame::cemi::CemiFrame;
use crate::frame::header::KnxIpHeader;

/// Why a channel was closed, passed to [`ControlEndpointCallbacks::on_channel_closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Disconnect,
    ProtocolVersionMismatch,
    HeartbeatTimeout,
    HostClose,
    SessionClosed,
}

/// Subnet health as reported by the owning control endpoint, used to answer
/// `CONNECTIONSTATE_REQ` (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetStatus {
    Ok,
    Unreachable,
}

/// The owning control endpoint, consulted by the data-endpoint handler for
/// close notification, subnet status, and the port-mismatch recovery rule.
#[async_trait]
pub trait ControlEndpointCallbacks: Send + Sync {
    async fn on_channel_closed(&self, channel_id: u8, reason: CloseReason);
    async fn subnet_status(&self, channel_id: u8) -> SubnetStatus;
    /// Port-mismatch recovery (§4.1): looks up the data-endpoint service
    /// actually owning `channel_id`, rebinds it to `new_local_port`, and
    /// re-dispatches `header`/`payload` to it. Only the control endpoint has
    /// visibility into the channel registry needed to find that other
    /// handler, so the full "lookup, rebind, re-dispatch" sequence is this
    /// callback's job, not this handler's.
    async fn rebind_and_redispatch(
        &self,
        channel_id: u8,
        new_local_port: u16,
        header: KnxIpHeader,
        payload: Vec<u8>,
    ) -> Result<(), ChannelError>;
}

/// Upward sink for accepted cEMI frames, standing in for the (out-of-scope)
/// KNX subnet driver.
#[async_trait]
pub trait BusFrameSink: Send + Sync {
    async fn accept_from_channel(&self, channel_id: u8, cemi: CemiFrame);
    /// Fired in addition to [`Self::accept_from_channel`] when a
    /// device-management channel accepts a `Reset.req` (§4.1 "device
    /// management: ... on reset additionally fire the reset callback").
    /// The subnet driver uses this to actually reset the device; the plain
    /// forward above only delivers the cEMI frame itself.
    async fn on_reset(&self, channel_id: u8);
}

/// Outbound UDP sink the secure session store and data-endpoint handler use
/// to emit protocol responses, standing in for the (out-of-scope) service
/// loop's socket.
#[async_trait]
pub trait OutboundDatagramSink: Send + Sync {
    async fn send_datagram(&self, dst: SocketAddr, bytes: Vec<u8>);
}
