//! Service-loop adapter (interface only, §4.3).
//!
//! A surrounding UDP/TCP loop owns the socket, reads datagrams, parses and
//! sanitizes the KNXnet/IP header, and calls into this crate. That loop is
//! out of scope; this module only pins down the routing contract it drives:
//! offer the packet to the secure session store first, then to whichever
//! channel it's addressed to, per the data-flow description in §2.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::callbacks::OutboundDatagramSink;
use crate::channel::handler::DataEndpointHandler;
use crate::error::{ChannelError, SessionError};
use crate::frame::KnxIpHeader;
use crate::session::store::{AcceptOutcome, SecureSessionStore};

/// Resolves a channel id to the handler that owns it, so the adapter can
/// route an inbound packet without knowing how channels are stored.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn handler_for(&self, channel_id: u8) -> Option<Arc<DataEndpointHandler>>;
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Demultiplexes one parsed, sanitized inbound datagram between the two
/// components this crate owns.
pub struct ServiceLoopAdapter {
    session_store: Arc<SecureSessionStore>,
    channels: Arc<dyn ChannelRegistry>,
    sink: Arc<dyn OutboundDatagramSink>,
}

impl ServiceLoopAdapter {
    pub fn new(
        session_store: Arc<SecureSessionStore>,
        channels: Arc<dyn ChannelRegistry>,
        sink: Arc<dyn OutboundDatagramSink>,
    ) -> Self {
        Self {
            session_store,
            channels,
            sink,
        }
    }

    /// `local_addr` is the gateway's own control-endpoint address the packet
    /// arrived on (never the client's), threaded through to the session
    /// store so it can resolve the serial number for `SESSION_REQ` (§6).
    pub async fn dispatch(
        &self,
        header: KnxIpHeader,
        payload: &[u8],
        src: SocketAddr,
        local_addr: SocketAddr,
    ) -> Result<(), LoopError> {
        match self
            .session_store
            .accept(header, payload, src, local_addr, self.sink.as_ref())
            .await?
        {
            AcceptOutcome::HandledInPlace => Ok(()),
            AcceptOutcome::Unwrapped { header, payload, .. } => {
                self.dispatch_to_channel(header, &payload).await
            }
            AcceptOutcome::NotForThisService => self.dispatch_to_channel(header, payload).await,
        }
    }

    async fn dispatch_to_channel(&self, header: KnxIpHeader, payload: &[u8]) -> Result<(), LoopError> {
        let Some(channel_id) = leading_channel_id(payload) else {
            return Ok(());
        };
        let Some(handler) = self.channels.handler_for(channel_id).await else {
            tracing::debug!(channel_id, "no handler registered for channel, dropping");
            return Ok(());
        };
        handler.accept_data_service(header, payload).await?;
        Ok(())
    }
}

/// Every body this crate's handler recognizes places `channel_id` as the
/// byte immediately after the body's size octet (§6).
fn leading_channel_id(payload: &[u8]) -> Option<u8> {
    payload.get(1).copied()
}
