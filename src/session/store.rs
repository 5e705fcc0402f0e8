//! The secure session store: the server side of the `SESSION_REQ` /
//! `SESSION_RES` / `SESSION_AUTH` / `SESSION_STATUS` exchange and of
//! per-packet wrap/unwrap for everything carried inside a `SECURE_SVC`
//! (§3, §4.2). This is the crate's largest single component.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::callbacks::OutboundDatagramSink;
use crate::config::GatewayConfig;
use crate::crypto::{
    apply_keystream, counter_block, seal_mac, serial::SerialNumberSource, verify_packet_mac,
    KeyExchange, SessionKeys, X25519KeyExchange,
};
use crate::error::SessionError;
use crate::frame::{KnxIpHeader, ServiceType};

use super::handshake::{
    session_auth_mac, session_res_mac, verify_session_auth_mac, SessionAuthBody, SessionReqBody,
    SessionResBody, SessionStatusCode,
};
use super::state::SessionState;
use super::wrapper::SecureWrapper;
use super::Session;

/// What kind of connection a channel registered against a session is for,
/// used to enforce the user-level access rule in §4.2 "Authorization".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Tunneling,
    DeviceManagement,
}

/// Result of [`SecureSessionStore::accept`]. Widens the boundary's informal
/// "returns true if consumed" contract into three cases, since a wrapped
/// packet that isn't itself a handshake message still needs routing to the
/// data-endpoint handler once unwrapped (recorded in DESIGN.md).
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Not one of this store's service types.
    NotForThisService,
    /// Fully handled in place (a handshake step; a reply was sent).
    HandledInPlace,
    /// A `SECURE_SVC` wrapper was unwrapped into a plaintext KNXnet/IP
    /// packet that belongs to some other component.
    Unwrapped {
        header: KnxIpHeader,
        payload: Vec<u8>,
        session_id: u16,
    },
}

impl AcceptOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, AcceptOutcome::NotForThisService)
    }
}

/// Tracks every live secure session and mediates all traffic that passes
/// through one.
pub struct SecureSessionStore {
    config: Arc<GatewayConfig>,
    serial_source: Arc<dyn SerialNumberSource>,
    sessions: DashMap<u16, Session>,
    /// Remembers which session a control-endpoint address authenticated
    /// through, so `register_connection` can find it once the (out of
    /// scope) control endpoint processes a `CONNECT_REQ` carried inside it.
    pending: DashMap<SocketAddr, u16>,
    next_id: AtomicU16,
}

impl SecureSessionStore {
    pub fn new(config: Arc<GatewayConfig>, serial_source: Arc<dyn SerialNumberSource>) -> Self {
        Self {
            config,
            serial_source,
            sessions: DashMap::new(),
            pending: DashMap::new(),
            next_id: AtomicU16::new(1),
        }
    }

    pub fn session(&self, session_id: u16) -> Option<Session> {
        self.sessions.get(&session_id).map(|entry| entry.clone())
    }

    pub fn is_session_alive(&self, session_id: u16) -> bool {
        self.sessions
            .get(&session_id)
            .map(|s| s.is_alive())
            .unwrap_or(false)
    }

    fn allocate_session_id(&self) -> Result<u16, SessionError> {
        let start = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut candidate = sanitize_id(start);
        for _ in 0..0xFFFE {
            if !self.sessions.contains_key(&candidate) {
                return Ok(candidate);
            }
            candidate = sanitize_id(candidate.wrapping_add(1));
        }
        Err(SessionError::IdSpaceExhausted)
    }

    /// Dispatches an inbound packet addressed to one of this store's
    /// service types: `SESSION_REQ`, a wrapped `SESSION_AUTH`, or a general
    /// wrapped `SECURE_SVC` payload. `local_addr` is the gateway's own
    /// control-endpoint address the packet arrived on, used to resolve the
    /// serial number (§6 "Environment"), not the client's address.
    pub async fn accept(
        &self,
        header: KnxIpHeader,
        payload: &[u8],
        src: SocketAddr,
        local_addr: SocketAddr,
        sink: &dyn OutboundDatagramSink,
    ) -> Result<AcceptOutcome, SessionError> {
        match header.service_type {
            ServiceType::SessionReq => {
                self.handle_session_req(payload, src, local_addr, sink).await?;
                Ok(AcceptOutcome::HandledInPlace)
            }
            ServiceType::SecureSvc => self.handle_secure_svc(payload, src, sink).await,
            _ => Ok(AcceptOutcome::NotForThisService),
        }
    }

    async fn handle_session_req(
        &self,
        payload: &[u8],
        src: SocketAddr,
        local_addr: SocketAddr,
        sink: &dyn OutboundDatagramSink,
    ) -> Result<(), SessionError> {
        let req = SessionReqBody::parse(payload)?;
        let key_exchange = X25519KeyExchange::new();
        let server_public_key = key_exchange.public_key();
        let shared_secret = key_exchange.shared_secret(&req.client_public_key);
        let keys = SessionKeys::derive(&shared_secret);
        let serial_number = self.serial_source.serial_number_for(local_addr.ip());
        let session_id = self.allocate_session_id()?;
        let session = Session::new(session_id, src, keys.clone(), serial_number);
        self.sessions.insert(session_id, session);

        let mac = session_res_mac(
            &self.config.device_authentication_key,
            &keys.key,
            &server_public_key,
            &req.client_public_key,
        );
        let body = SessionResBody {
            session_id,
            server_public_key,
            mac,
        }
        .to_bytes();
        let header = KnxIpHeader::new(ServiceType::SessionRes, 6 + body.len() as u16);
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&body);
        sink.send_datagram(src, out).await;
        Ok(())
    }

    async fn handle_secure_svc(
        &self,
        payload: &[u8],
        src: SocketAddr,
        sink: &dyn OutboundDatagramSink,
    ) -> Result<AcceptOutcome, SessionError> {
        let wrapper = SecureWrapper::parse(payload)?;
        let session = self
            .sessions
            .get(&wrapper.session_id)
            .map(|e| e.clone())
            .ok_or(SessionError::UnknownSession(wrapper.session_id))?;
        let key = session.keys().key;
        let counter = counter_block(
            wrapper.session_id,
            wrapper.seq,
            wrapper.serial_number,
            wrapper.msg_tag,
        );
        if !verify_packet_mac(&key, counter, &wrapper.ciphertext, &wrapper.mac) {
            return Err(SessionError::AuthenticationFailed);
        }
        let mut inner = wrapper.ciphertext.clone();
        apply_keystream(&key, counter, &mut inner);
        session.touch();

        let inner_header = KnxIpHeader::parse(&inner)?;
        if inner_header.service_type == ServiceType::SessionAuth {
            self.handle_session_auth(&inner[6..], &session, src, sink)
                .await?;
            return Ok(AcceptOutcome::HandledInPlace);
        }

        self.pending.insert(src, wrapper.session_id);
        let inner_payload = inner[6..inner_header.total_length as usize].to_vec();
        Ok(AcceptOutcome::Unwrapped {
            header: inner_header,
            payload: inner_payload,
            session_id: wrapper.session_id,
        })
    }

    async fn handle_session_auth(
        &self,
        payload: &[u8],
        session: &Session,
        src: SocketAddr,
        sink: &dyn OutboundDatagramSink,
    ) -> Result<(), SessionError> {
        let auth = SessionAuthBody::parse(payload)?;
        let status = match (session.state(), self.config.password_hash_for(auth.user_id)) {
            (SessionState::Pending, Some(password_hash)) => {
                if verify_session_auth_mac(
                    password_hash,
                    &session.keys().key,
                    session.session_id(),
                    auth.user_id,
                    &auth.mac,
                ) {
                    session.set_user_id(auth.user_id);
                    let _ = session.transition(SessionState::Authenticated);
                    SessionStatusCode::AuthSuccess
                } else {
                    session.fail("authentication mac mismatch".to_string());
                    SessionStatusCode::AuthFailed
                }
            }
            (SessionState::Pending, None) => {
                session.fail("unknown user id".to_string());
                SessionStatusCode::Unauthorized
            }
            _ => SessionStatusCode::AuthFailed,
        };

        let body = [status.to_byte()];
        let header = KnxIpHeader::new(ServiceType::SessionStatus, 6 + body.len() as u16);
        let mut plain = header.to_bytes().to_vec();
        plain.extend_from_slice(&body);
        let wrapped = self.wrap_for_session(session, &plain);
        sink.send_datagram(src, wrapped).await;

        if status != SessionStatusCode::AuthSuccess {
            self.sessions.remove(&session.session_id());
        }
        Ok(())
    }

    /// Encrypts and authenticates `inner_packet` (a full KNXnet/IP
    /// header+body) for delivery into `session_id`, per §4.2 "Per-packet
    /// wrapping". Used for every reply the data-endpoint handler sends back
    /// once a channel has a session bound to it.
    pub fn wrap(&self, session_id: u16, inner_packet: &[u8]) -> Result<Vec<u8>, SessionError> {
        let session = self
            .sessions
            .get(&session_id)
            .map(|e| e.clone())
            .ok_or(SessionError::UnknownSession(session_id))?;
        Ok(self.wrap_for_session(&session, inner_packet))
    }

    fn wrap_for_session(&self, session: &Session, inner_packet: &[u8]) -> Vec<u8> {
        let key = session.keys().key;
        let seq = session.next_send_seq();
        let serial_number = session.serial_number();
        let msg_tag = 0;
        let counter = counter_block(session.session_id(), seq, serial_number, msg_tag);
        let mut ciphertext = inner_packet.to_vec();
        apply_keystream(&key, counter, &mut ciphertext);
        let mac = seal_mac(&key, counter, &ciphertext);
        let wrapper = SecureWrapper::new(
            session.session_id(),
            seq,
            serial_number,
            msg_tag,
            ciphertext,
            mac,
        );
        let body = wrapper.to_bytes();
        let header = KnxIpHeader::new(ServiceType::SecureSvc, 6 + body.len() as u16);
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    /// Resolves a control-endpoint address that authenticated a secure
    /// session into the session id a newly opened channel should bind to,
    /// enforcing that only `user_id <= 1` may open a device-management
    /// connection (§4.2 "Authorization"). Returns `0` for a plaintext
    /// connection or an unauthorized one.
    pub fn register_connection(&self, kind: ConnectionKind, ctrl_endpoint: SocketAddr) -> u16 {
        let Some(session_id) = self.pending.get(&ctrl_endpoint).map(|e| *e) else {
            return 0;
        };
        let Some(session) = self.session(session_id) else {
            return 0;
        };
        if !session.is_alive() {
            return 0;
        }
        if kind == ConnectionKind::DeviceManagement && session.user_id() > 1 {
            return 0;
        }
        session_id
    }

    /// Removes sessions that have gone dormant past the configured
    /// timeout, notifying each client with a `SESSION_STATUS(Timeout)`
    /// (§3 "Session timeout", scenario S6).
    pub async fn sweep(&self, now: Instant, sink: &dyn OutboundDatagramSink) {
        let timeout = self.config.session_timeout;
        let dormant: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_dormant(timeout, now))
            .map(|entry| entry.value().clone())
            .collect();

        for session in dormant {
            session.fail("session timeout".to_string());
            let body = [SessionStatusCode::Timeout.to_byte()];
            let header = KnxIpHeader::new(ServiceType::SessionStatus, 6 + body.len() as u16);
            let mut plain = header.to_bytes().to_vec();
            plain.extend_from_slice(&body);
            let wrapped = self.wrap_for_session(&session, &plain);
            sink.send_datagram(session.client_control_endpoint(), wrapped)
                .await;
            self.sessions.remove(&session.session_id());
        }
    }
}

fn sanitize_id(candidate: u16) -> u16 {
    if candidate == 0 || candidate == 0xFFFF {
        1
    } else {
        candidate
    }
}
