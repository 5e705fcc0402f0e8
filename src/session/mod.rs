//! The KNX IP Secure session layer: one [`Session`] per completed handshake,
//! tracked by [`store::SecureSessionStore`] (§3, §4.2).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::crypto::SessionKeys;

pub mod handshake;
pub mod state;
pub mod store;
pub mod wrapper;

use state::{Activity, SessionState, SessionStateError};

pub use store::{AcceptOutcome, ConnectionKind, SecureSessionStore};

/// A secure session established with one client control endpoint.
///
/// Cloning shares the same underlying state (all fields are reference
/// counted), mirroring how a session handle is passed around the store and
/// the channels bound to it without needing a central lock.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: u16,
    client_control_endpoint: SocketAddr,
    keys: SessionKeys,
    serial_number: [u8; 6],
    /// Monotonic 48-bit counter for packets the server sends *into* this
    /// session. Stored in a `u64`; callers only ever see the low 48 bits.
    send_seq: Arc<AtomicU64>,
    user_id: Arc<AtomicU16>,
    state: Arc<Mutex<SessionState>>,
    activity: Arc<Mutex<Activity>>,
}

const SEQ_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

impl Session {
    pub fn new(
        session_id: u16,
        client_control_endpoint: SocketAddr,
        keys: SessionKeys,
        serial_number: [u8; 6],
    ) -> Self {
        Self {
            session_id,
            client_control_endpoint,
            keys,
            serial_number,
            send_seq: Arc::new(AtomicU64::new(0)),
            user_id: Arc::new(AtomicU16::new(0)),
            state: Arc::new(Mutex::new(SessionState::Pending)),
            activity: Arc::new(Mutex::new(Activity::new())),
        }
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn client_control_endpoint(&self) -> SocketAddr {
        self.client_control_endpoint
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub fn serial_number(&self) -> [u8; 6] {
        self.serial_number
    }

    pub fn user_id(&self) -> u16 {
        self.user_id.load(Ordering::Relaxed)
    }

    pub fn set_user_id(&self, user_id: u16) {
        self.user_id.store(user_id, Ordering::Relaxed);
    }

    /// Returns the pre-increment sequence value to stamp on the next packet
    /// sent into this session, then advances the counter.
    pub fn next_send_seq(&self) -> u64 {
        self.send_seq.fetch_add(1, Ordering::Relaxed) & SEQ_MASK
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|g| g.clone())
            .unwrap_or_else(|_| SessionState::Failed("session state lock poisoned".to_string()))
    }

    pub fn transition(&self, next: SessionState) -> Result<(), SessionStateError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = state.clone();
        *state = current.transition(next)?;
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn fail(&self, reason: String) {
        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Failed(reason);
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            if !state.is_terminal() {
                *state = SessionState::Closed;
            }
        }
    }

    pub fn touch(&self) {
        if let Ok(mut activity) = self.activity.lock() {
            activity.touch();
        }
    }

    pub fn is_dormant(&self, threshold: Duration, now: Instant) -> bool {
        self.activity
            .lock()
            .map(|a| a.is_dormant(threshold, now))
            .unwrap_or(false)
    }
}
