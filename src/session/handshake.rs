//! Message bodies and pure crypto steps for the `SESSION_REQ` /
//! `SESSION_RES` / `SESSION_AUTH` / `SESSION_STATUS` exchange (§4.2).

use crate::crypto::{cbc_mac::compute_cbc_mac, cbc_mac::encrypt_mac_block};
use crate::error::FrameError;

/// `SESSION_REQ` body: the client's 32-byte X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReqBody {
    pub client_public_key: [u8; 32],
}

impl SessionReqBody {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 32 {
            return Err(FrameError::Truncated {
                need: 32,
                have: buf.len(),
            });
        }
        let mut client_public_key = [0u8; 32];
        client_public_key.copy_from_slice(&buf[..32]);
        Ok(Self { client_public_key })
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.client_public_key
    }
}

/// `SESSION_RES` body: `{session_id(2), server_pub(32), mac(16)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionResBody {
    pub session_id: u16,
    pub server_public_key: [u8; 32],
    pub mac: [u8; 16],
}

impl SessionResBody {
    pub fn to_bytes(self) -> [u8; 50] {
        let mut out = [0u8; 50];
        out[0..2].copy_from_slice(&self.session_id.to_be_bytes());
        out[2..34].copy_from_slice(&self.server_public_key);
        out[34..50].copy_from_slice(&self.mac);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 50 {
            return Err(FrameError::Truncated {
                need: 50,
                have: buf.len(),
            });
        }
        let session_id = u16::from_be_bytes([buf[0], buf[1]]);
        let mut server_public_key = [0u8; 32];
        server_public_key.copy_from_slice(&buf[2..34]);
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&buf[34..50]);
        Ok(Self {
            session_id,
            server_public_key,
            mac,
        })
    }
}

/// `SESSION_AUTH` body (carried inside a `SECURE_SVC` wrapper):
/// `{user_id(2), mac(16)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionAuthBody {
    pub user_id: u16,
    pub mac: [u8; 16],
}

impl SessionAuthBody {
    pub fn to_bytes(self) -> [u8; 18] {
        let mut out = [0u8; 18];
        out[0..2].copy_from_slice(&self.user_id.to_be_bytes());
        out[2..18].copy_from_slice(&self.mac);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 18 {
            return Err(FrameError::Truncated {
                need: 18,
                have: buf.len(),
            });
        }
        let user_id = u16::from_be_bytes([buf[0], buf[1]]);
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&buf[2..18]);
        Ok(Self { user_id, mac })
    }
}

/// `SESSION_STATUS` values, per §4.2 step 6. `Timeout` is numbered `3` to
/// match the wire value scenario S6 checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatusCode {
    AuthSuccess,
    AuthFailed,
    Unauthorized,
    Timeout,
}

impl SessionStatusCode {
    pub fn to_byte(self) -> u8 {
        match self {
            SessionStatusCode::AuthSuccess => 0,
            SessionStatusCode::AuthFailed => 1,
            SessionStatusCode::Unauthorized => 2,
            SessionStatusCode::Timeout => 3,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SessionStatusCode::AuthSuccess),
            1 => Some(SessionStatusCode::AuthFailed),
            2 => Some(SessionStatusCode::Unauthorized),
            3 => Some(SessionStatusCode::Timeout),
            _ => None,
        }
    }
}

/// Computes the `SESSION_RES` MAC: `AES-CBC-MAC_deviceAuthKey(server_pub XOR
/// client_pub)`, sealed with the session key via the zero-counter-info
/// AES-ECB trick (§4.2 step 4).
pub fn session_res_mac(
    device_auth_key: &[u8; 16],
    session_key: &[u8; 16],
    server_public_key: &[u8; 32],
    client_public_key: &[u8; 32],
) -> [u8; 16] {
    let mut xored = [0u8; 32];
    for i in 0..32 {
        xored[i] = server_public_key[i] ^ client_public_key[i];
    }
    let raw = compute_cbc_mac(device_auth_key, &xored);
    encrypt_mac_block(session_key, &raw)
}

/// Verifies a `SESSION_RES` MAC the client received, recomputing it the same
/// way the server did. Exposed so client-role tests (S5) can check the
/// server's handshake output independently of the server's own code path.
pub fn verify_session_res_mac(
    device_auth_key: &[u8; 16],
    session_key: &[u8; 16],
    server_public_key: &[u8; 32],
    client_public_key: &[u8; 32],
    mac: &[u8; 16],
) -> bool {
    session_res_mac(device_auth_key, session_key, server_public_key, client_public_key) == *mac
}

/// Computes the `SESSION_AUTH` MAC the client must present: `AES-CBC-MAC`
/// over `session_id || user_id` under the user's password hash, sealed with
/// the session key the same way as the handshake MAC. The exact MAC input
/// is an implementation decision (§9 Open Question (a) leaves enforcement,
/// not construction, open) recorded in DESIGN.md.
pub fn session_auth_mac(
    password_hash: &[u8; 16],
    session_key: &[u8; 16],
    session_id: u16,
    user_id: u16,
) -> [u8; 16] {
    let mut input = [0u8; 4];
    input[0..2].copy_from_slice(&session_id.to_be_bytes());
    input[2..4].copy_from_slice(&user_id.to_be_bytes());
    let raw = compute_cbc_mac(password_hash, &input);
    encrypt_mac_block(session_key, &raw)
}

pub fn verify_session_auth_mac(
    password_hash: &[u8; 16],
    session_key: &[u8; 16],
    session_id: u16,
    user_id: u16,
    mac: &[u8; 16],
) -> bool {
    session_auth_mac(password_hash, session_key, session_id, user_id) == *mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_res_mac_round_trips() {
        let device_key = [1u8; 16];
        let session_key = [2u8; 16];
        let server_pub = [3u8; 32];
        let client_pub = [4u8; 32];
        let mac = session_res_mac(&device_key, &session_key, &server_pub, &client_pub);
        assert!(verify_session_res_mac(
            &device_key,
            &session_key,
            &server_pub,
            &client_pub,
            &mac
        ));
    }

    #[test]
    fn session_auth_mac_detects_wrong_password() {
        let session_key = [2u8; 16];
        let mac = session_auth_mac(&[9u8; 16], &session_key, 42, 1);
        assert!(!verify_session_auth_mac(&[1u8; 16], &session_key, 42, 1, &mac));
    }

    #[test]
    fn status_code_round_trips() {
        for code in [
            SessionStatusCode::AuthSuccess,
            SessionStatusCode::AuthFailed,
            SessionStatusCode::Unauthorized,
            SessionStatusCode::Timeout,
        ] {
            assert_eq!(SessionStatusCode::from_byte(code.to_byte()), Some(code));
        }
        assert_eq!(SessionStatusCode::Timeout.to_byte(), 3);
    }
}
