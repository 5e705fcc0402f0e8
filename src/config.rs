//! Configuration inputs this crate needs but does not load itself.
//!
//! The loader that produces a `GatewayConfig` (reading a file, environment,
//! or management API) lives outside this crate, see §1 of the spec. This
//! module only pins down the shape of what must be provided.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-user authentication material for the secure session layer.
///
/// `user_id` follows the KNX IP Secure convention: 0 is unauthenticated,
/// 1 is management, 2..127 is restricted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub user_id: u16,
    /// Password hash as derived by the KNX IP Secure key-derivation function.
    /// Opaque to this crate beyond its use as CBC-MAC input material.
    pub password_hash: [u8; 16],
}

/// Externally-provisioned secrets and tunables for the secure session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Device authentication key used to MAC the handshake's `SESSION_RES`.
    pub device_authentication_key: [u8; 16],
    /// Known users, keyed by `user_id`.
    pub users: HashMap<u16, UserCredential>,
    /// Dormancy threshold after which a session is swept. Defaults to 2 minutes per §3.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: Duration,
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(120)
}

impl GatewayConfig {
    /// Looks up a user's password hash by id, used to verify `SESSION_AUTH`.
    pub fn password_hash_for(&self, user_id: u16) -> Option<&[u8; 16]> {
        self.users.get(&user_id).map(|u| &u.password_hash)
    }
}

#[cfg(test)]
impl Default for GatewayConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert(
            1,
            UserCredential {
                user_id: 1,
                password_hash: [0u8; 16],
            },
        );
        Self {
            device_authentication_key: [0u8; 16],
            users,
            session_timeout: default_session_timeout(),
        }
    }
}
