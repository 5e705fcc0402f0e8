use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use super::KeyExchange;

/// Direct X25519 (RFC 7748) key agreement, the replacement for the
/// reflective key handling flagged in Design Note §9.
///
/// Each handshake constructs a fresh instance, so "static" here only means
/// "reusable for the `&self` Diffie-Hellman call this trait needs", not
/// long-lived: the instance is dropped once the handshake completes.
pub struct X25519KeyExchange {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyExchange {
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

impl Default for X25519KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchange for X25519KeyExchange {
    fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    fn shared_secret(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer = PublicKey::from(*peer_public);
        self.secret.diffie_hellman(&peer).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_matches_both_sides() {
        let a = X25519KeyExchange::new();
        let b = X25519KeyExchange::new();
        let shared_a = a.shared_secret(&b.public_key());
        let shared_b = b.shared_secret(&a.public_key());
        assert_eq!(shared_a, shared_b);
    }
}
