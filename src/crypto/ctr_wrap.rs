use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use super::cbc_mac::{compute_cbc_mac, encrypt_mac_block};

type Aes128Ctr = Ctr128BE<Aes128>;

/// Builds the 16-byte AES-CTR initial counter block from the four fields
/// that precede the ciphertext on the wire: `session_id(2) || seq(6) ||
/// serial_number(6) || msg_tag(2)`. Those fields sum to exactly 16 bytes,
/// so the wrapper header doubles as the CTR counter with no separate IV.
pub fn counter_block(session_id: u16, seq48: u64, serial_number: [u8; 6], msg_tag: u16) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0..2].copy_from_slice(&session_id.to_be_bytes());
    block[2..8].copy_from_slice(&seq48.to_be_bytes()[2..8]);
    block[8..14].copy_from_slice(&serial_number);
    block[14..16].copy_from_slice(&msg_tag.to_be_bytes());
    block
}

/// Applies the AES-CTR keystream to `data` in place. CTR is symmetric, so
/// the same function serves both wrap and unwrap.
pub fn apply_keystream(key: &[u8; 16], counter: [u8; 16], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), &counter.into());
    cipher.apply_keystream(data);
}

/// Computes the 16-byte authentication tag appended after the ciphertext:
/// `AES-CBC-MAC_K(counter || ciphertext)`, then sealed with the same
/// zero-counter-info AES-ECB block trick used for the handshake's
/// `SESSION_RES` MAC (§4.2 step 4), so an on-path observer without `K`
/// cannot distinguish the raw CBC-MAC output from noise either.
pub fn seal_mac(key: &[u8; 16], counter: [u8; 16], ciphertext: &[u8]) -> [u8; 16] {
    let mut mac_input = Vec::with_capacity(16 + ciphertext.len());
    mac_input.extend_from_slice(&counter);
    mac_input.extend_from_slice(ciphertext);
    let raw_mac = compute_cbc_mac(key, &mac_input);
    encrypt_mac_block(key, &raw_mac)
}

/// Recomputes the expected MAC and compares it against `received_mac` in
/// constant time.
pub fn verify_mac(key: &[u8; 16], counter: [u8; 16], ciphertext: &[u8], received_mac: &[u8; 16]) -> bool {
    let expected = seal_mac(key, counter, ciphertext);
    let mut diff = 0u8;
    for i in 0..16 {
        diff |= expected[i] ^ received_mac[i];
    }
    diff == 0
}
