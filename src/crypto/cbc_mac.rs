use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Computes a raw AES-CBC-MAC over `data` under `key`, with a zero IV.
///
/// `data` is zero-padded to a whole number of 16-byte blocks first (the
/// only inputs this crate ever MACs, the handshake's `server_pub XOR
/// client_pub`, are already block-aligned, so padding is a no-op there;
/// it exists so the function is total over arbitrary-length input).
/// Returns the final ciphertext block, per the standard CBC-MAC
/// construction.
pub fn compute_cbc_mac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut padded = data.to_vec();
    let remainder = padded.len() % 16;
    if remainder != 0 {
        padded.resize(padded.len() + (16 - remainder), 0);
    }
    if padded.is_empty() {
        padded.resize(16, 0);
    }

    let cipher = Aes128::new(key.into());
    let mut state = [0u8; 16];
    for block in padded.chunks_exact(16) {
        for i in 0..16 {
            state[i] ^= block[i];
        }
        let mut ga = state.into();
        cipher.encrypt_block(&mut ga);
        state = ga.into();
    }
    state
}

/// Encrypts a single 16-byte MAC block under `key` using one AES-ECB block
/// operation keyed off an all-zero "counter info" block, per §4.2 step 4:
/// "encrypted under the session key (single AES-ECB block with a zero
/// counter info)". This is equivalent to one block of AES-CTR with counter
/// zero: `ciphertext = plaintext XOR AES_encrypt(key, zero_block)`.
pub fn encrypt_mac_block(key: &[u8; 16], mac: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut keystream_block = [0u8; 16].into();
    cipher.encrypt_block(&mut keystream_block);
    let keystream: [u8; 16] = keystream_block.into();
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = mac[i] ^ keystream[i];
    }
    out
}

/// Inverse of [`encrypt_mac_block`]: XOR with AES-ECB is its own inverse.
pub fn decrypt_mac_block(key: &[u8; 16], encrypted: &[u8; 16]) -> [u8; 16] {
    encrypt_mac_block(key, encrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_is_deterministic() {
        let key = [3u8; 16];
        let data = [9u8; 32];
        assert_eq!(compute_cbc_mac(&key, &data), compute_cbc_mac(&key, &data));
    }

    #[test]
    fn mac_differs_by_key() {
        let data = [9u8; 32];
        assert_ne!(
            compute_cbc_mac(&[1u8; 16], &data),
            compute_cbc_mac(&[2u8; 16], &data)
        );
    }

    #[test]
    fn mac_block_encryption_round_trips() {
        let key = [5u8; 16];
        let mac = [8u8; 16];
        let encrypted = encrypt_mac_block(&key, &mac);
        assert_eq!(decrypt_mac_block(&key, &encrypted), mac);
    }
}
