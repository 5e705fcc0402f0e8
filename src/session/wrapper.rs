//! Wire layout of a `SECURE_SVC` payload: everything the AES-CTR counter is
//! built from, plus the ciphertext and tag (§4.2 "Per-packet wrapping").

use crate::error::FrameError;

const OVERHEAD: usize = 2 + 6 + 6 + 2 + 16;

/// A parsed `SECURE_SVC` body: `{session_id(2), seq(6), serial_number(6),
/// msg_tag(2), ciphertext(n), mac(16)}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureWrapper {
    pub session_id: u16,
    pub seq: u64,
    pub serial_number: [u8; 6],
    pub msg_tag: u16,
    pub ciphertext: Vec<u8>,
    pub mac: [u8; 16],
}

impl SecureWrapper {
    pub fn new(
        session_id: u16,
        seq: u64,
        serial_number: [u8; 6],
        msg_tag: u16,
        ciphertext: Vec<u8>,
        mac: [u8; 16],
    ) -> Self {
        Self {
            session_id,
            seq,
            serial_number,
            msg_tag,
            ciphertext,
            mac,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < OVERHEAD {
            return Err(FrameError::Truncated {
                need: OVERHEAD,
                have: buf.len(),
            });
        }
        let session_id = u16::from_be_bytes([buf[0], buf[1]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes[2..8].copy_from_slice(&buf[2..8]);
        let seq = u64::from_be_bytes(seq_bytes);
        let mut serial_number = [0u8; 6];
        serial_number.copy_from_slice(&buf[8..14]);
        let msg_tag = u16::from_be_bytes([buf[14], buf[15]]);
        let ciphertext = buf[16..buf.len() - 16].to_vec();
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&buf[buf.len() - 16..]);
        Ok(Self {
            session_id,
            seq,
            serial_number,
            msg_tag,
            ciphertext,
            mac,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OVERHEAD + self.ciphertext.len());
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes()[2..8]);
        out.extend_from_slice(&self.serial_number);
        out.extend_from_slice(&self.msg_tag.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.mac);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let wrapper = SecureWrapper::new(
            0x0102,
            0x0000_0304_0506,
            [1, 2, 3, 4, 5, 6],
            0x0708,
            vec![0xAA; 10],
            [0xBB; 16],
        );
        let bytes = wrapper.to_bytes();
        let parsed = SecureWrapper::parse(&bytes).unwrap();
        assert_eq!(parsed, wrapper);
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(
            SecureWrapper::parse(&[0u8; 10]),
            Err(FrameError::Truncated { .. })
        ));
    }
}
