//! Opaque cEMI frame handling.
//!
//! This crate never interprets a cEMI frame past its message code and, for
//! `L_Data.req`, the source/destination individual-address octets the
//! rewrite rule in §4.1 needs. Everything else is an opaque payload owned by
//! the (out-of-scope) bus driver.

use crate::address::IndividualAddress;

/// Message codes this crate needs to distinguish. Any other byte is carried
/// through as [`MessageCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    LDataReq,
    LDataCon,
    LDataInd,
    BusmonInd,
    PropReadReq,
    PropWriteReq,
    ResetReq,
    Other(u8),
}

impl MessageCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x11 => MessageCode::LDataReq,
            0x2E => MessageCode::LDataCon,
            0x29 => MessageCode::LDataInd,
            0x2B => MessageCode::BusmonInd,
            0xFC => MessageCode::PropReadReq,
            0xF6 => MessageCode::PropWriteReq,
            0xF1 => MessageCode::ResetReq,
            other => MessageCode::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MessageCode::LDataReq => 0x11,
            MessageCode::LDataCon => 0x2E,
            MessageCode::LDataInd => 0x29,
            MessageCode::BusmonInd => 0x2B,
            MessageCode::PropReadReq => 0xFC,
            MessageCode::PropWriteReq => 0xF6,
            MessageCode::ResetReq => 0xF1,
            MessageCode::Other(b) => b,
        }
    }
}

/// A cEMI frame: message code plus an opaque payload.
///
/// For `L_Data.*` frames the standard additional-info-length/control-field
/// layout places the source address at a fixed offset after the additional
/// info block; this crate only reaches into that layout for the one field
/// (`source`) the rewrite rule in §4.1 needs, via [`CemiFrame::source_address`]
/// and [`CemiFrame::set_source_address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CemiFrame {
    pub message_code: MessageCode,
    /// Everything after the message code byte, including additional info,
    /// control fields, source/destination addresses, and the APDU.
    pub data: Vec<u8>,
}

/// Minimum length of `data` for an `L_Data.*` frame: additional-info-length
/// (1) + 2 control octets + source (2) + destination (2) + npci/length (1).
const L_DATA_MIN_LEN: usize = 8;

impl CemiFrame {
    pub fn new(message_code: MessageCode, data: Vec<u8>) -> Self {
        Self { message_code, data }
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (&code, rest) = buf.split_first()?;
        Some(Self {
            message_code: MessageCode::from_byte(code),
            data: rest.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.message_code.to_byte());
        out.extend_from_slice(&self.data);
        out
    }

    /// Offset of the source address within `data`, accounting for the
    /// additional-info block's declared length (`data[0]`).
    fn source_offset(&self) -> Option<usize> {
        if self.data.len() < L_DATA_MIN_LEN {
            return None;
        }
        let additional_info_len = self.data[0] as usize;
        let offset = 1 + additional_info_len + 1; // additional info + 1 control byte
        if self.data.len() < offset + 2 {
            return None;
        }
        Some(offset)
    }

    /// Reads the source individual address of an `L_Data.*` frame, if present.
    pub fn source_address(&self) -> Option<IndividualAddress> {
        let offset = self.source_offset()?;
        Some(IndividualAddress::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
        ]))
    }

    /// Overwrites the source individual address of an `L_Data.*` frame.
    pub fn set_source_address(&mut self, addr: IndividualAddress) -> bool {
        match self.source_offset() {
            Some(offset) => {
                let bytes = addr.to_be_bytes();
                self.data[offset] = bytes[0];
                self.data[offset + 1] = bytes[1];
                true
            }
            None => false,
        }
    }
}
