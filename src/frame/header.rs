use crate::error::FrameError;

/// KNXnet/IP protocol version this crate speaks; anything else is rejected.
pub const PROTOCOL_VERSION: u8 = 0x10;

const HEADER_SIZE: u8 = 0x06;

/// Service types this crate's two components own, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceType {
    ConnectionStateReq,
    ConnectionStateRes,
    TunnelingReq,
    TunnelingAck,
    TunnelingFeatureGet,
    TunnelingFeatureResponse,
    TunnelingFeatureSet,
    DeviceConfigurationReq,
    DeviceConfigurationAck,
    SecureSvc,
    SessionReq,
    SessionRes,
    SessionAuth,
    SessionStatus,
    /// Any other code; the loop adapter hands it to a different owner.
    Other(u16),
}

impl ServiceType {
    pub fn code(self) -> u16 {
        match self {
            ServiceType::ConnectionStateReq => 0x0207,
            ServiceType::ConnectionStateRes => 0x0208,
            ServiceType::TunnelingReq => 0x0420,
            ServiceType::TunnelingAck => 0x0421,
            ServiceType::TunnelingFeatureGet => 0x0422,
            ServiceType::TunnelingFeatureResponse => 0x0423,
            ServiceType::TunnelingFeatureSet => 0x0424,
            ServiceType::DeviceConfigurationReq => 0x0310,
            ServiceType::DeviceConfigurationAck => 0x0311,
            ServiceType::SecureSvc => 0x0950,
            ServiceType::SessionReq => 0x0951,
            ServiceType::SessionRes => 0x0952,
            ServiceType::SessionAuth => 0x0953,
            ServiceType::SessionStatus => 0x0954,
            ServiceType::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0207 => ServiceType::ConnectionStateReq,
            0x0208 => ServiceType::ConnectionStateRes,
            0x0420 => ServiceType::TunnelingReq,
            0x0421 => ServiceType::TunnelingAck,
            0x0422 => ServiceType::TunnelingFeatureGet,
            0x0423 => ServiceType::TunnelingFeatureResponse,
            0x0424 => ServiceType::TunnelingFeatureSet,
            0x0310 => ServiceType::DeviceConfigurationReq,
            0x0311 => ServiceType::DeviceConfigurationAck,
            0x0950 => ServiceType::SecureSvc,
            0x0951 => ServiceType::SessionReq,
            0x0952 => ServiceType::SessionRes,
            0x0953 => ServiceType::SessionAuth,
            0x0954 => ServiceType::SessionStatus,
            other => ServiceType::Other(other),
        }
    }
}

/// The 6-byte header every KNXnet/IP frame begins with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxIpHeader {
    pub version: u8,
    pub service_type: ServiceType,
    pub total_length: u16,
}

impl KnxIpHeader {
    pub fn new(service_type: ServiceType, total_length: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service_type,
            total_length,
        }
    }

    /// Parses and sanitizes a header: `total_length <= buffer_length`,
    /// `service_type != 0`, per §4.3. Version is *not* rejected here; the
    /// data-endpoint handler decides whether to ack `VERSION_NOT_SUPPORTED`
    /// or to drop outright, depending on which service carried it.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 6 {
            return Err(FrameError::Truncated {
                need: 6,
                have: buf.len(),
            });
        }
        let size = buf[0];
        if size != HEADER_SIZE {
            return Err(FrameError::BadHeaderSize(size));
        }
        let version = buf[1];
        let code = u16::from_be_bytes([buf[2], buf[3]]);
        if code == 0 {
            return Err(FrameError::ZeroServiceType);
        }
        let total_length = u16::from_be_bytes([buf[4], buf[5]]);
        if total_length as usize > buf.len() {
            return Err(FrameError::LengthMismatch {
                total: total_length as usize,
                buffer: buf.len(),
            });
        }
        Ok(Self {
            version,
            service_type: ServiceType::from_code(code),
            total_length,
        })
    }

    pub fn is_supported_version(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let code = self.service_type.code().to_be_bytes();
        let len = self.total_length.to_be_bytes();
        [HEADER_SIZE, self.version, code[0], code[1], len[0], len[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_bytes() {
        let header = KnxIpHeader::new(ServiceType::TunnelingReq, 16);
        let bytes = header.to_bytes();
        let parsed = KnxIpHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_length_exceeding_buffer() {
        let mut bytes = KnxIpHeader::new(ServiceType::TunnelingReq, 200).to_bytes();
        bytes[4..6].copy_from_slice(&200u16.to_be_bytes());
        assert!(matches!(
            KnxIpHeader::parse(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_zero_service_type() {
        let mut bytes = KnxIpHeader::new(ServiceType::TunnelingReq, 6).to_bytes();
        bytes[2] = 0;
        bytes[3] = 0;
        assert!(matches!(
            KnxIpHeader::parse(&bytes),
            Err(FrameError::ZeroServiceType)
        ));
    }
}
