use crate::error::FrameError;
use crate::frame::cemi::CemiFrame;
use std::net::{Ipv4Addr, SocketAddrV4};

const BODY_SIZE: u8 = 0x04;

/// Status codes carried in an ack body. Only the two values this crate
/// produces/consumes are named; anything else round-trips as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    NoError,
    VersionNotSupported,
    Other(u8),
}

impl AckStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            AckStatus::NoError => 0x00,
            AckStatus::VersionNotSupported => 0x21,
            AckStatus::Other(b) => b,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => AckStatus::NoError,
            0x21 => AckStatus::VersionNotSupported,
            other => AckStatus::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, AckStatus::NoError)
    }
}

/// `TUNNELING_REQ` / `DEVICE_CONFIGURATION_REQ` body: `{size=0x04, channel_id, seq, reserved=0, cEMI...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub channel_id: u8,
    pub seq: u8,
    pub cemi: CemiFrame,
}

impl RequestBody {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: buf.len(),
            });
        }
        if buf[0] != BODY_SIZE {
            return Err(FrameError::BadBodySize(buf[0]));
        }
        let channel_id = buf[1];
        let seq = buf[2];
        // buf[3] is the reserved octet.
        let cemi = CemiFrame::parse(&buf[4..]).unwrap_or(CemiFrame {
            message_code: crate::frame::cemi::MessageCode::Other(0),
            data: Vec::new(),
        });
        Ok(Self {
            channel_id,
            seq,
            cemi,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![BODY_SIZE, self.channel_id, self.seq, 0x00];
        out.extend_from_slice(&self.cemi.to_bytes());
        out
    }
}

/// `TUNNELING_ACK` / `DEVICE_CONFIGURATION_ACK` body: `{size=0x04, channel_id, seq, status}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckBody {
    pub channel_id: u8,
    pub seq: u8,
    pub status: AckStatus,
}

impl AckBody {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: buf.len(),
            });
        }
        if buf[0] != BODY_SIZE {
            return Err(FrameError::BadBodySize(buf[0]));
        }
        Ok(Self {
            channel_id: buf[1],
            seq: buf[2],
            status: AckStatus::from_byte(buf[3]),
        })
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [BODY_SIZE, self.channel_id, self.seq, self.status.to_byte()]
    }
}

/// Feature ids recognized by the tunneling-feature service, per §4.1's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureId {
    SupportedEmiTypes,
    IndividualAddress,
    MaxApduLength,
    DeviceDescriptorType0,
    ConnectionStatus,
    Manufacturer,
    ActiveEmiType,
    EnableFeatureInfoService,
    Unknown(u8),
}

impl FeatureId {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => FeatureId::SupportedEmiTypes,
            0x02 => FeatureId::DeviceDescriptorType0,
            0x03 => FeatureId::ConnectionStatus,
            0x04 => FeatureId::Manufacturer,
            0x05 => FeatureId::ActiveEmiType,
            0x06 => FeatureId::IndividualAddress,
            0x07 => FeatureId::MaxApduLength,
            0x08 => FeatureId::EnableFeatureInfoService,
            other => FeatureId::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FeatureId::SupportedEmiTypes => 0x01,
            FeatureId::DeviceDescriptorType0 => 0x02,
            FeatureId::ConnectionStatus => 0x03,
            FeatureId::Manufacturer => 0x04,
            FeatureId::ActiveEmiType => 0x05,
            FeatureId::IndividualAddress => 0x06,
            FeatureId::MaxApduLength => 0x07,
            FeatureId::EnableFeatureInfoService => 0x08,
            FeatureId::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureResult {
    Success,
    AccessReadOnly,
}

impl FeatureResult {
    pub fn to_byte(self) -> u8 {
        match self {
            FeatureResult::Success => 0x00,
            FeatureResult::AccessReadOnly => 0x01,
        }
    }
}

/// `TUNNELING_FEATURE_GET`/`_SET`/`_RESPONSE` body:
/// `{size=0x04, channel_id, seq, feature_id, [result,] value...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureService {
    pub channel_id: u8,
    pub seq: u8,
    pub feature_id: FeatureId,
    /// For GET: empty. For SET: the value the client asked to write.
    /// For RESPONSE: the returned value.
    pub value: Vec<u8>,
}

impl FeatureService {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::Truncated {
                need: 4,
                have: buf.len(),
            });
        }
        if buf[0] != BODY_SIZE {
            return Err(FrameError::BadBodySize(buf[0]));
        }
        Ok(Self {
            channel_id: buf[1],
            seq: buf[2],
            feature_id: FeatureId::from_byte(buf[3]),
            value: buf[4..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![BODY_SIZE, self.channel_id, self.seq, self.feature_id.to_byte()];
        out.extend_from_slice(&self.value);
        out
    }

    pub fn response(
        channel_id: u8,
        seq: u8,
        feature_id: FeatureId,
        result: FeatureResult,
        value: Vec<u8>,
    ) -> Vec<u8> {
        let mut out = vec![BODY_SIZE, channel_id, seq, feature_id.to_byte(), result.to_byte()];
        out.extend_from_slice(&value);
        out
    }
}

/// HPAI: "host protocol address information", a wire struct carrying
/// endpoint host+port, per the glossary. Only `IPV4_UDP` is accepted, per §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    pub host_protocol: HostProtocol,
    pub endpoint: SocketAddrV4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProtocol {
    Ipv4Udp,
    Ipv4Tcp,
}

impl HostProtocol {
    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x01 => Ok(HostProtocol::Ipv4Udp),
            0x02 => Ok(HostProtocol::Ipv4Tcp),
            other => Err(FrameError::UnknownHostProtocol(other)),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            HostProtocol::Ipv4Udp => 0x01,
            HostProtocol::Ipv4Tcp => 0x02,
        }
    }
}

impl Hpai {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 8 {
            return Err(FrameError::Truncated {
                need: 8,
                have: buf.len(),
            });
        }
        let host_protocol = HostProtocol::from_byte(buf[1])?;
        let ip = Ipv4Addr::new(buf[2], buf[3], buf[4], buf[5]);
        let port = u16::from_be_bytes([buf[6], buf[7]]);
        Ok(Self {
            host_protocol,
            endpoint: SocketAddrV4::new(ip, port),
        })
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let ip = self.endpoint.ip().octets();
        let port = self.endpoint.port().to_be_bytes();
        [
            0x08,
            self.host_protocol.to_byte(),
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            port[0],
            port[1],
        ]
    }
}

/// `CONNECTIONSTATE_REQ` body: `{channel_id, reserved, HPAI control_endpoint}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateReqBody {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl ConnectionStateReqBody {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::Truncated {
                need: 2,
                have: buf.len(),
            });
        }
        let channel_id = buf[0];
        let control_endpoint = Hpai::parse(&buf[2..])?;
        Ok(Self {
            channel_id,
            control_endpoint,
        })
    }
}
