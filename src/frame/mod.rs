//! KNXnet/IP wire framing: header and service-body layouts.
//!
//! This module is deliberately dumb about anything past what the
//! data-endpoint handler and secure session store need to parse and
//! re-serialize (§6). cEMI payloads are carried as opaque bytes, see
//! [`cemi`].

pub mod body;
pub mod cemi;
pub mod header;

pub use body::{
    AckBody, AckStatus, ConnectionStateReqBody, FeatureId, FeatureResult, FeatureService,
    HostProtocol, Hpai, RequestBody,
};
pub use cemi::{CemiFrame, MessageCode};
pub use header::{KnxIpHeader, ServiceType, PROTOCOL_VERSION};
