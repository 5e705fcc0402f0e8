//! Tunneling-feature GET/SET table (§4.1 "Tunneling-feature responses").

use crate::address::IndividualAddress;
use crate::frame::body::{FeatureId, FeatureResult};

/// Backing store for the feature table. Every field but
/// `EnableFeatureInfoService` is computed on the fly from fixed values or
/// the channel's assigned address; only that one field is writable.
pub struct FeatureTable {
    enable_feature_info_service: u8,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self {
            enable_feature_info_service: 0x00,
        }
    }

    pub fn get(&self, feature_id: FeatureId, assigned_address: IndividualAddress) -> Vec<u8> {
        match feature_id {
            FeatureId::SupportedEmiTypes => vec![0x00, 0x00],
            FeatureId::IndividualAddress => assigned_address.to_be_bytes().to_vec(),
            FeatureId::MaxApduLength => vec![0x00, 0x0F],
            FeatureId::DeviceDescriptorType0 => vec![0x09, 0x1A],
            FeatureId::ConnectionStatus => vec![0x01],
            FeatureId::Manufacturer => vec![0x00, 0x00],
            FeatureId::ActiveEmiType => vec![0x00],
            FeatureId::EnableFeatureInfoService => vec![self.enable_feature_info_service],
            FeatureId::Unknown(_) => Vec::new(),
        }
    }

    pub fn set(&mut self, feature_id: FeatureId, value: &[u8]) -> FeatureResult {
        match feature_id {
            FeatureId::EnableFeatureInfoService => {
                if let Some(&b) = value.first() {
                    self.enable_feature_info_service = b;
                }
                FeatureResult::Success
            }
            _ => FeatureResult::AccessReadOnly,
        }
    }
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::new()
    }
}
