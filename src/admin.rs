//! Administrative payloads sent to the local device.
//!
//! Only one request exists: ask the firmware to back up its preferences to the SD card.

use prost::Message;

use crate::protobuf::meshtastic_generated as proto;
use proto::admin_message::{BackupLocation, PayloadVariant};

/// A single "back up preferences" admin request. The target is always the SD card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupRequest {
    _private: (),
}

impl BackupRequest {
    pub fn sd_card() -> Self {
        Self { _private: () }
    }

    pub fn location(&self) -> BackupLocation {
        BackupLocation::Sd
    }

    /// Application port the request travels on.
    pub fn port_num(&self) -> proto::PortNum {
        proto::PortNum::AdminApp
    }

    pub fn to_admin_message(&self) -> proto::AdminMessage {
        proto::AdminMessage {
            payload_variant: Some(PayloadVariant::BackupPreferences(self.location() as i32)),
            ..Default::default()
        }
    }

    /// Wire bytes of the `AdminMessage`.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.to_admin_message().encode_to_vec()
    }
}
