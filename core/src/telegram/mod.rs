//! Telegrams: decoded application messages from EnOcean BLE devices
//!
//! - **frame**: on-air byte layout, parsing and device-side encoding
//! - **codec**: turns a raw frame into a verified [`Telegram`]
//! - **wall_switch**: payload interpretation for rocker switches

pub mod codec;
pub mod frame;
pub mod wall_switch;

use crate::device::DeviceId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{DecodeError, DecodePolicy, Decoded, TelegramCodec};
pub use frame::{Frame, FrameBuilder};
pub use wall_switch::WallSwitchState;

/// Device model announced in the telegram control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    WallSwitch,
    Unknown(char),
}

impl DeviceModel {
    const WALL_SWITCH_CHAR: char = 'd';

    pub fn from_char(c: char) -> Self {
        match c {
            Self::WALL_SWITCH_CHAR => DeviceModel::WallSwitch,
            other => DeviceModel::Unknown(other),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            DeviceModel::WallSwitch => Self::WALL_SWITCH_CHAR,
            DeviceModel::Unknown(c) => *c,
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            DeviceModel::WallSwitch => "Wall Switch",
            DeviceModel::Unknown(_) => "Unknown",
        }
    }
}

/// Radio metadata attached to a received frame. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Signal strength in dBm, when the radio reports it
    pub rssi: Option<i16>,
    /// Unix timestamp in milliseconds
    pub received_at: u64,
}

impl FrameMetadata {
    pub fn new(rssi: Option<i16>, received_at: u64) -> Self {
        Self { rssi, received_at }
    }

    /// Metadata stamped with the current wall-clock time
    pub fn now(rssi: Option<i16>) -> Self {
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self { rssi, received_at }
    }
}

/// A verified telegram. Only the codec constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Telegram {
    source_id: DeviceId,
    model: DeviceModel,
    payload: Vec<u8>,
    sequence_counter: u32,
    authenticated: bool,
    rssi: Option<i16>,
    received_at: u64,
}

impl Telegram {
    pub(crate) fn new(
        frame: &Frame<'_>,
        authenticated: bool,
        metadata: FrameMetadata,
    ) -> Self {
        Self {
            source_id: frame.device_id(),
            model: frame.model(),
            payload: frame.payload().to_vec(),
            sequence_counter: frame.counter(),
            authenticated,
            rssi: metadata.rssi,
            received_at: metadata.received_at,
        }
    }

    pub fn source_id(&self) -> DeviceId {
        self.source_id
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sequence_counter(&self) -> u32 {
        self.sequence_counter
    }

    /// Whether the signature was checked against the device key
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn received_at(&self) -> u64 {
        self.received_at
    }

    /// Rocker state, for wall switch telegrams
    pub fn wall_switch(&self) -> Option<WallSwitchState> {
        match self.model {
            DeviceModel::WallSwitch => WallSwitchState::from_payload(&self.payload),
            DeviceModel::Unknown(_) => None,
        }
    }
}
