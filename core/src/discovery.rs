//! EnOcean advertisement discovery
//!
//! Recognises EnOcean manufacturer data in BLE advertisements and summarises
//! what a device is announcing, without touching the commissioning store.
//! Used for listing nearby devices before they are commissioned.

use crate::device::DeviceId;
use crate::telegram::frame::{self, Frame, ENOCEAN_MANUFACTURER_ID};
use crate::telegram::{DeviceModel, WallSwitchState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Scan timing used by discovery and by gateway start retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a discovery scan runs (default 5s)
    pub scan_timeout_secs: u64,
    /// How many times a failed start is retried (default 3)
    pub retry_count: u32,
    /// Pause between retries (default 1s)
    pub retry_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 5,
            retry_count: 3,
            retry_timeout_secs: 1,
        }
    }
}

impl ScanConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_timeout_secs)
    }
}

/// One EnOcean advertisement seen on the air
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnOceanAdvertisement {
    /// Bluetooth address as reported by the platform
    pub address: String,
    pub device_id: DeviceId,
    pub model: DeviceModel,
    pub signed: bool,
    pub counter: u32,
    pub rssi: Option<i16>,
    pub wall_switch: Option<WallSwitchState>,
    /// The rebuilt frame, ready for [`crate::Gateway::on_raw_frame`]
    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Pick the EnOcean entry out of a platform's manufacturer data map.
///
/// Returns `None` for non-EnOcean advertisements and for EnOcean data that
/// does not form a valid frame.
pub fn parse_advertisement(
    address: &str,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    rssi: Option<i16>,
) -> Option<EnOceanAdvertisement> {
    let data = manufacturer_data.get(&ENOCEAN_MANUFACTURER_ID)?;
    let raw = frame::from_manufacturer_data(ENOCEAN_MANUFACTURER_ID, data)?;
    let parsed = Frame::parse(&raw).ok()?;

    let model = parsed.model();
    let wall_switch = match model {
        DeviceModel::WallSwitch => WallSwitchState::from_payload(parsed.payload()),
        DeviceModel::Unknown(_) => None,
    };

    Some(EnOceanAdvertisement {
        address: address.to_string(),
        device_id: parsed.device_id(),
        model,
        signed: parsed.is_signed(),
        counter: parsed.counter(),
        rssi,
        wall_switch,
        raw,
    })
}
