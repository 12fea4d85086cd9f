//! Commissioning: per-device security material
//!
//! A device becomes trusted through an explicit commission call that stores
//! its AES key and resets its rolling counter. Every accepted telegram moves
//! the counter forward; only re-commissioning may move it back.

pub mod code;
pub mod store;

use crate::device::{DeviceId, SecurityKey};
use crate::store::StorageError;
use thiserror::Error;

pub use code::CommissioningData;
pub use store::CommissioningStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommissioningError {
    #[error("Invalid security key length: expected 16 bytes, got {actual}")]
    InvalidKeyLength { actual: usize },
    #[error("Invalid security key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid commissioning string: {0}")]
    InvalidCommissioningString(String),
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("Counter regression for {device_id}: stored {stored}, attempted {attempted}")]
    CounterRegression {
        device_id: DeviceId,
        stored: u32,
        attempted: u32,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Security state held for one commissioned device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningRecord {
    pub device_id: DeviceId,
    pub security_key: SecurityKey,
    /// Highest sequence counter accepted so far
    pub rolling_counter: u32,
}

/// Result of a commission call. Replacing an existing record is reported so
/// callers can see that the rolling counter was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionOutcome {
    Registered,
    Replaced { previous_counter: u32 },
}
