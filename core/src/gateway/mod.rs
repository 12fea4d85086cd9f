//! Gateway: lifecycle, dispatch and auth policy
//!
//! - **lifecycle**: the [`Gateway`] state machine that owns start/stop and
//!   turns raw frames into observer callbacks
//! - **radio**: the BLE collaborator boundary ([`RadioCollaborator`], [`FrameSink`])

pub mod lifecycle;
pub mod radio;

use crate::commissioning::CommissioningError;
use crate::device::DeviceId;
use crate::security::SecurityError;
use crate::telegram::{DecodeError, DecodePolicy, Telegram};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use lifecycle::{Gateway, GatewayStats};
pub use radio::{FrameSink, RadioCollaborator, RadioError};

/// Options passed to [`Gateway::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayOptions {
    /// Only accept signed telegrams whose signature verifies
    pub auth_required: bool,
    /// Reject non-increasing counters on unsigned traffic too
    pub enforce_counter_monotonicity: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            auth_required: true,
            enforce_counter_monotonicity: true,
        }
    }
}

impl GatewayOptions {
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Accept unsigned telegrams (counter ordering still enforced)
    pub fn unauthenticated() -> Self {
        Self {
            auth_required: false,
            ..Self::default()
        }
    }

    pub fn with_counter_monotonicity(mut self, enforce: bool) -> Self {
        self.enforce_counter_monotonicity = enforce;
        self
    }
}

impl From<GatewayOptions> for DecodePolicy {
    fn from(options: GatewayOptions) -> Self {
        DecodePolicy {
            auth_required: options.auth_required,
            enforce_counter_monotonicity: options.enforce_counter_monotonicity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    Starting,
    Monitoring,
    Stopping,
    Stopped,
    Failed(String),
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayState::Idle => write!(f, "Idle"),
            GatewayState::Starting => write!(f, "Starting"),
            GatewayState::Monitoring => write!(f, "Monitoring"),
            GatewayState::Stopping => write!(f, "Stopping"),
            GatewayState::Stopped => write!(f, "Stopped"),
            GatewayState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Gateway is already started")]
    AlreadyStarted,
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(String),
    #[error("Radio error: {0}")]
    Radio(String),
    #[error("Start cancelled by stop")]
    Cancelled,
}

/// Everything reported through the error observer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Rejected frame from {device_id}: {source}")]
    FrameRejected {
        device_id: DeviceId,
        #[source]
        source: DecodeError,
    },
    #[error("Commissioning error: {0}")]
    Commissioning(#[from] CommissioningError),
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

impl GatewayError {
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            GatewayError::FrameRejected { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn security_error(&self) -> Option<SecurityError> {
        match self.decode_error() {
            Some(DecodeError::Security(e)) => Some(*e),
            _ => None,
        }
    }
}

/// Receives every accepted telegram, exactly once
pub trait TelegramObserver: Send + Sync {
    fn on_telegram(&self, telegram: Telegram);
}

impl<F> TelegramObserver for F
where
    F: Fn(Telegram) + Send + Sync,
{
    fn on_telegram(&self, telegram: Telegram) {
        self(telegram)
    }
}

/// Side channel for rejected frames and lifecycle failures
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, error: GatewayError);
}

impl<F> ErrorObserver for F
where
    F: Fn(GatewayError) + Send + Sync,
{
    fn on_error(&self, error: GatewayError) {
        self(error)
    }
}
