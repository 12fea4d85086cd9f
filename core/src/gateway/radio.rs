//! Radio collaborator boundary
//!
//! The gateway never talks to a Bluetooth stack directly. A platform adapter
//! implements [`RadioCollaborator`], starts scanning when asked and pushes
//! every EnOcean advertisement it sees into the [`FrameSink`] it was given.

use super::lifecycle::GatewayInner;
use super::LifecycleError;
use crate::device::DeviceId;
use crate::telegram::FrameMetadata;
use async_trait::async_trait;
use std::fmt;
use std::sync::Weak;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("Bluetooth permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Other(String),
}

impl From<RadioError> for LifecycleError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::AdapterUnavailable(reason) => LifecycleError::AdapterUnavailable(reason),
            RadioError::PermissionDenied(reason) => LifecycleError::PermissionDenied(reason),
            RadioError::Other(reason) => LifecycleError::Radio(reason),
        }
    }
}

/// Platform BLE adapter driven by the gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioCollaborator: Send + Sync {
    /// Start scanning and deliver frames to `sink` until [`end_scan`](Self::end_scan)
    async fn begin_scan(&self, sink: FrameSink) -> Result<(), RadioError>;

    /// Stop scanning; no frames may be delivered after this returns
    async fn end_scan(&self) -> Result<(), RadioError>;
}

/// Handle the radio uses to hand raw frames to the gateway.
///
/// Holds only a weak reference: once the gateway is dropped, deliveries are
/// discarded.
#[derive(Clone)]
pub struct FrameSink {
    gateway: Weak<GatewayInner>,
}

impl FrameSink {
    pub(crate) fn new(gateway: Weak<GatewayInner>) -> Self {
        Self { gateway }
    }

    /// Hand one frame to the gateway. Returns `false` if the gateway is gone.
    pub fn deliver(&self, device_id: DeviceId, raw: &[u8], metadata: FrameMetadata) -> bool {
        match self.gateway.upgrade() {
            Some(gateway) => {
                gateway.on_raw_frame(device_id, raw, metadata);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.gateway.strong_count() > 0
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink")
            .field("connected", &self.is_connected())
            .finish()
    }
}
