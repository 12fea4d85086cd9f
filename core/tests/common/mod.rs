// Shared fixtures for the gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use enocean_ble_core::{
    DeviceId, FrameBuilder, FrameMetadata, FrameSink, RadioCollaborator, RadioError, SecurityKey,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// In-process stand-in for a BLE adapter
#[derive(Default)]
pub struct FakeRadio {
    sink: Mutex<Option<FrameSink>>,
    last_sink: Mutex<Option<FrameSink>>,
    failures: Mutex<VecDeque<RadioError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    begin_calls: AtomicUsize,
    end_calls: AtomicUsize,
}

impl FakeRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `begin_scan` fails with `error`
    pub fn fail_next(&self, error: RadioError) {
        self.failures.lock().push_back(error);
    }

    /// The next `begin_scan` blocks until the returned handle is notified
    pub fn hold_next_begin(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Push a frame the way the adapter would while scanning.
    /// Returns `false` when no scan is active.
    pub fn emit(&self, device_id: DeviceId, raw: &[u8]) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.deliver(device_id, raw, FrameMetadata::now(Some(-55))),
            None => false,
        }
    }

    /// Sink from the most recent scan, even after it ended
    pub fn stale_sink(&self) -> Option<FrameSink> {
        self.last_sink.lock().clone()
    }

    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioCollaborator for FakeRadio {
    async fn begin_scan(&self, sink: FrameSink) -> Result<(), RadioError> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        *self.last_sink.lock() = Some(sink.clone());
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn end_scan(&self) -> Result<(), RadioError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock() = None;
        Ok(())
    }
}

pub const DEVICE: u32 = 0xAABB_CCDD;

pub fn device() -> DeviceId {
    DeviceId::new(DEVICE).unwrap()
}

pub fn key() -> SecurityKey {
    SecurityKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
}

/// Wall switch "on, battery 100" telegram
pub fn signed_frame(counter: u32) -> Vec<u8> {
    FrameBuilder::new(device(), counter)
        .payload(&[0x80, 0x64])
        .build_signed(&key())
        .unwrap()
}

pub fn unsigned_frame(counter: u32) -> Vec<u8> {
    FrameBuilder::new(device(), counter)
        .payload(&[0x80, 0x64])
        .build_unsigned()
        .unwrap()
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}
