//! Gateway lifecycle and telegram dispatch
//!
//! Owns the Idle → Starting → Monitoring → Stopping → Stopped state machine,
//! drives the radio collaborator, and turns raw frames into observer
//! callbacks. Frames are processed one at a time so verification and the
//! counter update form a single step.

use super::radio::{FrameSink, RadioCollaborator};
use super::{
    ErrorObserver, GatewayError, GatewayOptions, GatewayState, LifecycleError, TelegramObserver,
};
use crate::commissioning::{CommissioningError, CommissioningStore};
use crate::device::DeviceId;
use crate::security::SecurityError;
use crate::telegram::{DecodeError, FrameMetadata, Telegram, TelegramCodec};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Gateway counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub telegrams_accepted: u64,
    pub frames_rejected: u64,
    /// Frames that arrived while not monitoring
    pub frames_ignored: u64,
}

struct Lifecycle {
    state: GatewayState,
    stop_requested: bool,
    codec: TelegramCodec,
}

pub(crate) struct GatewayInner {
    store: Arc<CommissioningStore>,
    radio: Arc<dyn RadioCollaborator>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<GatewayState>,
    frame_lock: Mutex<()>,
    telegram_observer: RwLock<Option<Arc<dyn TelegramObserver>>>,
    error_observer: RwLock<Option<Arc<dyn ErrorObserver>>>,
    stats: RwLock<GatewayStats>,
}

/// EnOcean BLE telegram gateway.
///
/// Cheap to clone; clones share the same state, store and observers.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(store: Arc<CommissioningStore>, radio: Arc<dyn RadioCollaborator>) -> Self {
        let (state_tx, _) = watch::channel(GatewayState::Idle);
        Self {
            inner: Arc::new(GatewayInner {
                store,
                radio,
                lifecycle: Mutex::new(Lifecycle {
                    state: GatewayState::Idle,
                    stop_requested: false,
                    codec: TelegramCodec::default(),
                }),
                state_tx,
                frame_lock: Mutex::new(()),
                telegram_observer: RwLock::new(None),
                error_observer: RwLock::new(None),
                stats: RwLock::new(GatewayStats::default()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CommissioningStore> {
        &self.inner.store
    }

    pub fn state(&self) -> GatewayState {
        self.inner.lifecycle.lock().state.clone()
    }

    /// Watch state transitions as they happen
    pub fn subscribe_state(&self) -> watch::Receiver<GatewayState> {
        self.inner.state_tx.subscribe()
    }

    pub fn stats(&self) -> GatewayStats {
        *self.inner.stats.read()
    }

    /// Register a device key with counter 0, replacing any previous record
    pub fn commission(&self, device_id: DeviceId, key: &[u8]) -> Result<(), CommissioningError> {
        self.inner.store.commission(device_id, key).map(|_| ())
    }

    pub fn decommission(&self, device_id: DeviceId) -> Result<(), CommissioningError> {
        self.inner.store.decommission(device_id).map(|_| ())
    }

    /// Replace the telegram observer
    pub fn on_telegram<O: TelegramObserver + 'static>(&self, observer: O) {
        *self.inner.telegram_observer.write() = Some(Arc::new(observer));
    }

    /// Replace the error observer
    pub fn on_error<O: ErrorObserver + 'static>(&self, observer: O) {
        *self.inner.error_observer.write() = Some(Arc::new(observer));
    }

    pub fn clear_observers(&self) {
        *self.inner.telegram_observer.write() = None;
        *self.inner.error_observer.write() = None;
    }

    /// Begin monitoring. Valid from Idle, Stopped or Failed.
    ///
    /// A `stop()` issued while the radio is still starting wins: the scan is
    /// torn down again and this returns [`LifecycleError::Cancelled`].
    pub async fn start(&self, options: GatewayOptions) -> Result<(), LifecycleError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                GatewayState::Idle | GatewayState::Stopped | GatewayState::Failed(_) => {}
                _ => return Err(LifecycleError::AlreadyStarted),
            }
            lifecycle.codec = TelegramCodec::new(options.into());
            lifecycle.stop_requested = false;
            self.inner.transition(&mut lifecycle, GatewayState::Starting);
        }
        let mut settle = SettleGuard::new(&self.inner);

        info!(
            "Starting gateway (auth_required={}, enforce_counter_monotonicity={})",
            options.auth_required, options.enforce_counter_monotonicity
        );

        let sink = FrameSink::new(Arc::downgrade(&self.inner));
        let outcome = self.inner.radio.begin_scan(sink).await;

        let cancelled = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.stop_requested {
                self.inner.transition(&mut lifecycle, GatewayState::Stopping);
                true
            } else {
                let next = match &outcome {
                    Ok(()) => GatewayState::Monitoring,
                    Err(e) => GatewayState::Failed(e.to_string()),
                };
                self.inner.transition(&mut lifecycle, next);
                settle.disarm();
                false
            }
        };

        if cancelled {
            if outcome.is_ok() {
                if let Err(e) = self.inner.radio.end_scan().await {
                    warn!("Failed to end scan after cancelled start: {}", e);
                }
            }
            self.inner.finish_stop();
            settle.disarm();
            return match outcome {
                Ok(()) => Err(LifecycleError::Cancelled),
                Err(e) => {
                    let err = LifecycleError::from(e);
                    error!("Gateway failed to start: {}", err);
                    self.inner.report_error(GatewayError::Lifecycle(err.clone()));
                    Err(err)
                }
            };
        }

        match outcome {
            Ok(()) => {
                info!("Gateway monitoring");
                Ok(())
            }
            Err(e) => {
                let err = LifecycleError::from(e);
                error!("Gateway failed to start: {}", err);
                self.inner.report_error(GatewayError::Lifecycle(err.clone()));
                Err(err)
            }
        }
    }

    /// Stop monitoring. Idempotent: stopping an idle, stopped or failed
    /// gateway succeeds without touching the radio.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let must_end_scan = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state {
                GatewayState::Idle | GatewayState::Stopped | GatewayState::Failed(_) => {
                    return Ok(());
                }
                GatewayState::Monitoring => {
                    self.inner.transition(&mut lifecycle, GatewayState::Stopping);
                    true
                }
                GatewayState::Starting => {
                    debug!("Stop requested while starting");
                    lifecycle.stop_requested = true;
                    false
                }
                GatewayState::Stopping => false,
            }
        };

        if !must_end_scan {
            // Another call owns the teardown; wait for it to settle
            let mut rx = self.inner.state_tx.subscribe();
            let _ = rx
                .wait_for(|state| {
                    !matches!(state, GatewayState::Starting | GatewayState::Stopping)
                })
                .await;
            return Ok(());
        }

        let mut settle = SettleGuard::new(&self.inner);
        if let Err(e) = self.inner.radio.end_scan().await {
            warn!("Radio failed to end scan: {}", e);
            self.inner
                .report_error(GatewayError::Lifecycle(LifecycleError::from(e)));
        }
        self.inner.finish_stop();
        settle.disarm();
        info!("Gateway stopped");
        Ok(())
    }

    /// Process one raw frame from `device_id`. Normally called through the
    /// [`FrameSink`] handed to the radio.
    pub fn on_raw_frame(&self, device_id: DeviceId, raw: &[u8], metadata: FrameMetadata) {
        self.inner.on_raw_frame(device_id, raw, metadata);
    }
}

impl GatewayInner {
    fn transition(&self, lifecycle: &mut Lifecycle, next: GatewayState) {
        info!("Gateway state {} -> {}", lifecycle.state, next);
        lifecycle.state = next.clone();
        self.state_tx.send_replace(next);
    }

    fn finish_stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.stop_requested = false;
        self.transition(&mut lifecycle, GatewayState::Stopped);
    }

    /// Codec for the current run, or `None` when frames must be ignored
    fn active_codec(&self) -> Option<TelegramCodec> {
        let lifecycle = self.lifecycle.lock();
        (lifecycle.state == GatewayState::Monitoring).then_some(lifecycle.codec)
    }

    /// Move a lifecycle call that never finished out of Starting/Stopping
    fn settle_abandoned(&self) {
        let mut lifecycle = self.lifecycle.lock();
        let next = match lifecycle.state {
            GatewayState::Stopping => GatewayState::Stopped,
            GatewayState::Starting if lifecycle.stop_requested => GatewayState::Stopped,
            GatewayState::Starting => GatewayState::Failed("start cancelled".to_string()),
            _ => return,
        };
        warn!("Lifecycle call dropped while {}", lifecycle.state);
        lifecycle.stop_requested = false;
        self.transition(&mut lifecycle, next);
    }

    pub(crate) fn on_raw_frame(&self, device_id: DeviceId, raw: &[u8], metadata: FrameMetadata) {
        // State and policy are read under the frame lock so a frame queued
        // behind a restart is judged by the new run
        let _guard = self.frame_lock.lock();
        let Some(codec) = self.active_codec() else {
            debug!("Ignoring frame from {} while not monitoring", device_id);
            self.stats.write().frames_ignored += 1;
            return;
        };

        match self.accept(&codec, device_id, raw, metadata) {
            Ok(telegram) => {
                self.stats.write().telegrams_accepted += 1;
                debug!(
                    "Accepted telegram from {} (counter {})",
                    device_id,
                    telegram.sequence_counter()
                );
                let observer = self.telegram_observer.read().clone();
                if let Some(observer) = observer {
                    observer.on_telegram(telegram);
                }
            }
            Err(e) => {
                self.stats.write().frames_rejected += 1;
                warn!("{}", e);
                self.report_error(e);
            }
        }
    }

    /// Decode, verify and commit the counter. Caller holds the frame lock.
    fn accept(
        &self,
        codec: &TelegramCodec,
        device_id: DeviceId,
        raw: &[u8],
        metadata: FrameMetadata,
    ) -> Result<Telegram, GatewayError> {
        let rejected = |source: DecodeError| GatewayError::FrameRejected { device_id, source };

        let decoded = codec
            .decode(&self.store, device_id, raw, metadata)
            .map_err(rejected)?;

        if let Some(counter) = decoded.advance_to {
            match self.store.advance_counter(device_id, counter) {
                Ok(()) => {}
                Err(CommissioningError::CounterRegression {
                    stored, attempted, ..
                }) => {
                    return Err(rejected(
                        SecurityError::ReplayDetected {
                            claimed: attempted,
                            stored,
                        }
                        .into(),
                    ));
                }
                Err(CommissioningError::UnknownDevice(id)) => {
                    return Err(rejected(DecodeError::UnknownDevice(id)));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(decoded.telegram)
    }

    fn report_error(&self, error: GatewayError) {
        let observer = self.error_observer.read().clone();
        if let Some(observer) = observer {
            observer.on_error(error);
        }
    }
}

/// Settles the state machine if a `start()` or `stop()` future is dropped
/// mid-flight (for example by a caller's timeout).
///
/// No `end_scan` is issued from here: a detached teardown could land after
/// the next `begin_scan` and silence the new run.
struct SettleGuard<'a> {
    inner: &'a GatewayInner,
    armed: bool,
}

impl<'a> SettleGuard<'a> {
    fn new(inner: &'a GatewayInner) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle_abandoned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::radio::{MockRadioCollaborator, RadioError};
    use crate::telegram::FrameBuilder;
    use crate::device::SecurityKey;

    fn device() -> DeviceId {
        DeviceId::new(0xAABB_CCDD).unwrap()
    }

    fn key() -> SecurityKey {
        SecurityKey::from([0x11; 16])
    }

    fn working_radio() -> MockRadioCollaborator {
        let mut radio = MockRadioCollaborator::new();
        radio.expect_begin_scan().returning(|_| Ok(()));
        radio.expect_end_scan().returning(|| Ok(()));
        radio
    }

    fn gateway_with(radio: MockRadioCollaborator) -> Gateway {
        let store = Arc::new(CommissioningStore::memory());
        store.commission(device(), key().as_bytes()).unwrap();
        Gateway::new(store, Arc::new(radio))
    }

    fn collect(gateway: &Gateway) -> (Arc<Mutex<Vec<Telegram>>>, Arc<Mutex<Vec<GatewayError>>>) {
        let telegrams = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = telegrams.clone();
        gateway.on_telegram(move |t: Telegram| sink.lock().push(t));
        let sink = errors.clone();
        gateway.on_error(move |e: GatewayError| sink.lock().push(e));
        (telegrams, errors)
    }

    fn signed(counter: u32) -> Vec<u8> {
        FrameBuilder::new(device(), counter)
            .payload(&[0x80, 0x64])
            .build_signed(&key())
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut radio = MockRadioCollaborator::new();
        radio.expect_begin_scan().times(1).returning(|_| Ok(()));
        radio.expect_end_scan().times(1).returning(|| Ok(()));
        let gateway = gateway_with(radio);

        assert_eq!(gateway.state(), GatewayState::Idle);
        gateway.start(GatewayOptions::default()).await.unwrap();
        assert_eq!(gateway.state(), GatewayState::Monitoring);

        gateway.stop().await.unwrap();
        assert_eq!(gateway.state(), GatewayState::Stopped);

        // Second stop is a no-op
        gateway.stop().await.unwrap();
        assert_eq!(gateway.state(), GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let gateway = gateway_with(working_radio());
        gateway.start(GatewayOptions::default()).await.unwrap();
        assert_eq!(
            gateway.start(GatewayOptions::default()).await,
            Err(LifecycleError::AlreadyStarted)
        );
        assert_eq!(gateway.state(), GatewayState::Monitoring);
    }

    #[tokio::test]
    async fn test_stop_from_idle_skips_radio() {
        let mut radio = MockRadioCollaborator::new();
        radio.expect_end_scan().never();
        let gateway = gateway_with(radio);
        gateway.stop().await.unwrap();
        assert_eq!(gateway.state(), GatewayState::Idle);
    }

    #[tokio::test]
    async fn test_adapter_failure_moves_to_failed() {
        let mut radio = MockRadioCollaborator::new();
        radio
            .expect_begin_scan()
            .times(1)
            .returning(|_| Err(RadioError::AdapterUnavailable("no adapter".into())));
        let gateway = gateway_with(radio);
        let (_, errors) = collect(&gateway);

        let result = gateway.start(GatewayOptions::default()).await;
        assert_eq!(
            result,
            Err(LifecycleError::AdapterUnavailable("no adapter".into()))
        );
        assert!(matches!(gateway.state(), GatewayState::Failed(_)));

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            GatewayError::Lifecycle(LifecycleError::AdapterUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_after_failure() {
        let mut radio = MockRadioCollaborator::new();
        let mut seq = mockall::Sequence::new();
        radio
            .expect_begin_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RadioError::PermissionDenied("bluetooth".into())));
        radio
            .expect_begin_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let gateway = gateway_with(radio);

        assert_eq!(
            gateway.start(GatewayOptions::default()).await,
            Err(LifecycleError::PermissionDenied("bluetooth".into()))
        );
        gateway.start(GatewayOptions::default()).await.unwrap();
        assert_eq!(gateway.state(), GatewayState::Monitoring);
    }

    #[tokio::test]
    async fn test_frames_dispatched_while_monitoring() {
        let gateway = gateway_with(working_radio());
        let (telegrams, errors) = collect(&gateway);

        // Before start: dropped silently
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());
        assert!(telegrams.lock().is_empty());
        assert_eq!(gateway.stats().frames_ignored, 1);

        gateway.start(GatewayOptions::default()).await.unwrap();
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());

        assert_eq!(telegrams.lock().len(), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].security_error(),
            Some(SecurityError::ReplayDetected {
                claimed: 1,
                stored: 1
            })
        );
        assert_eq!(gateway.state(), GatewayState::Monitoring);
        assert_eq!(gateway.store().lookup(device()).unwrap().rolling_counter, 1);

        let stats = gateway.stats();
        assert_eq!(stats.telegrams_accepted, 1);
        assert_eq!(stats.frames_rejected, 1);
    }

    #[tokio::test]
    async fn test_frames_ignored_after_stop() {
        let gateway = gateway_with(working_radio());
        let (telegrams, _) = collect(&gateway);

        gateway.start(GatewayOptions::default()).await.unwrap();
        gateway.stop().await.unwrap();
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());

        assert!(telegrams.lock().is_empty());
        assert_eq!(gateway.store().lookup(device()).unwrap().rolling_counter, 0);
    }

    #[tokio::test]
    async fn test_sink_delivers_into_gateway() {
        let captured: Arc<Mutex<Option<FrameSink>>> = Arc::new(Mutex::new(None));
        let slot = captured.clone();
        let mut radio = MockRadioCollaborator::new();
        radio.expect_begin_scan().returning(move |sink| {
            *slot.lock() = Some(sink);
            Ok(())
        });
        let gateway = gateway_with(radio);
        let (telegrams, _) = collect(&gateway);

        gateway.start(GatewayOptions::default()).await.unwrap();
        let sink = captured.lock().clone().unwrap();
        assert!(sink.deliver(device(), &signed(3), FrameMetadata::now(Some(-42))));

        let telegrams = telegrams.lock();
        assert_eq!(telegrams.len(), 1);
        assert_eq!(telegrams[0].rssi(), Some(-42));
        assert_eq!(telegrams[0].sequence_counter(), 3);
    }

    #[tokio::test]
    async fn test_cleared_observers_receive_nothing() {
        let gateway = gateway_with(working_radio());
        let (telegrams, errors) = collect(&gateway);
        gateway.clear_observers();

        gateway.start(GatewayOptions::default()).await.unwrap();
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());
        gateway.on_raw_frame(device(), &signed(1), FrameMetadata::default());

        assert!(telegrams.lock().is_empty());
        assert!(errors.lock().is_empty());
        assert_eq!(gateway.stats().telegrams_accepted, 1);
    }

    #[tokio::test]
    async fn test_state_subscription() {
        let gateway = gateway_with(working_radio());
        let rx = gateway.subscribe_state();
        gateway.start(GatewayOptions::default()).await.unwrap();
        assert_eq!(*rx.borrow(), GatewayState::Monitoring);
    }
}
