// Telegram codec: raw notification bytes to verified telegrams
//
// Decoding only reads the commissioning store. On success it reports the
// counter the caller should advance to; the store mutation is left to the
// gateway so it happens exactly once per accepted telegram.

use super::frame::Frame;
use super::{FrameMetadata, Telegram};
use crate::commissioning::CommissioningStore;
use crate::device::DeviceId;
use crate::security::{self, SecurityError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error(transparent)]
    Security(#[from] SecurityError),
}

/// Acceptance rules applied to every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodePolicy {
    /// Reject unsigned frames and verify signatures
    pub auth_required: bool,
    /// Apply the forward-only counter check to unsigned traffic too.
    /// Authenticated decoding always enforces it.
    pub enforce_counter_monotonicity: bool,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            auth_required: true,
            enforce_counter_monotonicity: true,
        }
    }
}

/// A decoded telegram plus the counter the store should move to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub telegram: Telegram,
    /// `None` when the telegram was accepted without advancing the counter
    /// (unauthenticated mode with monotonicity disabled)
    pub advance_to: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TelegramCodec {
    policy: DecodePolicy,
}

impl TelegramCodec {
    pub fn new(policy: DecodePolicy) -> Self {
        Self { policy }
    }

    /// Decode and verify one frame received from `device_id`
    pub fn decode(
        &self,
        store: &CommissioningStore,
        device_id: DeviceId,
        raw: &[u8],
        metadata: FrameMetadata,
    ) -> Result<Decoded, DecodeError> {
        let frame = Frame::parse(raw)?;
        if frame.device_id() != device_id {
            return Err(DecodeError::MalformedFrame(format!(
                "frame source {} does not match sender {}",
                frame.device_id(),
                device_id
            )));
        }

        let claimed_counter = frame.counter();
        let mac = frame.mac();

        if self.policy.auth_required && mac.is_none() {
            return Err(SecurityError::AuthenticationFailed.into());
        }

        let record = store
            .lookup(device_id)
            .ok_or(DecodeError::UnknownDevice(device_id))?;

        if self.policy.auth_required {
            security::verify(&record, frame.signed_bytes(), claimed_counter, mac)?;
        } else if self.policy.enforce_counter_monotonicity {
            security::check_counter(&record, claimed_counter)?;
        }

        let advance_to = (claimed_counter > record.rolling_counter).then_some(claimed_counter);
        let telegram = Telegram::new(&frame, self.policy.auth_required, metadata);

        Ok(Decoded {
            telegram,
            advance_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SecurityKey;
    use crate::telegram::FrameBuilder;

    const AUTH: DecodePolicy = DecodePolicy {
        auth_required: true,
        enforce_counter_monotonicity: true,
    };
    const OPEN: DecodePolicy = DecodePolicy {
        auth_required: false,
        enforce_counter_monotonicity: true,
    };
    const PERMISSIVE: DecodePolicy = DecodePolicy {
        auth_required: false,
        enforce_counter_monotonicity: false,
    };

    fn device() -> DeviceId {
        DeviceId::new(0xAABB_CCDD).unwrap()
    }

    fn key() -> SecurityKey {
        SecurityKey::from([0x5A; 16])
    }

    fn store_at(counter: u32) -> CommissioningStore {
        let store = CommissioningStore::memory();
        store
            .commission_with_counter(device(), key().as_bytes(), counter)
            .unwrap();
        store
    }

    fn signed(counter: u32) -> Vec<u8> {
        FrameBuilder::new(device(), counter)
            .payload(&[0x80, 0x50])
            .build_signed(&key())
            .unwrap()
    }

    fn unsigned(counter: u32) -> Vec<u8> {
        FrameBuilder::new(device(), counter)
            .payload(&[0x80, 0x50])
            .build_unsigned()
            .unwrap()
    }

    #[test]
    fn test_decode_signed_frame() {
        let store = store_at(4);
        let metadata = FrameMetadata::new(Some(-60), 1_700_000_000_000);

        let decoded = TelegramCodec::new(AUTH)
            .decode(&store, device(), &signed(5), metadata)
            .unwrap();

        assert_eq!(decoded.advance_to, Some(5));
        let telegram = decoded.telegram;
        assert_eq!(telegram.source_id(), device());
        assert_eq!(telegram.sequence_counter(), 5);
        assert_eq!(telegram.payload(), &[0x80, 0x50]);
        assert!(telegram.is_authenticated());
        assert_eq!(telegram.rssi(), Some(-60));
        assert_eq!(telegram.received_at(), 1_700_000_000_000);
        assert_eq!(telegram.wall_switch().unwrap().battery, 0x50);

        // Decoding does not mutate the store
        assert_eq!(store.lookup(device()).unwrap().rolling_counter, 4);
    }

    #[test]
    fn test_auth_required_rejects_unsigned() {
        let store = store_at(0);
        let result = TelegramCodec::new(AUTH).decode(&store, device(), &unsigned(1), FrameMetadata::default());
        assert_eq!(
            result,
            Err(DecodeError::Security(SecurityError::AuthenticationFailed))
        );
    }

    #[test]
    fn test_auth_required_rejects_bad_signature() {
        let store = store_at(0);
        let mut raw = signed(1);
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let result = TelegramCodec::new(AUTH).decode(&store, device(), &raw, FrameMetadata::default());
        assert_eq!(
            result,
            Err(DecodeError::Security(SecurityError::AuthenticationFailed))
        );
    }

    #[test]
    fn test_replay_rejected_in_both_modes() {
        let store = store_at(7);
        for (policy, raw) in [(AUTH, signed(7)), (OPEN, unsigned(7)), (AUTH, signed(3))] {
            let result = TelegramCodec::new(policy).decode(&store, device(), &raw, FrameMetadata::default());
            assert!(matches!(
                result,
                Err(DecodeError::Security(SecurityError::ReplayDetected { stored: 7, .. }))
            ));
        }
    }

    #[test]
    fn test_unknown_device() {
        let store = CommissioningStore::memory();
        let result = TelegramCodec::new(OPEN).decode(&store, device(), &unsigned(1), FrameMetadata::default());
        assert_eq!(result, Err(DecodeError::UnknownDevice(device())));
    }

    #[test]
    fn test_unsigned_check_precedes_lookup() {
        // An unsigned frame is refused before the device is even looked up
        let store = CommissioningStore::memory();
        let result = TelegramCodec::new(AUTH).decode(&store, device(), &unsigned(1), FrameMetadata::default());
        assert_eq!(
            result,
            Err(DecodeError::Security(SecurityError::AuthenticationFailed))
        );
    }

    #[test]
    fn test_open_mode_ignores_signature() {
        let store = store_at(0);
        let mut raw = signed(1);
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let decoded = TelegramCodec::new(OPEN)
            .decode(&store, device(), &raw, FrameMetadata::default())
            .unwrap();
        assert!(!decoded.telegram.is_authenticated());
        assert_eq!(decoded.advance_to, Some(1));
    }

    #[test]
    fn test_permissive_mode_accepts_old_counters() {
        let store = store_at(10);
        let decoded = TelegramCodec::new(PERMISSIVE)
            .decode(&store, device(), &unsigned(3), FrameMetadata::default())
            .unwrap();
        assert_eq!(decoded.telegram.sequence_counter(), 3);
        assert_eq!(decoded.advance_to, None);

        let decoded = TelegramCodec::new(PERMISSIVE)
            .decode(&store, device(), &unsigned(11), FrameMetadata::default())
            .unwrap();
        assert_eq!(decoded.advance_to, Some(11));
    }

    #[test]
    fn test_source_mismatch_is_malformed() {
        let store = store_at(0);
        let other = DeviceId::new(0x0102_0304).unwrap();
        let result = TelegramCodec::new(OPEN).decode(&store, other, &unsigned(1), FrameMetadata::default());
        assert!(matches!(result, Err(DecodeError::MalformedFrame(_))));
    }

    #[test]
    fn test_malformed_before_anything_else() {
        let store = store_at(0);
        let result = TelegramCodec::new(AUTH).decode(&store, device(), &[0x01, 0xFF], FrameMetadata::default());
        assert!(matches!(result, Err(DecodeError::MalformedFrame(_))));
    }
}
