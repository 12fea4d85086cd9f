// Commissioning store: device keys and rolling counters
//
// Records live in a HashMap for O(1) lookup on every frame and are written
// through to an optional StorageBackend so counters survive restarts.

use super::{CommissionOutcome, CommissioningData, CommissioningError, CommissioningRecord};
use crate::device::{DeviceId, SecurityKey, SECURITY_KEY_LEN};
use crate::store::{StorageBackend, StorageError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroize;

const RECORD_PREFIX: &[u8] = b"commissioning/";

/// On-disk form of a record: `deviceId -> (securityKey, rollingCounter)`
#[derive(Serialize, Deserialize, Zeroize)]
struct PersistedRecord {
    security_key: [u8; SECURITY_KEY_LEN],
    rolling_counter: u32,
}

pub struct CommissioningStore {
    records: RwLock<HashMap<DeviceId, CommissioningRecord>>,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl CommissioningStore {
    /// Store that keeps records in memory only
    pub fn memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            backend: None,
        }
    }

    /// Store backed by persistent storage; previously commissioned devices
    /// are loaded immediately.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, CommissioningError> {
        let mut records = HashMap::new();

        for (key, mut value) in backend.scan_prefix(RECORD_PREFIX)? {
            let record = decode_record(&key, &value);
            value.zeroize();
            let record = record?;
            records.insert(record.device_id, record);
        }

        info!("Loaded {} commissioned device(s)", records.len());

        Ok(Self {
            records: RwLock::new(records),
            backend: Some(backend),
        })
    }

    /// Commission a device with a fresh rolling counter of 0
    pub fn commission(
        &self,
        device_id: DeviceId,
        security_key: &[u8],
    ) -> Result<CommissionOutcome, CommissioningError> {
        self.commission_with_counter(device_id, security_key, 0)
    }

    /// Register a device, or explicitly replace an existing record and reset
    /// its counter to `initial_counter`.
    ///
    /// The key is validated before anything is touched, so a bad key leaves
    /// any existing record for the device intact.
    pub fn commission_with_counter(
        &self,
        device_id: DeviceId,
        security_key: &[u8],
        initial_counter: u32,
    ) -> Result<CommissionOutcome, CommissioningError> {
        let security_key = SecurityKey::from_slice(security_key)?;
        self.insert(CommissioningRecord {
            device_id,
            security_key,
            rolling_counter: initial_counter,
        })
    }

    /// Commission from a QR / NFC commissioning string
    pub fn commission_from_string(
        &self,
        commissioning_string: &str,
    ) -> Result<(CommissioningData, CommissionOutcome), CommissioningError> {
        let data = CommissioningData::parse(commissioning_string)?;
        let outcome = self.insert(CommissioningRecord {
            device_id: data.device_id,
            security_key: data.security_key.clone(),
            rolling_counter: 0,
        })?;
        Ok((data, outcome))
    }

    fn insert(&self, record: CommissioningRecord) -> Result<CommissionOutcome, CommissioningError> {
        let mut records = self.records.write();
        self.persist(&record)?;

        let device_id = record.device_id;
        let counter = record.rolling_counter;
        let outcome = match records.insert(device_id, record) {
            Some(previous) => {
                info!(
                    "Re-commissioned device {}: rolling counter reset from {} to {}",
                    device_id, previous.rolling_counter, counter
                );
                CommissionOutcome::Replaced {
                    previous_counter: previous.rolling_counter,
                }
            }
            None => {
                info!("Commissioned device {}", device_id);
                CommissionOutcome::Registered
            }
        };

        Ok(outcome)
    }

    pub fn lookup(&self, device_id: DeviceId) -> Option<CommissioningRecord> {
        self.records.read().get(&device_id).cloned()
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.records.read().contains_key(&device_id)
    }

    /// Move a device's counter forward after a verified telegram.
    ///
    /// The regression check and the update happen under one write lock, so
    /// two racing callers can never both advance past the same value.
    pub fn advance_counter(
        &self,
        device_id: DeviceId,
        new_counter: u32,
    ) -> Result<(), CommissioningError> {
        let mut records = self.records.write();
        let record = records
            .get(&device_id)
            .ok_or(CommissioningError::UnknownDevice(device_id))?;

        if new_counter <= record.rolling_counter {
            return Err(CommissioningError::CounterRegression {
                device_id,
                stored: record.rolling_counter,
                attempted: new_counter,
            });
        }

        let mut updated = record.clone();
        updated.rolling_counter = new_counter;
        self.persist(&updated)?;
        records.insert(device_id, updated);

        debug!("Device {} rolling counter -> {}", device_id, new_counter);
        Ok(())
    }

    /// Forget a device; later telegrams from it are rejected as unknown
    pub fn decommission(&self, device_id: DeviceId) -> Result<CommissioningRecord, CommissioningError> {
        let mut records = self.records.write();
        if !records.contains_key(&device_id) {
            return Err(CommissioningError::UnknownDevice(device_id));
        }

        if let Some(backend) = &self.backend {
            backend.remove(&record_key(device_id))?;
            backend.flush()?;
        }

        let record = records
            .remove(&device_id)
            .ok_or(CommissioningError::UnknownDevice(device_id))?;
        info!("Decommissioned device {}", device_id);
        Ok(record)
    }

    /// Commissioned device ids in ascending order
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.records.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn persist(&self, record: &CommissioningRecord) -> Result<(), CommissioningError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let mut persisted = PersistedRecord {
            security_key: *record.security_key.as_bytes(),
            rolling_counter: record.rolling_counter,
        };
        let encoded = bincode::serialize(&persisted);
        persisted.zeroize();

        let mut bytes = encoded.map_err(|e| StorageError::Backend(e.to_string()))?;
        let result = backend.put(&record_key(record.device_id), &bytes);
        bytes.zeroize();
        result?;
        backend.flush()?;
        Ok(())
    }
}

fn record_key(device_id: DeviceId) -> Vec<u8> {
    let mut key = RECORD_PREFIX.to_vec();
    key.extend_from_slice(&device_id.to_be_bytes());
    key
}

fn decode_record(key: &[u8], value: &[u8]) -> Result<CommissioningRecord, CommissioningError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        key: hex::encode(key),
        reason,
    };

    let id_bytes: [u8; 4] = key[RECORD_PREFIX.len()..]
        .try_into()
        .map_err(|_| corrupt("device id must be 4 bytes".to_string()))?;
    let device_id = DeviceId::new(u32::from_be_bytes(id_bytes))
        .map_err(|e| corrupt(e.to_string()))?;

    let mut persisted: PersistedRecord =
        bincode::deserialize(value).map_err(|e| corrupt(e.to_string()))?;
    let record = CommissioningRecord {
        device_id,
        security_key: SecurityKey::from(persisted.security_key),
        rolling_counter: persisted.rolling_counter,
    };
    persisted.zeroize();

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStorage, SledStorage};
    use tempfile::tempdir;

    fn device(raw: u32) -> DeviceId {
        DeviceId::new(raw).unwrap()
    }

    #[test]
    fn test_commission_and_lookup() {
        let store = CommissioningStore::memory();
        let id = device(0xAABB_CCDD);

        let outcome = store.commission(id, &[7u8; 16]).unwrap();
        assert_eq!(outcome, CommissionOutcome::Registered);

        let record = store.lookup(id).unwrap();
        assert_eq!(record.device_id, id);
        assert_eq!(record.security_key.as_bytes(), &[7u8; 16]);
        assert_eq!(record.rolling_counter, 0);
    }

    #[test]
    fn test_invalid_key_keeps_prior_record() {
        let store = CommissioningStore::memory();
        let id = device(0x0102_0304);
        store.commission_with_counter(id, &[1u8; 16], 42).unwrap();

        let result = store.commission(id, &[2u8; 12]);
        assert_eq!(result, Err(CommissioningError::InvalidKeyLength { actual: 12 }));

        let record = store.lookup(id).unwrap();
        assert_eq!(record.security_key.as_bytes(), &[1u8; 16]);
        assert_eq!(record.rolling_counter, 42);
    }

    #[test]
    fn test_recommission_resets_counter() {
        let store = CommissioningStore::memory();
        let id = device(0x0102_0304);
        store.commission(id, &[1u8; 16]).unwrap();
        store.advance_counter(id, 10).unwrap();

        let outcome = store.commission(id, &[3u8; 16]).unwrap();
        assert_eq!(outcome, CommissionOutcome::Replaced { previous_counter: 10 });
        assert_eq!(store.lookup(id).unwrap().rolling_counter, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_advance_counter() {
        let store = CommissioningStore::memory();
        let id = device(0x0102_0304);
        store.commission(id, &[1u8; 16]).unwrap();

        store.advance_counter(id, 1).unwrap();
        store.advance_counter(id, 5).unwrap();
        assert_eq!(store.lookup(id).unwrap().rolling_counter, 5);

        assert_eq!(
            store.advance_counter(id, 5),
            Err(CommissioningError::CounterRegression {
                device_id: id,
                stored: 5,
                attempted: 5
            })
        );
        assert!(store.advance_counter(id, 3).is_err());
        assert_eq!(store.lookup(id).unwrap().rolling_counter, 5);
    }

    #[test]
    fn test_advance_unknown_device() {
        let store = CommissioningStore::memory();
        let id = device(0x0102_0304);
        assert_eq!(
            store.advance_counter(id, 1),
            Err(CommissioningError::UnknownDevice(id))
        );
    }

    #[test]
    fn test_decommission() {
        let store = CommissioningStore::memory();
        let id = device(0x0102_0304);
        store.commission(id, &[1u8; 16]).unwrap();

        let removed = store.decommission(id).unwrap();
        assert_eq!(removed.device_id, id);
        assert!(store.lookup(id).is_none());
        assert!(store.is_empty());

        assert_eq!(
            store.decommission(id),
            Err(CommissioningError::UnknownDevice(id))
        );
    }

    #[test]
    fn test_commission_from_string() {
        let store = CommissioningStore::memory();
        let (data, outcome) = store
            .commission_from_string(
                "30S123456789abc+Zabcdef1234567890abcdef1234567890+30Pabcdefghij+2Pabcd+",
            )
            .unwrap();

        assert_eq!(outcome, CommissionOutcome::Registered);
        let record = store.lookup(data.device_id).unwrap();
        assert_eq!(record.security_key, data.security_key);
    }

    #[test]
    fn test_devices_sorted() {
        let store = CommissioningStore::memory();
        store.commission(device(3), &[0u8; 16]).unwrap();
        store.commission(device(1), &[0u8; 16]).unwrap();
        store.commission(device(2), &[0u8; 16]).unwrap();

        assert_eq!(store.devices(), vec![device(1), device(2), device(3)]);
    }

    #[test]
    fn test_write_through_to_backend() {
        let backend = Arc::new(MemoryStorage::new());
        let store = CommissioningStore::open(backend.clone()).unwrap();
        let id = device(0x0102_0304);

        store.commission(id, &[9u8; 16]).unwrap();
        store.advance_counter(id, 77).unwrap();
        assert_eq!(backend.len(), 1);

        let reopened = CommissioningStore::open(backend.clone()).unwrap();
        let record = reopened.lookup(id).unwrap();
        assert_eq!(record.rolling_counter, 77);
        assert_eq!(record.security_key.as_bytes(), &[9u8; 16]);

        reopened.decommission(id).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let backend = Arc::new(MemoryStorage::new());
        backend.put(b"commissioning/\x01\x02\x03\x04", b"junk").unwrap();

        let result = CommissioningStore::open(backend);
        assert!(matches!(
            result,
            Err(CommissioningError::Storage(StorageError::Corrupt { .. }))
        ));
    }

    #[test]
    fn test_sled_backed_store() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(SledStorage::open(dir.path().join("store")).unwrap());
        let store = CommissioningStore::open(backend).unwrap();
        let id = device(0xAABB_CCDD);

        store.commission(id, &[4u8; 16]).unwrap();
        store.advance_counter(id, 3).unwrap();
        assert_eq!(store.lookup(id).unwrap().rolling_counter, 3);
    }
}
