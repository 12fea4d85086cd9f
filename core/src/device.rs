// Device identity and key material
//
// A device is addressed by its 32-bit EnOcean id and authenticated with a
// 16-byte AES key exchanged at commissioning time.

use crate::commissioning::CommissioningError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an EnOcean BLE security key in bytes (AES-128)
pub const SECURITY_KEY_LEN: usize = 16;

/// Reserved ids that can never belong to a physical device
const RESERVED_IDS: [u32; 2] = [0x0000_0000, 0xFFFF_FFFF];

/// EnOcean 32-bit device address.
///
/// Construction always validates, so holding a `DeviceId` means the value is
/// not one of the reserved null/broadcast addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a device id from its raw 32-bit value
    pub fn new(raw: u32) -> Result<Self, CommissioningError> {
        if RESERVED_IDS.contains(&raw) {
            return Err(CommissioningError::InvalidDeviceId(format!(
                "0x{:08X} is a reserved address",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// Decode a device id as it appears on the air (little-endian)
    pub fn from_le_bytes(bytes: [u8; 4]) -> Result<Self, CommissioningError> {
        Self::new(u32::from_le_bytes(bytes))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl TryFrom<u32> for DeviceId {
    type Error = CommissioningError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl FromStr for DeviceId {
    type Err = CommissioningError;

    /// Parse `AABBCCDD` or `0xAABBCCDD` (case-insensitive, 1 to 8 hex digits)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.is_empty() || digits.len() > 8 {
            return Err(CommissioningError::InvalidDeviceId(format!(
                "expected 1-8 hex digits, got {:?}",
                s
            )));
        }

        let raw = u32::from_str_radix(digits, 16)
            .map_err(|e| CommissioningError::InvalidDeviceId(format!("{:?}: {}", s, e)))?;
        Self::new(raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Symmetric AES-128 key shared with a commissioned device.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecurityKey([u8; SECURITY_KEY_LEN]);

impl SecurityKey {
    /// Build a key from raw bytes; anything but 16 bytes is rejected
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CommissioningError> {
        if bytes.len() != SECURITY_KEY_LEN {
            return Err(CommissioningError::InvalidKeyLength {
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; SECURITY_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Build a key from its 32-character hex form
    pub fn from_hex(s: &str) -> Result<Self, CommissioningError> {
        let mut bytes = hex::decode(s.trim())
            .map_err(|e| CommissioningError::InvalidKeyEncoding(e.to_string()))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Generate a random key (device emulation and tests)
    pub fn generate() -> Self {
        let mut key = [0u8; SECURITY_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; SECURITY_KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form, as printed on commissioning labels
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; SECURITY_KEY_LEN]> for SecurityKey {
    fn from(bytes: [u8; SECURITY_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityKey(<redacted>)")
    }
}
