// Security engine: anti-replay and telegram signature checks
//
// EnOcean BLE telegrams are signed with AES-128 in CCM mode, used for
// authentication only:
//
//   nonce = device_id (4, LE) || sequence counter (4, LE) || 5 zero bytes
//   aad   = every telegram byte preceding the signature
//   tag   = 4 bytes
//
// Everything here is a pure function of (key, counter, frame). The engine
// never touches the commissioning store; the gateway advances the counter
// after a successful verify.

use crate::commissioning::CommissioningRecord;
use crate::device::{DeviceId, SecurityKey};
use aes::Aes128;
use ccm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    consts::{U13, U4},
    Ccm,
};
use thiserror::Error;

/// Length of the security signature appended to signed telegrams
pub const MAC_LEN: usize = 4;

/// Length of the CCM nonce
pub const NONCE_LEN: usize = 13;

type TelegramCcm = Ccm<Aes128, U4, U13>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Replay detected: counter {claimed} is not newer than {stored}")]
    ReplayDetected { claimed: u32, stored: u32 },
    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// Build the CCM nonce for a telegram
pub fn nonce(device_id: DeviceId, counter: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..4].copy_from_slice(&device_id.to_le_bytes());
    nonce[4..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Compute the security signature over `signed_bytes`.
///
/// Fails only if the associated data is longer than CCM can authenticate.
pub fn compute_mac(
    key: &SecurityKey,
    device_id: DeviceId,
    counter: u32,
    signed_bytes: &[u8],
) -> Result<[u8; MAC_LEN], SecurityError> {
    let cipher = TelegramCcm::new(key.as_bytes().into());
    let nonce = nonce(device_id, counter);

    let tag = cipher
        .encrypt(
            GenericArray::from_slice(&nonce),
            Payload {
                msg: &[],
                aad: signed_bytes,
            },
        )
        .map_err(|_| SecurityError::AuthenticationFailed)?;

    tag.as_slice()
        .try_into()
        .map_err(|_| SecurityError::AuthenticationFailed)
}

/// Strict forward-only ordering: equal counters are replays
pub fn check_counter(record: &CommissioningRecord, claimed_counter: u32) -> Result<(), SecurityError> {
    if claimed_counter <= record.rolling_counter {
        return Err(SecurityError::ReplayDetected {
            claimed: claimed_counter,
            stored: record.rolling_counter,
        });
    }
    Ok(())
}

/// Verify a telegram against the device's commissioning record.
///
/// `signed_bytes` is the telegram without its trailing signature. The
/// counter is checked first, so a replay is reported as such even when its
/// signature is valid.
pub fn verify(
    record: &CommissioningRecord,
    signed_bytes: &[u8],
    claimed_counter: u32,
    mac: Option<&[u8; MAC_LEN]>,
) -> Result<(), SecurityError> {
    check_counter(record, claimed_counter)?;

    let Some(mac) = mac else {
        return Ok(());
    };

    let cipher = TelegramCcm::new(record.security_key.as_bytes().into());
    let nonce = nonce(record.device_id, claimed_counter);

    // Decrypting the bare tag checks it in constant time
    cipher
        .decrypt(
            GenericArray::from_slice(&nonce),
            Payload {
                msg: mac,
                aad: signed_bytes,
            },
        )
        .map(|_| ())
        .map_err(|_| SecurityError::AuthenticationFailed)
}
