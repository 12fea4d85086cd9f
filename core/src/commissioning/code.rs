// Commissioning string parser
//
// EnOcean BLE switches print their commissioning data as a QR / NFC string:
//
//   30S<address:12 hex>+Z<key:32 hex>+30P<ordering code:10>+2P<step code:4+>+...[+S<serial>]
//
// The address is the 48-bit BLE static address; its lower 32 bits are the
// EnOcean device id carried in every telegram.

use super::CommissioningError;
use crate::device::{DeviceId, SecurityKey};

const ADDRESS_HEX_LEN: usize = 12;
const KEY_HEX_LEN: usize = 32;
const ORDERING_CODE_LEN: usize = 10;
const MIN_STEP_CODE_LEN: usize = 4;
const MIN_SERIAL_LEN: usize = 8;

/// Data extracted from a commissioning string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningData {
    /// BLE static address, most significant byte first
    pub address: [u8; 6],
    pub device_id: DeviceId,
    pub security_key: SecurityKey,
    pub ordering_code: String,
    /// Step code and revision rendered as `"AB-CD"`
    pub step_code_revision: String,
    /// Serial number, only present on QR codes
    pub serial: Option<String>,
}

impl CommissioningData {
    pub fn parse(input: &str) -> Result<Self, CommissioningError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid("commissioning string must not be empty"));
        }

        let rest = input
            .strip_prefix("30S")
            .ok_or_else(|| invalid("missing 30S address field"))?;
        let (address_hex, rest) = split_hex(rest, ADDRESS_HEX_LEN, "address")?;

        let rest = rest
            .strip_prefix("+Z")
            .ok_or_else(|| invalid("missing +Z security key field"))?;
        let (key_hex, rest) = split_hex(rest, KEY_HEX_LEN, "security key")?;

        let rest = rest
            .strip_prefix("+30P")
            .ok_or_else(|| invalid("missing +30P ordering code field"))?;
        let ordering_code: String = rest.chars().take(ORDERING_CODE_LEN).collect();
        if ordering_code.chars().count() != ORDERING_CODE_LEN || ordering_code.contains('+') {
            return Err(invalid("ordering code must be 10 characters"));
        }
        let rest = &rest[ordering_code.len()..];

        let rest = rest
            .strip_prefix("+2P")
            .ok_or_else(|| invalid("missing +2P step code field"))?;
        let step_end = rest.find(|c: char| c == '+' || c == '/').unwrap_or(rest.len());
        let step_code = &rest[..step_end];
        if step_code.chars().count() < MIN_STEP_CODE_LEN || !rest[step_end..].starts_with('+') {
            return Err(invalid("step code must be at least 4 characters followed by '+'"));
        }
        let step: Vec<char> = step_code.chars().take(MIN_STEP_CODE_LEN).collect();
        let step_code_revision = format!(
            "{}{}-{}{}",
            step[0], step[1], step[2], step[3]
        );

        let mut address = [0u8; 6];
        hex::decode_to_slice(address_hex, &mut address)
            .map_err(|e| invalid(&format!("address: {}", e)))?;
        let device_id =
            DeviceId::from_le_bytes([address[5], address[4], address[3], address[2]])?;
        let security_key = SecurityKey::from_hex(key_hex)?;

        Ok(Self {
            address,
            device_id,
            security_key,
            ordering_code,
            step_code_revision,
            serial: find_serial(input),
        })
    }

    /// Address in the conventional lowercase hex form
    pub fn address_hex(&self) -> String {
        hex::encode(self.address)
    }
}

fn invalid(reason: &str) -> CommissioningError {
    CommissioningError::InvalidCommissioningString(reason.to_string())
}

fn split_hex<'a>(
    input: &'a str,
    len: usize,
    field: &str,
) -> Result<(&'a str, &'a str), CommissioningError> {
    let valid = input
        .get(..len)
        .filter(|digits| digits.chars().all(|c| c.is_ascii_hexdigit()));
    match valid {
        Some(digits) => Ok((digits, &input[len..])),
        None => Err(invalid(&format!("{} must be {} hex digits", field, len))),
    }
}

/// First `+S<hex>` run; shorter runs are not serial numbers
fn find_serial(input: &str) -> Option<String> {
    input
        .match_indices("+S")
        .map(|(idx, _)| {
            input[idx + 2..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect::<String>()
        })
        .find(|run| !run.is_empty())
        .filter(|run| run.len() >= MIN_SERIAL_LEN)
}
