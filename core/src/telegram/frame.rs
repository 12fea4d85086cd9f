// EnOcean BLE frame layout
//
// Offset  Size  Field
// 0       1     length L (bytes following this one)
// 1       1     AD type, 0xFF (manufacturer specific data)
// 2       2     manufacturer id 0x03DA, little-endian
// 4       1     control: bit 7 = signed, bits 0-6 = model character
// 5       4     source device id, little-endian
// 9       4     sequence counter, little-endian
// 13      n     payload (n >= 1)
// 13+n    4     security signature, only when signed

use super::codec::DecodeError;
use super::DeviceModel;
use crate::device::{DeviceId, SecurityKey};
use crate::security::{self, MAC_LEN};

/// Advertising data type for manufacturer specific data
pub const AD_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

/// Bluetooth SIG company identifier of EnOcean GmbH
pub const ENOCEAN_MANUFACTURER_ID: u16 = 0x03DA;

/// Bytes preceding the payload
pub const HEADER_LEN: usize = 13;

const SIGNED_FLAG: u8 = 0b1000_0000;
const MODEL_MASK: u8 = 0b0111_1111;

const OFFSET_CONTROL: usize = 4;
const OFFSET_DEVICE_ID: usize = 5;
const OFFSET_COUNTER: usize = 9;

/// Zero-copy view over a structurally valid frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    raw: &'a [u8],
    model: DeviceModel,
    device_id: DeviceId,
    counter: u32,
    mac: Option<[u8; MAC_LEN]>,
}

impl<'a> Frame<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, DecodeError> {
        if raw.len() < HEADER_LEN {
            return Err(malformed(format!(
                "{} bytes is shorter than the {}-byte header",
                raw.len(),
                HEADER_LEN
            )));
        }

        let declared = raw[0] as usize;
        if declared + 1 != raw.len() {
            return Err(malformed(format!(
                "length field says {} bytes follow, got {}",
                declared,
                raw.len() - 1
            )));
        }

        if raw[1] != AD_TYPE_MANUFACTURER_SPECIFIC {
            return Err(malformed(format!("unknown telegram type 0x{:02X}", raw[1])));
        }

        let manufacturer = u16::from_le_bytes([raw[2], raw[3]]);
        if manufacturer != ENOCEAN_MANUFACTURER_ID {
            return Err(malformed(format!(
                "unknown manufacturer id 0x{:04X}",
                manufacturer
            )));
        }

        let control = raw[OFFSET_CONTROL];
        let signed = control & SIGNED_FLAG != 0;
        let model = DeviceModel::from_char(char::from(control & MODEL_MASK));

        let device_id = DeviceId::from_le_bytes(read_array(raw, OFFSET_DEVICE_ID))
            .map_err(|e| malformed(e.to_string()))?;
        let counter = u32::from_le_bytes(read_array(raw, OFFSET_COUNTER));

        let trailer = if signed { MAC_LEN } else { 0 };
        if raw.len() < HEADER_LEN + trailer + 1 {
            return Err(malformed("frame carries no payload".to_string()));
        }

        let mac = signed.then(|| read_array(raw, raw.len() - MAC_LEN));

        Ok(Self {
            raw,
            model,
            device_id,
            counter,
            mac,
        })
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn mac(&self) -> Option<&[u8; MAC_LEN]> {
        self.mac.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.mac.is_some()
    }

    /// Everything covered by the signature: the frame minus its trailer
    pub fn signed_bytes(&self) -> &'a [u8] {
        &self.raw[..self.payload_end()]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.raw[HEADER_LEN..self.payload_end()]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    fn payload_end(&self) -> usize {
        if self.mac.is_some() {
            self.raw.len() - MAC_LEN
        } else {
            self.raw.len()
        }
    }
}

fn malformed(reason: String) -> DecodeError {
    DecodeError::MalformedFrame(reason)
}

fn read_array<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}

/// Rebuild the full frame from a scanner's manufacturer data entry, which
/// reports the company id separately and strips the length and type bytes.
pub fn from_manufacturer_data(company_id: u16, data: &[u8]) -> Option<Vec<u8>> {
    let length = u8::try_from(data.len() + 3).ok()?;
    let mut frame = Vec::with_capacity(data.len() + 4);
    frame.push(length);
    frame.push(AD_TYPE_MANUFACTURER_SPECIFIC);
    frame.extend_from_slice(&company_id.to_le_bytes());
    frame.extend_from_slice(data);
    Some(frame)
}

/// Encodes frames the way a device would transmit them. Used for device
/// emulation and tests.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    device_id: DeviceId,
    counter: u32,
    model: DeviceModel,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(device_id: DeviceId, counter: u32) -> Self {
        Self {
            device_id,
            counter,
            model: DeviceModel::WallSwitch,
            payload: Vec::new(),
        }
    }

    pub fn model(mut self, model: DeviceModel) -> Self {
        self.model = model;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build_unsigned(&self) -> Result<Vec<u8>, DecodeError> {
        self.encode(false)
    }

    pub fn build_signed(&self, key: &SecurityKey) -> Result<Vec<u8>, DecodeError> {
        let mut frame = self.encode(true)?;
        let mac = security::compute_mac(key, self.device_id, self.counter, &frame)?;
        frame.extend_from_slice(&mac);
        Ok(frame)
    }

    /// Header and payload; the length byte already accounts for a signature
    fn encode(&self, signed: bool) -> Result<Vec<u8>, DecodeError> {
        if self.payload.is_empty() {
            return Err(malformed("payload must not be empty".to_string()));
        }

        let trailer = if signed { MAC_LEN } else { 0 };
        let total = HEADER_LEN + self.payload.len() + trailer;
        let length = u8::try_from(total - 1)
            .map_err(|_| malformed(format!("{} byte frame does not fit the length field", total)))?;

        let model = self.model.as_char() as u32;
        if model > MODEL_MASK as u32 {
            return Err(malformed(format!("model {:?} is not a 7-bit character", self.model)));
        }
        let control = model as u8 | if signed { SIGNED_FLAG } else { 0 };

        let mut frame = Vec::with_capacity(total);
        frame.push(length);
        frame.push(AD_TYPE_MANUFACTURER_SPECIFIC);
        frame.extend_from_slice(&ENOCEAN_MANUFACTURER_ID.to_le_bytes());
        frame.push(control);
        frame.extend_from_slice(&self.device_id.to_le_bytes());
        frame.extend_from_slice(&self.counter.to_le_bytes());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }
}
