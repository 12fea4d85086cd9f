// Wall switch payload
//
// byte 0: bit 7 = switch mode, bit 6 = rocker released (only meaningful in switch mode)
// byte 1: bits 0-6 = battery level in percent

use serde::{Deserialize, Serialize};

const SWITCH_MODE_BIT: u8 = 0b1000_0000;
const RELEASED_BIT: u8 = 0b0100_0000;
const BATTERY_MASK: u8 = 0b0111_1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallSwitchState {
    pub switch_mode: bool,
    pub is_on: bool,
    pub battery: u8,
}

impl WallSwitchState {
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let [status, battery, ..] = payload else {
            return None;
        };

        let switch_mode = status & SWITCH_MODE_BIT != 0;
        Some(Self {
            switch_mode,
            is_on: switch_mode && status & RELEASED_BIT == 0,
            battery: battery & BATTERY_MASK,
        })
    }

    /// Encode back into the two payload bytes (device emulation)
    pub fn to_payload(&self) -> [u8; 2] {
        let mut status = 0;
        if self.switch_mode {
            status |= SWITCH_MODE_BIT;
            if !self.is_on {
                status |= RELEASED_BIT;
            }
        }
        [status, self.battery & BATTERY_MASK]
    }
}
