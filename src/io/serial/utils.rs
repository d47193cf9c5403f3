// src/io/serial/utils.rs
//
// Line settings for the serial device and their mapping onto the
// serialport crate's types.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for the serial line
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("unknown parity '{}' (expected none, odd or even)", other)),
        }
    }
}

impl Parity {
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

/// Everything needed to open and drive the device.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Upper bound for a single blocking read.
    pub read_timeout: Duration,
    /// Pause after opening while the board finishes its reset.
    pub settle: Duration,
    pub max_line_length: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: Duration::from_secs(2),
            settle: Duration::from_millis(500),
            max_line_length: super::framer::DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl LinkSettings {
    /// Short form like `115200 8-N-1` for log lines.
    pub fn describe(&self) -> String {
        format!(
            "{} {}-{}-{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
