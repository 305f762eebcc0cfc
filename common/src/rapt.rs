//! RAPT Pill advertisement decoding.
//!
//! The pill broadcasts a manufacturer-specific advertisement whose data starts
//! with the ASCII marker `RAPT`. The measurement frame follows a fixed number
//! of framing bytes and is big-endian throughout.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Orientation, SensorReading, TemperatureUnit};

pub const MARKER: &[u8; 4] = b"RAPT";

/// Framing bytes ahead of the measurement frame: the flags AD structure, the
/// manufacturer AD header, the marker and two reserved bytes.
pub const FRAME_OFFSET: usize = 11;

/// type/version (1) + compat float (4) + temperature (2) + axes (6) +
/// gravity (2) + battery (2)
pub const FRAME_LEN: usize = 17;

const KELVIN_OFFSET: f64 = 273.15;
const GRAVITY_DECIMALS: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed payload: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Raw field values of one measurement frame, before scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PillFrame {
    pub version: u8,
    pub compat: f32,
    pub temperature_raw: u16,
    pub x_raw: i16,
    pub y_raw: i16,
    pub z_raw: i16,
    pub gravity_raw: u16,
    pub battery_raw: u16,
}

impl PillFrame {
    fn parse(frame: &[u8]) -> Self {
        let u16_at = |offset: usize| u16::from_be_bytes([frame[offset], frame[offset + 1]]);
        let i16_at = |offset: usize| i16::from_be_bytes([frame[offset], frame[offset + 1]]);

        Self {
            version: frame[0],
            compat: f32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
            temperature_raw: u16_at(5),
            x_raw: i16_at(7),
            y_raw: i16_at(9),
            z_raw: i16_at(11),
            gravity_raw: u16_at(13),
            battery_raw: u16_at(15),
        }
    }

    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature_raw) / 128.0 - KELVIN_OFFSET
    }

    pub fn gravity(&self) -> f64 {
        round_gravity(f64::from(self.gravity_raw) / 1000.0)
    }

    /// Literal raw/256 fraction; the pill's documented scale is unconfirmed.
    pub fn battery(&self) -> f64 {
        f64::from(self.battery_raw) / 256.0
    }

    pub fn orientation(&self) -> Orientation {
        Orientation {
            x: f64::from(self.x_raw) / 16.0,
            y: f64::from(self.y_raw) / 16.0,
            z: f64::from(self.z_raw) / 16.0,
        }
    }
}

/// Decodes an advertisement into a reading, temperature expressed in `unit`.
///
/// Returns `Ok(None)` when the payload does not carry the RAPT marker.
pub fn decode(
    payload: &[u8],
    rssi: i16,
    unit: TemperatureUnit,
) -> Result<Option<SensorReading>, DecodeError> {
    decode_at(payload, rssi, unit, Utc::now())
}

pub fn decode_at(
    payload: &[u8],
    rssi: i16,
    unit: TemperatureUnit,
    received_at: DateTime<Utc>,
) -> Result<Option<SensorReading>, DecodeError> {
    if !contains_marker(payload) {
        return Ok(None);
    }

    let expected = FRAME_OFFSET + FRAME_LEN;
    if payload.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let frame = PillFrame::parse(&payload[FRAME_OFFSET..expected]);

    Ok(Some(SensorReading {
        current_temperature: Some(unit.from_celsius(frame.temperature_celsius())),
        temperature_unit: unit,
        battery_level: Some(frame.battery()),
        gravity: Some(frame.gravity()),
        orientation: frame.orientation(),
        signal_strength: Some(rssi),
        received_at: Some(received_at),
    }))
}

/// Builds a payload in the same layout the pill broadcasts.
pub fn encode_advertisement(frame: &PillFrame) -> Vec<u8> {
    let mut payload = Vec::with_capacity(FRAME_OFFSET + FRAME_LEN);
    // flags AD structure
    payload.extend_from_slice(&[0x02, 0x01, 0x06]);
    // manufacturer AD: length covers the type byte and everything after it
    payload.push((1 + MARKER.len() + 2 + FRAME_LEN) as u8);
    payload.push(0xFF);
    payload.extend_from_slice(MARKER);
    payload.extend_from_slice(&[0x02, 0x00]);

    payload.push(frame.version);
    payload.extend_from_slice(&frame.compat.to_be_bytes());
    payload.extend_from_slice(&frame.temperature_raw.to_be_bytes());
    payload.extend_from_slice(&frame.x_raw.to_be_bytes());
    payload.extend_from_slice(&frame.y_raw.to_be_bytes());
    payload.extend_from_slice(&frame.z_raw.to_be_bytes());
    payload.extend_from_slice(&frame.gravity_raw.to_be_bytes());
    payload.extend_from_slice(&frame.battery_raw.to_be_bytes());
    payload
}

/// Inverse of the temperature scaling, clamped to the field range.
pub fn temperature_raw_from_celsius(celsius: f64) -> u16 {
    ((celsius + KELVIN_OFFSET) * 128.0)
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16
}

fn contains_marker(payload: &[u8]) -> bool {
    payload.windows(MARKER.len()).any(|window| window == MARKER)
}

fn round_gravity(value: f64) -> f64 {
    (value * GRAVITY_DECIMALS).round() / GRAVITY_DECIMALS
}
