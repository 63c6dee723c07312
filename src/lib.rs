#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every module.
mod fmt;

pub mod dht;
#[cfg(feature = "firmware")]
pub mod esp;
pub mod telemetry;
pub mod throttle;
pub mod timing;

pub use dht::{Calibration, Config, Dht};
pub use telemetry::{publish_free_heap, publish_reading, ChannelSink, Message, PublishSink, TelemetryError, Topics};
pub use throttle::ReadThrottle;
pub use timing::{DhtPin, MicrosClock, OpenDrainPin, Timing};

/// Value carried by `humidity` and `temperature` when a read timed out.
pub const INVALID_VALUE: f32 = -999.0;

/// Number of data bits the sensor sends per transaction.
pub const FRAME_BITS: usize = 40;

/// Outcome of a single read transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    /// All 40 bits arrived but the checksum byte did not match.
    ChecksumError,
    /// The sensor stopped answering at some point of the handshake or data phase.
    TimeoutError,
}

impl Status {
    /// Numeric result code as used by the classic DHT libraries.
    pub const fn code(self) -> i8 {
        match self {
            Status::Ok => 0,
            Status::ChecksumError => -1,
            Status::TimeoutError => -2,
        }
    }
}

/// A decoded humidity/temperature pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
}

/// Result of [`Dht::read`].
///
/// `humidity` and `temperature` are only meaningful when `status` is not
/// [`Status::TimeoutError`]; on timeout both hold [`INVALID_VALUE`]. A reading
/// with [`Status::ChecksumError`] still carries the values decoded from the
/// frame, and it is up to the caller to trust them or not.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub humidity: f32,
    pub temperature: f32,
    pub status: Status,
}

impl Reading {
    pub(crate) const fn timeout() -> Self {
        Reading {
            humidity: INVALID_VALUE,
            temperature: INVALID_VALUE,
            status: Status::TimeoutError,
        }
    }

    pub fn into_result(self) -> Result<Measurement, DhtError> {
        let measurement = Measurement {
            humidity: self.humidity,
            temperature: self.temperature,
        };
        match self.status {
            Status::Ok => Ok(measurement),
            Status::ChecksumError => Err(DhtError::Checksum(measurement)),
            Status::TimeoutError => Err(DhtError::Timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DhtError {
    #[error("sensor did not answer in time")]
    Timeout,
    /// The decoded values are kept so the caller can still use them.
    #[error("checksum mismatch")]
    Checksum(Measurement),
}

/// The five bytes captured during one transaction:
/// `[humidity_high, humidity_low, temp_high, temp_low, checksum]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawFrame([u8; 5]);

impl RawFrame {
    pub const fn new(bytes: [u8; 5]) -> Self {
        RawFrame(bytes)
    }

    pub const fn bytes(&self) -> [u8; 5] {
        self.0
    }

    /// Stores bit number `index` of the transmission, MSB first.
    ///
    /// Panics if `index` is not below [`FRAME_BITS`].
    pub(crate) fn set_bit(&mut self, index: usize, bit: bool) {
        let mask = 0x80 >> (index % 8);
        if bit {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }

    /// Low 8 bits of the sum of the four data bytes.
    pub fn checksum(&self) -> u8 {
        self.0[..4].iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
    }

    pub fn checksum_matches(&self) -> bool {
        self.checksum() == self.0[4]
    }

    /// Uncalibrated relative humidity in percent.
    pub fn humidity(&self) -> f32 {
        humidity(self.0[0], self.0[1])
    }

    /// Uncalibrated temperature in degrees Celsius.
    pub fn temperature(&self) -> f32 {
        temperature(self.0[2], self.0[3])
    }
}

fn humidity(high: u8, low: u8) -> f32 {
    f32::from(u16::from(high) << 8 | u16::from(low)) * 0.1
}

// Bit 7 of the high byte is the sign, the remaining 15 bits the magnitude.
fn temperature(high: u8, low: u8) -> f32 {
    let magnitude = f32::from(u16::from(high & 0x7F) << 8 | u16::from(low)) * 0.1;
    if high & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}
