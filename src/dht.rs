//! Bit-banged driver for DHT11/DHT22 style humidity and temperature sensors.
//!
//! ```txt
//!    wake         settle   ack low   ack high   bit low  bit high (0/1)
//! ──┐          ┌────────┐          ┌─────────┐         ┌────┐
//!   │          │        │          │         │         │    │   ...
//!   └──────────┘        └──────────┘         └─────────┘    └──
//!   wake_millis    ~40us    ~80us      ~80us     ~50us  ~26us / ~70us
//! ```
//!
//! A bit is `1` when its high pulse lasts strictly longer than
//! `bit_threshold_micros`.

use core::fmt;

use embedded_hal::digital::PinState;
use embedded_hal_async::delay::DelayNs as AsyncDelayNs;

use crate::timing::{elapsed_micros, DhtPin, Timing};
use crate::{RawFrame, Reading, Status, FRAME_BITS};

const DEFAULT_WAKE_MILLIS: u32 = 10;
const DEFAULT_SETTLE_MICROS: u32 = 40;
const DEFAULT_TIMEOUT_MICROS: u32 = 100;
const DEFAULT_BIT_THRESHOLD_MICROS: u32 = 40;

/// Offsets added to every converted value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub humidity_offset: f32,
    pub temperature_offset: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// How long the line is held low to wake the sensor.
    pub wake_millis: u32,
    /// Pause after releasing the line before looking for the answer.
    pub settle_micros: u32,
    /// Longest time any single level may last before the read is abandoned.
    pub timeout_micros: u32,
    /// High pulses longer than this are `1` bits.
    pub bit_threshold_micros: u32,
    pub calibration: Calibration,
    /// Run the acknowledge and data phases inside a critical section.
    pub disable_interrupts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wake_millis: DEFAULT_WAKE_MILLIS,
            settle_micros: DEFAULT_SETTLE_MICROS,
            timeout_micros: DEFAULT_TIMEOUT_MICROS,
            bit_threshold_micros: DEFAULT_BIT_THRESHOLD_MICROS,
            calibration: Calibration::default(),
            disable_interrupts: false,
        }
    }
}

impl Config {
    pub fn with_wake_millis(mut self, millis: u32) -> Self {
        self.wake_millis = millis;
        self
    }

    pub fn with_settle_micros(mut self, micros: u32) -> Self {
        self.settle_micros = micros;
        self
    }

    pub fn with_timeout_micros(mut self, micros: u32) -> Self {
        self.timeout_micros = micros;
        self
    }

    pub fn with_bit_threshold_micros(mut self, micros: u32) -> Self {
        self.bit_threshold_micros = micros;
        self
    }

    pub fn with_calibration(mut self, humidity_offset: f32, temperature_offset: f32) -> Self {
        self.calibration = Calibration {
            humidity_offset,
            temperature_offset,
        };
        self
    }

    pub fn with_disable_interrupts(mut self, disable: bool) -> Self {
        self.disable_interrupts = disable;
        self
    }
}

/// Wait step of a transaction that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Phase {
    /// The sensor never pulled the line low to answer the wake pulse.
    AcknowledgeLow,
    /// The sensor's low acknowledge never ended.
    AcknowledgeHigh,
    /// The sensor's high acknowledge never ended.
    AcknowledgeRelease,
    /// A data bit's low lead-in never ended.
    DataLow { bit: u8 },
    /// A data bit's high pulse never ended.
    DataHigh { bit: u8 },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AcknowledgeLow => f.write_str("sensor never pulled the line low to answer"),
            Phase::AcknowledgeHigh => f.write_str("sensor held its low acknowledge"),
            Phase::AcknowledgeRelease => f.write_str("sensor held its high acknowledge"),
            Phase::DataLow { bit } => write!(f, "failed while reading data bit {}", bit),
            Phase::DataHigh { bit } => write!(f, "sensor never pulled low after data bit {}", bit),
        }
    }
}

pub struct Dht<P, T> {
    pin: P,
    timing: T,
    config: Config,
    last_read: Option<u64>,
}

impl<P, T> Dht<P, T>
where
    P: DhtPin,
    T: Timing,
{
    pub fn new(pin: P, timing: T) -> Self {
        Self::with_config(pin, timing, Config::default())
    }

    pub fn with_config(pin: P, timing: T, config: Config) -> Self {
        Dht {
            pin,
            timing,
            config,
            last_read: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Clock value at the start of the latest read, if any.
    ///
    /// Purely informational; the driver never refuses a read.
    pub fn last_read_micros(&self) -> Option<u64> {
        self.last_read
    }

    pub fn release(self) -> (P, T) {
        (self.pin, self.timing)
    }

    /// Runs one complete transaction and blocks until it is done.
    ///
    /// The wake pulse goes through [`Timing::delay_millis`]; everything after
    /// it busy waits.
    pub fn read(&mut self) -> Reading {
        self.start_wake();
        self.timing.delay_millis(self.config.wake_millis);
        self.finish()
    }

    /// Same as [`Dht::read`] but the wake pulse awaits `delay`, letting the
    /// executor run other tasks. Sampling still blocks.
    pub async fn read_async<D: AsyncDelayNs>(&mut self, delay: &mut D) -> Reading {
        self.start_wake();
        delay.delay_ms(self.config.wake_millis).await;
        self.finish()
    }

    fn start_wake(&mut self) {
        self.last_read = Some(self.timing.now_micros());
        self.pin.set_output();
        self.pin.write_level(PinState::Low);
    }

    fn finish(&mut self) -> Reading {
        self.pin.write_level(PinState::High);
        self.pin.set_input();
        self.timing.delay_micros(self.config.settle_micros);

        let captured = if self.config.disable_interrupts {
            critical_section::with(|_cs| self.capture())
        } else {
            self.capture()
        };

        match captured {
            Ok(frame) => self.convert(frame),
            Err(phase) => {
                warn!("dht read timed out: {}", phase);
                Reading::timeout()
            }
        }
    }

    fn capture(&mut self) -> Result<RawFrame, Phase> {
        let mut frame = RawFrame::default();

        self.wait_while(PinState::High, Phase::AcknowledgeLow)?;
        self.wait_while(PinState::Low, Phase::AcknowledgeHigh)?;
        self.wait_while(PinState::High, Phase::AcknowledgeRelease)?;

        for index in 0..FRAME_BITS {
            let bit = index as u8;
            let rise = self.wait_while(PinState::Low, Phase::DataLow { bit })?;
            let fall = self.wait_while(PinState::High, Phase::DataHigh { bit })?;
            let high_micros = elapsed_micros(rise, fall);
            frame.set_bit(index, high_micros > u64::from(self.config.bit_threshold_micros));
        }

        Ok(frame)
    }

    /// Polls until the line leaves `level` and returns the time it was seen
    /// to change.
    #[inline(always)]
    fn wait_while(&mut self, level: PinState, phase: Phase) -> Result<u64, Phase> {
        let timeout = u64::from(self.config.timeout_micros);
        let start = self.timing.now_micros();
        loop {
            let now = self.timing.now_micros();
            if self.pin.read_level() != level {
                return Ok(now);
            }
            if elapsed_micros(start, now) > timeout {
                return Err(phase);
            }
        }
    }

    fn convert(&self, frame: RawFrame) -> Reading {
        let calibration = &self.config.calibration;
        let humidity = frame.humidity() + calibration.humidity_offset;
        let temperature = frame.temperature() + calibration.temperature_offset;

        let status = if frame.checksum_matches() {
            Status::Ok
        } else {
            let bytes = frame.bytes();
            warn!(
                "dht checksum mismatch: computed {} received {}",
                frame.checksum(),
                bytes[4]
            );
            Status::ChecksumError
        };

        debug!("dht humidity {} temperature {}", humidity, temperature);

        Reading {
            humidity,
            temperature,
            status,
        }
    }
}
