//! ESP32-C3 bindings for the driver: a flex GPIO and the embassy time driver.

use embassy_time::{block_for, Duration, Instant};
use embedded_hal::digital::PinState;
use esp_hal::gpio::{Flex, InputConfig, Level, OutputConfig, Pull};

use crate::timing::{DhtPin, MicrosClock, Timing};

/// A GPIO that switches between driving and listening on the data line.
pub struct FlexPin<'d> {
    pin: Flex<'d>,
}

impl<'d> FlexPin<'d> {
    pub fn new(mut pin: Flex<'d>) -> Self {
        pin.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
        pin.set_input_enable(true);
        FlexPin { pin }
    }
}

impl DhtPin for FlexPin<'_> {
    fn set_output(&mut self) {
        self.pin
            .apply_output_config(&OutputConfig::default().with_pull(Pull::Down));
        self.pin.set_output_enable(true);
    }

    fn set_input(&mut self) {
        self.pin.set_output_enable(false);
        self.pin
            .apply_input_config(&InputConfig::default().with_pull(Pull::Up));
        self.pin.set_input_enable(true);
    }

    #[inline(always)]
    fn write_level(&mut self, level: PinState) {
        self.pin.set_level(Level::from(bool::from(level)));
    }

    #[inline(always)]
    fn read_level(&mut self) -> PinState {
        PinState::from(self.pin.is_high())
    }
}

/// Microsecond clock backed by the embassy time driver (SYSTIMER on the C3).
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyTiming;

impl MicrosClock for EmbassyTiming {
    #[inline(always)]
    fn now_micros(&self) -> u64 {
        Instant::now().as_micros()
    }
}

impl Timing for EmbassyTiming {
    fn delay_millis(&mut self, millis: u32) {
        block_for(Duration::from_millis(u64::from(millis)));
    }
}
