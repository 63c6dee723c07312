//! A simulated single-wire sensor sharing a virtual microsecond clock with
//! the driver under test.
//!
//! Every clock read advances time by one microsecond. The sensor starts
//! playing its next scripted waveform the moment the driver switches the
//! line to input.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dht_mqtt::timing::{DhtPin, MicrosClock, Timing};
use embedded_hal::digital::PinState;

pub const ACK_DELAY_US: u64 = 20;
pub const ACK_LOW_US: u64 = 80;
pub const ACK_HIGH_US: u64 = 80;
pub const BIT_LOW_US: u64 = 50;
pub const ZERO_HIGH_US: u64 = 26;
pub const ONE_HIGH_US: u64 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    Output,
    Input,
    Write(PinState),
}

/// What the sensor does after the line is released: a list of
/// `(level, duration)` segments followed by a level held forever.
#[derive(Debug, Clone)]
pub struct Waveform {
    segments: Vec<(PinState, u64)>,
    tail: PinState,
}

impl Waveform {
    /// A sensor that never answers.
    pub fn silent() -> Self {
        Waveform {
            segments: Vec::new(),
            tail: PinState::High,
        }
    }

    /// Handshake followed by one high pulse per entry of `widths`.
    pub fn with_high_pulses(widths: &[u64]) -> Self {
        let mut segments = vec![
            (PinState::High, ACK_DELAY_US),
            (PinState::Low, ACK_LOW_US),
            (PinState::High, ACK_HIGH_US),
        ];
        for &width in widths {
            segments.push((PinState::Low, BIT_LOW_US));
            segments.push((PinState::High, width));
        }
        segments.push((PinState::Low, BIT_LOW_US));
        Waveform {
            segments,
            tail: PinState::High,
        }
    }

    pub fn frame(bytes: [u8; 5]) -> Self {
        Self::with_high_pulses(&pulse_widths(bytes))
    }

    /// Drops everything from segment `index` on and holds `level` instead.
    pub fn cut_at(mut self, index: usize, level: PinState) -> Self {
        self.segments.truncate(index);
        self.tail = level;
        self
    }

    fn level_at(&self, mut offset: u64) -> PinState {
        for &(level, duration) in &self.segments {
            if offset < duration {
                return level;
            }
            offset -= duration;
        }
        self.tail
    }
}

pub fn pulse_widths(bytes: [u8; 5]) -> Vec<u64> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |bit| (byte >> bit) & 1 == 1))
        .map(|one| if one { ONE_HIGH_US } else { ZERO_HIGH_US })
        .collect()
}

pub fn with_checksum(data: [u8; 4]) -> [u8; 5] {
    let sum = data.iter().fold(0u8, |s, b| s.wrapping_add(*b));
    [data[0], data[1], data[2], data[3], sum]
}

#[derive(Default)]
struct Bus {
    now: Cell<u64>,
    driving: Cell<bool>,
    events: RefCell<Vec<(u64, PinEvent)>>,
    scripts: RefCell<VecDeque<Waveform>>,
    playing: RefCell<Option<(u64, Waveform)>>,
    first_sample: Cell<Option<u64>>,
    watch_section: Cell<bool>,
    section_samples: RefCell<Vec<bool>>,
}

impl Bus {
    fn record(&self, event: PinEvent) {
        self.events.borrow_mut().push((self.now.get(), event));
    }

    fn advance(&self, micros: u64) {
        self.now.set(self.now.get().wrapping_add(micros));
    }
}

/// Handle used by the test to script the sensor and inspect the line.
#[derive(Clone, Default)]
pub struct Sensor {
    bus: Rc<Bus>,
}

impl Sensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: u64) -> Self {
        let sensor = Self::default();
        sensor.bus.now.set(now);
        sensor
    }

    pub fn script(&self, waveform: Waveform) -> &Self {
        self.bus.scripts.borrow_mut().push_back(waveform);
        self
    }

    pub fn now(&self) -> u64 {
        self.bus.now.get()
    }

    pub fn events(&self) -> Vec<(u64, PinEvent)> {
        self.bus.events.borrow().clone()
    }

    /// Clock value of the first line sample after the latest release.
    pub fn first_sample(&self) -> Option<u64> {
        self.bus.first_sample.get()
    }

    /// On the first sample of every read, records whether another thread
    /// was locked out of the global critical section.
    pub fn watch_critical_section(&self) -> &Self {
        self.bus.watch_section.set(true);
        self
    }

    pub fn section_samples(&self) -> Vec<bool> {
        self.bus.section_samples.borrow().clone()
    }

    pub fn pin(&self) -> SimPin {
        SimPin {
            bus: Rc::clone(&self.bus),
        }
    }

    pub fn timing(&self) -> SimTiming {
        SimTiming {
            bus: Rc::clone(&self.bus),
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay {
            bus: Rc::clone(&self.bus),
        }
    }
}

pub struct SimPin {
    bus: Rc<Bus>,
}

impl DhtPin for SimPin {
    fn set_output(&mut self) {
        self.bus.driving.set(true);
        *self.bus.playing.borrow_mut() = None;
        self.bus.record(PinEvent::Output);
    }

    fn set_input(&mut self) {
        self.bus.driving.set(false);
        let next = self.bus.scripts.borrow_mut().pop_front();
        *self.bus.playing.borrow_mut() = next.map(|waveform| (self.bus.now.get(), waveform));
        self.bus.first_sample.set(None);
        self.bus.record(PinEvent::Input);
    }

    fn write_level(&mut self, level: PinState) {
        self.bus.record(PinEvent::Write(level));
    }

    fn read_level(&mut self) -> PinState {
        if self.bus.first_sample.get().is_none() {
            self.bus.first_sample.set(Some(self.bus.now.get()));
            if self.bus.watch_section.get() {
                self.bus.section_samples.borrow_mut().push(critical_section_held());
            }
        }
        match &*self.bus.playing.borrow() {
            Some((released, waveform)) => {
                waveform.level_at(self.bus.now.get().wrapping_sub(*released))
            }
            None => PinState::High,
        }
    }
}

/// Whether some thread holds the global critical section right now.
///
/// A helper thread tries to enter it and gets 200 ms to do so. A helper
/// that was locked out finishes on its own once the section is left.
pub fn critical_section_held() -> bool {
    let (done, entered) = mpsc::channel();
    thread::spawn(move || {
        critical_section::with(|_cs| ());
        done.send(()).ok();
    });
    entered.recv_timeout(Duration::from_millis(200)).is_err()
}

pub struct SimTiming {
    bus: Rc<Bus>,
}

impl MicrosClock for SimTiming {
    fn now_micros(&self) -> u64 {
        let now = self.bus.now.get();
        self.bus.advance(1);
        now
    }
}

impl Timing for SimTiming {
    fn delay_millis(&mut self, millis: u32) {
        self.bus.advance(u64::from(millis) * 1_000);
    }
}

pub struct SimDelay {
    bus: Rc<Bus>,
}

impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.bus.advance(u64::from(ns).div_ceil(1_000));
    }
}
