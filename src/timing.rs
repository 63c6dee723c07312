//! Microsecond timing and raw pin access for single-wire protocols.
//!
//! Everything in here is infallible: a bare-metal GPIO and a free-running
//! timer are assumed to always be there.

use core::hint::spin_loop;

use embedded_hal::digital::{InputPin, OutputPin, PinState};

/// Monotonic microsecond counter.
///
/// The counter may wrap on long uptimes, so compare instants with
/// [`elapsed_micros`] rather than with `<`.
pub trait MicrosClock {
    fn now_micros(&self) -> u64;
}

/// Microseconds from `since` to `now`, tolerating one counter wrap.
#[inline(always)]
pub fn elapsed_micros(since: u64, now: u64) -> u64 {
    now.wrapping_sub(since)
}

/// Busy waits on `clock` for at least `micros` microseconds.
pub fn busy_wait_micros<C: MicrosClock + ?Sized>(clock: &C, micros: u32) {
    if micros == 0 {
        return;
    }
    let start = clock.now_micros();
    let target = start.wrapping_add(u64::from(micros));
    if target < start {
        // the target lies past the wrap, let the counter roll over first
        while clock.now_micros() >= start {
            spin_loop();
        }
    }
    while clock.now_micros() < target {
        spin_loop();
    }
}

pub trait Timing: MicrosClock {
    /// Busy wait, never yields. Safe to use inside timing critical code.
    fn delay_micros(&mut self, micros: u32) {
        busy_wait_micros(self, micros);
    }

    /// Sleep used around a transaction, never while sampling bits.
    /// Implementations are free to yield to other work.
    fn delay_millis(&mut self, millis: u32);
}

/// A bidirectional data line.
pub trait DhtPin {
    /// Drive mode: pull-up disabled, pull-down enabled.
    fn set_output(&mut self);
    /// Listen mode: pull-up enabled, pull-down disabled, so the idle line reads high.
    fn set_input(&mut self);
    fn write_level(&mut self, level: PinState);
    fn read_level(&mut self) -> PinState;
}

/// Drives a [`DhtPin`] through any embedded-hal open-drain pin.
///
/// An open-drain output that is set high is released and the external
/// pull-up takes the line, so switching to input is the same as writing
/// high. Pin errors are ignored and a failed read counts as low.
pub struct OpenDrainPin<P> {
    pin: P,
}

impl<P> OpenDrainPin<P>
where
    P: InputPin + OutputPin,
{
    pub fn new(pin: P) -> Self {
        OpenDrainPin { pin }
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P> DhtPin for OpenDrainPin<P>
where
    P: InputPin + OutputPin,
{
    fn set_output(&mut self) {}

    fn set_input(&mut self) {
        self.pin.set_high().ok();
    }

    fn write_level(&mut self, level: PinState) {
        self.pin.set_state(level).ok();
    }

    fn read_level(&mut self) -> PinState {
        PinState::from(matches!(self.pin.is_high(), Ok(true)))
    }
}

/// Pairs a [`MicrosClock`] with an embedded-hal delay for the millisecond sleeps.
pub struct ClockDelay<C, D> {
    clock: C,
    delay: D,
}

impl<C, D> ClockDelay<C, D>
where
    C: MicrosClock,
    D: embedded_hal::delay::DelayNs,
{
    pub fn new(clock: C, delay: D) -> Self {
        ClockDelay { clock, delay }
    }
}

impl<C: MicrosClock, D> MicrosClock for ClockDelay<C, D> {
    fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }
}

impl<C, D> Timing for ClockDelay<C, D>
where
    C: MicrosClock,
    D: embedded_hal::delay::DelayNs,
{
    fn delay_millis(&mut self, millis: u32) {
        self.delay.delay_ms(millis);
    }
}
