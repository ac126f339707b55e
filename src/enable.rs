//! GPIO side of a board: H-bridge enable lines (one per port), the bridges'
//! shared reset and fault lines, and a software output-enable generator.

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{InputPin, OutputPin, PinState};

use crate::port::Port;
use crate::register::{DEFAULT_OE_PERIOD, DEFAULT_OE_RATIO};
use crate::{BridgeControl, OutputEnable};

/// Port to enable-pin mapping
///
/// Built once at startup from the board pin table. The last written level of
/// every line is mirrored so status queries do not need readable pins.
pub struct EnableBank<P, const PORTS: usize> {
    pins: [P; PORTS],
    levels: [bool; PORTS],
}

impl<P: OutputPin, const PORTS: usize> EnableBank<P, PORTS> {
    /// Wrap the pins of one board side, index `n` driving port `n`
    ///
    /// Lines are assumed low until first written.
    pub const fn new(pins: [P; PORTS]) -> Self {
        Self {
            pins,
            levels: [false; PORTS],
        }
    }

    /// Drive one line, or every line for [`Port::All`]
    pub fn set(&mut self, port: Port, level: bool) -> Result<(), P::Error> {
        for index in port.indices(PORTS) {
            self.pins[index].set_state(PinState::from(level))?;
            self.levels[index] = level;
        }
        Ok(())
    }

    /// Last level written to a line
    pub fn level(&self, port: usize) -> Option<bool> {
        self.levels.get(port).copied()
    }

    /// Give the pins back
    pub fn release(self) -> [P; PORTS] {
        self.pins
    }
}

/// Active-low reset output and active-low fault input of DRV8844-style
/// bridges
pub struct BridgeLines<R, F> {
    reset: R,
    fault: F,
}

/// Error of one of the [`BridgeLines`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError<R, F> {
    Reset(R),
    Fault(F),
}

impl<R: OutputPin, F: InputPin> BridgeLines<R, F> {
    pub const fn new(reset: R, fault: F) -> Self {
        Self { reset, fault }
    }

    pub fn release(self) -> (R, F) {
        (self.reset, self.fault)
    }
}

impl<R: OutputPin, F: InputPin> BridgeControl for BridgeLines<R, F> {
    type Error = LineError<R::Error, F::Error>;

    fn hold_reset(&mut self, held: bool) -> Result<(), Self::Error> {
        self.reset
            .set_state(PinState::from(!held))
            .map_err(LineError::Reset)
    }

    fn fault(&mut self) -> Result<bool, Self::Error> {
        self.fault.is_low().map_err(LineError::Fault)
    }
}

/// Output-enable blinking done in software on the chip's active-low OE pin
///
/// The pin is high (outputs off) for `ratio * period` at the start of every
/// period. Call [`SoftOutputEnable::tick`] again after the returned delay.
pub struct SoftOutputEnable<P> {
    pin: P,
    ratio: f32,
    period: Duration,
}

impl<P: OutputPin> SoftOutputEnable<P> {
    pub fn new(pin: P) -> Self {
        let period = period_micros(DEFAULT_OE_PERIOD).unwrap_or(1_000_000);
        Self {
            pin,
            ratio: DEFAULT_OE_RATIO,
            period: Duration::from_micros(u64::from(period)),
        }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Time per period with the outputs switched off
    pub fn off_time(&self) -> Duration {
        let period = u32::try_from(self.period.as_micros()).unwrap_or(u32::MAX);
        Duration::from_micros(u64::from(duty_ticks(self.ratio, period)))
    }

    /// Drive the pin for `now`, returning the time until the next edge
    pub fn tick(&mut self, now: Instant) -> Result<Duration, P::Error> {
        let period = self.period.as_micros().max(1);
        let phase = now.as_micros() % period;
        let off = self.off_time().as_micros();
        if phase < off {
            self.pin.set_high()?;
            Ok(Duration::from_micros(off - phase))
        } else {
            self.pin.set_low()?;
            Ok(Duration::from_micros(period - phase))
        }
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> OutputEnable for SoftOutputEnable<P> {
    fn set_duty(&mut self, ratio: f32) {
        self.ratio = ratio.clamp(0.0, 1.0);
    }

    fn set_period(&mut self, seconds: f32) {
        if let Some(micros) = period_micros(seconds) {
            self.period = Duration::from_micros(u64::from(micros));
        }
    }
}

/// Compare value of an OE timer channel with `max_duty` steps
///
/// Also usable by hardware PWM implementations of [`OutputEnable`]. `ratio`
/// is clamped to `[0.0, 1.0]`.
pub fn duty_ticks(ratio: f32, max_duty: u32) -> u32 {
    let ratio = ratio.clamp(0.0, 1.0);
    libm::roundf(ratio * max_duty as f32) as u32
}

/// OE period in microseconds, `None` unless `seconds` is finite and positive
pub fn period_micros(seconds: f32) -> Option<u32> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some((libm::roundf(seconds * 1_000_000.0) as u32).max(1))
}
