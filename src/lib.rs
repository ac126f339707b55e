//! Coil and motor output arbitration for PCA9956-driven H-bridge boards.
//!
//! Outputs are claimed through a multi-user [`register::OutputRegister`]:
//! several logical users (network notes, motor commands, deferred sustain
//! writes) can stack on the same port, and the port only goes idle when the
//! last one releases it. [`coil::CoilDriver`] turns those claims into PWM
//! writes on the LED driver chip and enable-line levels on the H-bridges.
//!
//! | Module | Purpose |
//! | ------ | ------- |
//! | [`register`] | Per-port LIFO claim stacks and the shared output-enable scalars |
//! | [`coil`] | Coil/motor operations, attack/sustain envelope |
//! | [`task_queue`] | Deferred calls for the sustain phase |
//! | [`pca9956`] | LED driver chip over `embedded-hal` I2C |
//! | [`osc`] | Command packet codec |
//! | [`dispatcher`] | Command routing to the board sides |
//! | [`inbox`] | Command hand-off from interrupt producers |
//! | [`enable`] | H-bridge enable lines |

#![no_std]

pub mod coil;
pub mod config;
pub mod dispatcher;
pub mod enable;
pub mod handle;
pub mod inbox;
mod log;
pub mod osc;
pub mod pca9956;
pub mod port;
pub mod register;
pub mod task_queue;

pub use coil::{CoilDriver, CoilTask, DriverError};
pub use config::{BoardConfig, CoilTimings, DriverConfig, PWM_FULL, PWM_OFF};
pub use dispatcher::{Command, Dispatcher, Response};
pub use enable::{BridgeLines, EnableBank, SoftOutputEnable};
pub use handle::Handle;
pub use inbox::Inbox;
pub use pca9956::Pca9956;
pub use port::Port;
pub use register::{ClaimToken, OutputRegister, PortState, RegisterError, SharedRegister};
pub use task_queue::TaskQueue;

pub use embassy_time::{Duration, Instant};

/// LED driver chip used as PWM front-end
///
/// Implement this trait to support other constant-current drivers. Values are
/// raw register values: `0` is fully on and `255` is off for a current-sinking
/// chip.
pub trait LedDriver {
    type Error: core::fmt::Debug;

    /// Bring the chip to its power-on configuration
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Write the PWM register of one port, or of every port
    fn write_pwm(&mut self, port: Port, value: u8) -> Result<(), Self::Error>;

    /// Write the output current limit of one port, or of every port
    fn write_current_limit(&mut self, port: Port, level: u8) -> Result<(), Self::Error>;
}

/// Shared output-enable blink generator (the chip's OE pin driven by PWM)
pub trait OutputEnable {
    /// Duty ratio in `[0.0, 1.0]`; 0.0 keeps the outputs always on
    fn set_duty(&mut self, ratio: f32);

    /// Period in seconds
    fn set_period(&mut self, seconds: f32);
}

/// Boards without a controllable OE line
impl OutputEnable for () {
    fn set_duty(&mut self, _ratio: f32) {}

    fn set_period(&mut self, _seconds: f32) {}
}

/// Reset and fault lines of the H-bridge chips of one board side
///
/// See [`enable::BridgeLines`] for the usual pair of GPIOs.
pub trait BridgeControl {
    type Error: core::fmt::Debug;

    /// Hold the bridges in reset, or let them run
    fn hold_reset(&mut self, held: bool) -> Result<(), Self::Error>;

    /// Returns true while a bridge reports a fault (overcurrent or
    /// overtemperature)
    fn fault(&mut self) -> Result<bool, Self::Error>;
}

/// Boards without reset or fault wiring
impl BridgeControl for () {
    type Error = core::convert::Infallible;

    fn hold_reset(&mut self, _held: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    fn fault(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}
