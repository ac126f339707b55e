//! Coil and motor driver for one board side
//!
//! Every port goes through the same two steps: a transaction on the
//! [`SharedRegister`] decides what the port should look like, then the
//! result is written to the LED driver chip (PWM, inverted) and to the
//! H-bridge enable line. Register failures skip the hardware write.
//!
//! A port is idle when its stack is empty (line low, PWM off) and active as
//! long as one user holds it (line high, PWM `255 - value`).
//!
//! The bridges are held in reset while the driver initializes. Their fault
//! line is polled by [`CoilDriver::check_fault`].

use core::fmt;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;

use crate::config::{DriverConfig, PWM_FULL, PWM_OFF};
use crate::enable::EnableBank;
use crate::handle::Handle;
use crate::log;
use crate::port::Port;
use crate::register::{ClaimToken, PortState, RegisterError, SharedRegister};
use crate::task_queue::{DispatchResult, TaskQueue};
use crate::{BridgeControl, LedDriver, OutputEnable};

/// Capacity of the deferred coil task queue
pub const COIL_QUEUE_SIZE: usize = 32;

/// Largest motor speed magnitude
pub const MAX_SPEED: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The register rejected the transaction, nothing was written
    Register(RegisterError),
    /// Motor ports are not an even/odd pair
    Pairing,
    /// The chip or an enable line reported an error
    Bus,
}

impl From<RegisterError> for DriverError {
    fn from(err: RegisterError) -> Self {
        Self::Register(err)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(err) => write!(f, "register: {}", err),
            Self::Pairing => f.write_str("wrong motor port pairing"),
            Self::Bus => f.write_str("bus error"),
        }
    }
}

/// Deferred work of the coil task queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilTask {
    /// Lower a coil to its hold intensity once the attack pulse is over
    Sustain { token: ClaimToken, sustain: u8 },
}

fn bus_error<E: fmt::Debug>(err: E) -> DriverError {
    log::warning!("hardware write failed: {:?}", err);
    DriverError::Bus
}

/// Driver of one board side: `PORTS` outputs sharing one LED driver chip
pub struct CoilDriver<'a, D, P, O, B, const PORTS: usize, const MAX_USERS: usize> {
    chip: Handle<'a, D>,
    lines: EnableBank<P, PORTS>,
    oe: O,
    bridge: B,
    faulted: bool,
    register: SharedRegister<PORTS, MAX_USERS>,
    queue: TaskQueue<CoilTask, COIL_QUEUE_SIZE>,
    config: DriverConfig,
}

impl<'a, D, P, O, B, const PORTS: usize, const MAX_USERS: usize> CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>
where
    D: LedDriver,
    P: OutputPin,
    O: OutputEnable,
    B: BridgeControl,
{
    /// Create a driver and bring the hardware to its idle state
    ///
    /// Init failures are logged; the driver is usable once the bus recovers.
    pub fn new(
        chip: Handle<'a, D>,
        lines: EnableBank<P, PORTS>,
        oe: O,
        bridge: B,
        config: &DriverConfig,
    ) -> Self {
        let mut driver = Self {
            chip,
            lines,
            oe,
            bridge,
            faulted: false,
            register: SharedRegister::new(),
            queue: TaskQueue::new(),
            config: *config,
        };
        if let Err(err) = driver.init() {
            log::warning!("coil driver init failed: {}", err);
        }
        driver
    }

    /// Bridges stay in reset while the chip and the lines are set up
    fn init(&mut self) -> Result<(), DriverError> {
        self.bridge.hold_reset(true).map_err(bus_error)?;
        let result = self.init_outputs();
        self.bridge.hold_reset(false).map_err(bus_error)?;
        result?;
        log::info!("coil driver ready, {} ports", PORTS);
        Ok(())
    }

    fn init_outputs(&mut self) -> Result<(), DriverError> {
        self.chip.initialize().map_err(bus_error)?;
        self.chip
            .write_current_limit(Port::All, self.config.current_limit)
            .map_err(bus_error)?;
        self.write_outputs(Port::All, false, PWM_OFF)?;
        self.oe_cycle(self.config.oe_ratio)?;
        self.oe_period(self.config.oe_period)
    }

    /// Force every output off and rebuild the driver from its configuration.
    ///
    /// Queued sustain tasks are dropped with the old instance.
    pub fn soft_reset(mut self) -> Self {
        if let Err(err) = self.force_off(Port::All) {
            log::warning!("force off before reset failed: {}", err);
        }
        let Self {
            chip,
            lines,
            oe,
            bridge,
            config,
            ..
        } = self;
        Self::new(chip, lines, oe, bridge, &config)
    }

    /// Returns true once when the bridges start reporting a fault
    ///
    /// The fault stays latched until the line clears; the bridges need a
    /// reset to recover. Read errors are logged and count as no fault.
    pub fn check_fault(&mut self) -> bool {
        let fault = match self.bridge.fault() {
            Ok(fault) => fault,
            Err(err) => {
                log::warning!("fault line read failed: {:?}", err);
                false
            }
        };
        let raised = fault && !self.faulted;
        self.faulted = fault;
        raised
    }

    /// Whether the last [`Self::check_fault`] saw the fault line active
    pub const fn faulted(&self) -> bool {
        self.faulted
    }

    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Read access to the register, for status queries
    pub const fn register(&self) -> &SharedRegister<PORTS, MAX_USERS> {
        &self.register
    }

    /// Resolved state of a port
    pub fn state(&self, port: usize) -> Result<PortState, DriverError> {
        Ok(self.register.get_port(port)?)
    }

    /// Number of users holding a port
    pub fn users(&self, port: usize) -> Result<u8, DriverError> {
        Ok(self.register.lock(|register| register.read_user(port))?)
    }

    /// Last level written to a port's enable line
    pub fn enabled(&self, port: usize) -> Option<bool> {
        self.lines.level(port)
    }

    /// Number of deferred tasks waiting
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    fn check(port: Port) -> Result<(), DriverError> {
        if port.is_valid(PORTS) {
            Ok(())
        } else {
            Err(RegisterError::InvalidPort.into())
        }
    }

    fn write_outputs(&mut self, port: Port, level: bool, pwm: u8) -> Result<(), DriverError> {
        self.lines.set(port, level).map_err(bus_error)?;
        self.chip.write_pwm(port, pwm).map_err(bus_error)
    }

    /// Push a claim on one port and drive it, returning the claim
    fn activate(&mut self, port: usize, ratio: u8) -> Result<ClaimToken, DriverError> {
        let token = self.register.lock(|register| {
            register.push_port(port, i32::from(ratio), true)?;
            register.claim_top(port)
        })?;
        self.write_outputs(Port::Single(port), true, PWM_OFF - ratio)?;
        Ok(token)
    }

    /// Release one claim on one port, turning it off with the last one
    fn release(&mut self, port: usize) -> Result<PortState, DriverError> {
        let popped = self.register.lock(|register| register.pull_port(port))?;
        if popped.users == 1 {
            self.write_outputs(Port::Single(port), false, PWM_OFF)?;
        }
        Ok(popped)
    }

    /// Claim a port at `ratio` intensity
    ///
    /// For [`Port::All`] every port gets its own claim; ports that are full
    /// are skipped and the first error is returned.
    pub fn on(&mut self, port: Port, ratio: u8) -> Result<(), DriverError> {
        Self::check(port)?;
        let mut result = Ok(());
        for index in port.indices(PORTS) {
            if let Err(err) = self.activate(index, ratio) {
                log::debug!("on({}) skipped: {}", index, err);
                result = result.and(Err(err));
            }
        }
        result
    }

    /// Release a claim on a port
    ///
    /// The output is only turned off when its last user leaves; releasing an
    /// idle port does nothing.
    pub fn off(&mut self, port: Port) -> Result<(), DriverError> {
        Self::check(port)?;
        let mut result = Ok(());
        for index in port.indices(PORTS) {
            if let Err(err) = self.release(index) {
                result = result.and(Err(err));
            }
        }
        result
    }

    /// Drop every claim and turn the output off, whatever the user count
    pub fn force_off(&mut self, port: Port) -> Result<(), DriverError> {
        Self::check(port)?;
        self.register.lock(|register| {
            for index in port.indices(PORTS) {
                register.reset_port(index)?;
            }
            Ok::<_, RegisterError>(())
        })?;
        self.write_outputs(port, false, PWM_OFF)
    }

    /// Raw PWM write at `ratio` intensity, bypassing the register
    pub fn pwm_set(&mut self, port: Port, ratio: u8) -> Result<(), DriverError> {
        Self::check(port)?;
        self.chip.write_pwm(port, PWM_OFF - ratio).map_err(bus_error)
    }

    /// Raw enable-line write, bypassing the register
    pub fn drv_enable(&mut self, port: Port, state: bool) -> Result<(), DriverError> {
        Self::check(port)?;
        self.lines.set(port, state).map_err(bus_error)
    }

    /// Start a coil with an attack pulse, then drop to `sustain` after `delay`
    pub fn coil_on(
        &mut self,
        port: usize,
        attack: u8,
        sustain: u8,
        delay: Duration,
        now: Instant,
    ) -> Result<(), DriverError> {
        let token = self.activate(port, attack)?;
        let task = CoilTask::Sustain { token, sustain };
        if let Err(rejected) = self.queue.call_after(now, delay, task) {
            // Never leave a coil at attack current without its sustain
            log::warning!("coil queue full, port {} goes straight to sustain", port);
            self.run(rejected.0)?;
        }
        Ok(())
    }

    /// [`Self::coil_on`] with the configured envelope
    pub fn coil_on_default(&mut self, port: usize, now: Instant) -> Result<(), DriverError> {
        let timings = self.config.coil;
        self.coil_on(port, timings.attack, timings.sustain, timings.attack_delay, now)
    }

    pub fn coil_off(&mut self, port: usize) -> Result<(), DriverError> {
        self.off(Port::Single(port))
    }

    /// Apply the sustain intensity if the attacking claim is still on top
    fn coil_sustain(&mut self, token: ClaimToken, sustain: u8) -> Result<(), DriverError> {
        self.register.lock(|register| register.retune(token, sustain))?;
        self.chip
            .write_pwm(Port::Single(token.port()), PWM_OFF - sustain)
            .map_err(bus_error)
    }

    fn run(&mut self, task: CoilTask) -> Result<(), DriverError> {
        match task {
            CoilTask::Sustain { token, sustain } => self.coil_sustain(token, sustain),
        }
    }

    /// Run every deferred task due at `now`
    ///
    /// Sustains whose claim was released or covered in the meantime are
    /// dropped silently.
    pub fn poll(&mut self, now: Instant) -> DispatchResult {
        let mut ran = 0;
        while let Some(task) = self.queue.pop_due(now) {
            match self.run(task) {
                Ok(()) => {}
                Err(DriverError::Register(RegisterError::Stale)) => {
                    log::debug!("stale task dropped: {:?}", task);
                }
                Err(err) => log::warning!("coil task failed: {}", err),
            }
            ran += 1;
        }
        self.queue.timing(now, ran)
    }

    fn motor_pair(port: usize, next_port: usize) -> Result<(), DriverError> {
        if port.checked_add(1) != Some(next_port) || next_port % 2 == 0 || next_port >= PORTS {
            return Err(DriverError::Pairing);
        }
        Ok(())
    }

    /// Replace the claims of both ports of a motor pair in one transaction
    fn set_pair(
        &mut self,
        pair: (usize, usize),
        values: Option<(u8, u8)>,
    ) -> Result<(), DriverError> {
        let (port, next_port) = pair;
        self.register.lock(|register| {
            register.reset_port(port)?;
            register.reset_port(next_port)?;
            if let Some((value, next_value)) = values {
                register.push_port(port, i32::from(value), true)?;
                register.push_port(next_port, i32::from(next_value), true)?;
            }
            Ok::<_, RegisterError>(())
        })?;

        let (value, next_value) = values.unwrap_or((0, 0));
        let enabled = values.is_some();
        self.write_outputs(Port::Single(port), enabled, PWM_OFF - value)?;
        self.write_outputs(Port::Single(next_port), enabled, PWM_OFF - next_value)
    }

    /// Drive a push/pull motor on an even/odd port pair
    ///
    /// A positive `speed` drives `next_port`, a negative one drives `port`;
    /// the other half stays off. Both enable lines go high.
    pub fn motor(&mut self, port: usize, next_port: usize, speed: i32) -> Result<(), DriverError> {
        Self::motor_pair(port, next_port)?;
        if !(-MAX_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(RegisterError::OutOfRange.into());
        }
        let magnitude = speed.unsigned_abs() as u8;
        let values = if speed >= 0 {
            (0, magnitude)
        } else {
            (magnitude, 0)
        };
        self.set_pair((port, next_port), Some(values))
    }

    /// Short the motor: both halves fully on and enabled
    pub fn motor_brake(&mut self, port: usize, next_port: usize) -> Result<(), DriverError> {
        Self::motor_pair(port, next_port)?;
        let full = PWM_OFF - PWM_FULL;
        self.set_pair((port, next_port), Some((full, full)))
    }

    /// Let the motor freewheel: both halves off and disabled
    pub fn motor_coast(&mut self, port: usize, next_port: usize) -> Result<(), DriverError> {
        Self::motor_pair(port, next_port)?;
        self.set_pair((port, next_port), None)
    }

    /// Set the output-enable duty ratio, in `[0.0, 1.0]`
    pub fn oe_cycle(&mut self, ratio: f32) -> Result<(), DriverError> {
        self.register.lock(|register| register.write_oe_ratio(ratio))?;
        self.oe.set_duty(ratio);
        Ok(())
    }

    /// Set the output-enable period in seconds
    pub fn oe_period(&mut self, seconds: f32) -> Result<(), DriverError> {
        self.register.lock(|register| register.write_oe_period(seconds))?;
        self.oe.set_period(seconds);
        Ok(())
    }
}
