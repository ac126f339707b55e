//! Command routing
//!
//! Decoded messages become [`Command`]s, which the [`Dispatcher`] applies to
//! the coil drivers of each board side. Side A owns ports `0..PORTS`, side B
//! (when fitted) owns `PORTS..2 * PORTS`. Ports beyond the outputs wired on
//! a side, as given by [`BoardConfig`], are ignored.
//!
//! Board commands live under `/{osc_name}`, maintenance commands under
//! `/tools`.

use core::fmt::Write;

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use heapless::{String, Vec};

use crate::coil::{CoilDriver, DriverError};
use crate::config::BoardConfig;
use crate::inbox::Inbox;
use crate::log;
use crate::osc::{self, Argument, Message};
use crate::port::Port;
use crate::register::RegisterError;
use crate::task_queue::DispatchResult;
use crate::{BridgeControl, LedDriver, OutputEnable};

/// Maximum number of board sides
pub const MAX_SIDES: usize = 2;

/// Capacity of a debug reply
pub const REPLY_SIZE: usize = 64;

/// Address of debug replies
pub const DEBUG_ADDRESS: &str = "/debug";

/// A ping reply is sent every time this many counts have accumulated
const COUNT_REPORT_EVERY: i32 = 100;

/// Text of a debug reply
pub type ReplyText = String<REPLY_SIZE>;

/// Decoded board command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `coil ii`: release the coil if `intensity` is 0, else start it
    Coil { port: i32, intensity: i32 },
    /// `motor iii`: drive a motor pair, speed in `-255..=255`
    Motor { port: i32, next_port: i32, speed: i32 },
    /// `motor_brake ii`
    MotorBrake { port: i32, next_port: i32 },
    /// `motor_coast ii`
    MotorCoast { port: i32, next_port: i32 },
    /// `ll/output ii`: raw enable line
    Output { port: i32, state: i32 },
    /// `ll/output_all i`
    OutputAll { state: i32 },
    /// `ll/output_state i`: report an enable line
    OutputState { port: i32 },
    /// `ll/pwm ii`: raw PWM intensity `0..=255`
    Pwm { port: i32, value: i32 },
    /// `ll/pwm_all i`
    PwmAll { value: i32 },
    /// `ll/pwm_state i`: report the resolved intensity of a port
    PwmState { port: i32 },
    /// `ll/oe ff`: output-enable duty cycle and period
    OutputEnable { cycle: Option<f32>, period: Option<f32> },
    /// `/tools/debug i`
    Debug(bool),
    /// `/tools/forceoff_all`
    ForceOffAll,
    /// `/tools/softreset`
    SoftReset,
    /// `/tools/count i`: network reliability ping
    Count(i32),
    /// `/tools/connect`: handled by the transport
    Connect,
    /// `/tools/hardreset`: handled by the transport
    HardReset,
}

impl Command {
    /// Map a message to a command
    ///
    /// Returns `None` for unknown addresses or missing arguments. Extra
    /// arguments are ignored.
    pub fn parse(message: &Message<'_>, osc_name: &str) -> Option<Self> {
        let address = message.address();
        let args = message.args();

        if let Some(tool) = address.strip_prefix("/tools/") {
            return Self::parse_tool(tool, args);
        }

        let route = address.strip_prefix('/')?.strip_prefix(osc_name)?;
        let command = match (route, args) {
            ("/coil", [Argument::Int(port), Argument::Int(intensity), ..]) => Self::Coil {
                port: *port,
                intensity: *intensity,
            },
            ("/motor", [Argument::Int(port), Argument::Int(next_port), Argument::Int(speed), ..]) => {
                Self::Motor {
                    port: *port,
                    next_port: *next_port,
                    speed: *speed,
                }
            }
            ("/motor_brake", [Argument::Int(port), Argument::Int(next_port), ..]) => {
                Self::MotorBrake {
                    port: *port,
                    next_port: *next_port,
                }
            }
            ("/motor_coast", [Argument::Int(port), Argument::Int(next_port), ..]) => {
                Self::MotorCoast {
                    port: *port,
                    next_port: *next_port,
                }
            }
            ("/ll/output", [Argument::Int(port), Argument::Int(state), ..]) => Self::Output {
                port: *port,
                state: *state,
            },
            ("/ll/output_all", [Argument::Int(state), ..]) => Self::OutputAll { state: *state },
            ("/ll/output_state", [Argument::Int(port), ..]) => Self::OutputState { port: *port },
            ("/ll/pwm", [Argument::Int(port), Argument::Int(value), ..]) => Self::Pwm {
                port: *port,
                value: *value,
            },
            ("/ll/pwm_all", [Argument::Int(value), ..]) => Self::PwmAll { value: *value },
            ("/ll/pwm_state", [Argument::Int(port), ..]) => Self::PwmState { port: *port },
            ("/ll/oe", args) => {
                let float_at = |index: usize| match args.get(index) {
                    Some(Argument::Float(value)) => Some(*value),
                    _ => None,
                };
                Self::OutputEnable {
                    cycle: float_at(0),
                    period: float_at(1),
                }
            }
            _ => return None,
        };
        Some(command)
    }

    fn parse_tool(tool: &str, args: &[Argument<'_>]) -> Option<Self> {
        let command = match (tool, args) {
            ("debug", [Argument::Int(state), ..]) => Self::Debug(*state != 0),
            ("forceoff_all", _) => Self::ForceOffAll,
            ("softreset", _) => Self::SoftReset,
            ("count", [Argument::Int(count), ..]) => Self::Count(*count),
            ("connect", _) => Self::Connect,
            ("hardreset", _) => Self::HardReset,
            _ => return None,
        };
        Some(command)
    }
}

/// What the transport should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Nothing to send
    Silent,
    /// Send a debug reply to the client
    Debug(ReplyText),
    /// Remember the sender as the client address
    Connect,
    /// Reboot the board
    HardReset,
}

fn reply(args: core::fmt::Arguments<'_>) -> Response {
    let mut text = ReplyText::new();
    // Long replies are truncated
    let _ = text.write_fmt(args);
    Response::Debug(text)
}

/// Routes commands to the coil drivers of each board side
pub struct Dispatcher<'a, D, P, O, B, const PORTS: usize, const MAX_USERS: usize> {
    board: BoardConfig,
    sides: Vec<CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>, MAX_SIDES>,
    debug: bool,
    count: i64,
    small_count: i32,
}

impl<'a, D, P, O, B, const PORTS: usize, const MAX_USERS: usize> Dispatcher<'a, D, P, O, B, PORTS, MAX_USERS>
where
    D: LedDriver,
    P: OutputPin,
    O: OutputEnable,
    B: BridgeControl,
{
    pub fn new(board: BoardConfig, side_a: CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>) -> Self {
        if board.max_users != MAX_USERS {
            log::warning!(
                "{} expects {} user(s) per output, drivers allow {}",
                board.name,
                board.max_users,
                MAX_USERS
            );
        }
        let mut sides = Vec::new();
        let _ = sides.push(side_a);
        Self {
            board,
            sides,
            debug: false,
            count: 0,
            small_count: 0,
        }
    }

    /// Attach the next board side, giving it back if all sides are taken
    pub fn add_side(
        &mut self,
        driver: CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>,
    ) -> Result<(), CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>> {
        self.sides.push(driver)
    }

    pub const fn board(&self) -> &BoardConfig {
        &self.board
    }

    pub const fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Driver of a board side, 0 being side A
    pub fn side(&self, index: usize) -> Option<&CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>> {
        self.sides.get(index)
    }

    pub fn side_mut(&mut self, index: usize) -> Option<&mut CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>> {
        self.sides.get_mut(index)
    }

    /// Side and local port of a global port number, if that output is wired
    fn locate(&self, port: i32) -> Option<(usize, usize)> {
        let port = usize::try_from(port).ok()?;
        let (side, local) = (port / PORTS, port % PORTS);
        (local < self.board.outputs(side).min(PORTS)).then_some((side, local))
    }

    /// Side driver and local port of a global port number
    fn route(&mut self, port: i32) -> Option<(&mut CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>, usize)> {
        let (side, local) = self.locate(port)?;
        let driver = self.sides.get_mut(side)?;
        Some((driver, local))
    }

    /// Side driver and local ports of a motor pair. Both ports must sit on
    /// the same side.
    fn route_pair(
        &mut self,
        port: i32,
        next_port: i32,
    ) -> Option<(&mut CoilDriver<'a, D, P, O, B, PORTS, MAX_USERS>, usize, usize)> {
        let (side, port) = self.locate(port)?;
        let (next_side, next_port) = self.locate(next_port)?;
        if side != next_side {
            return None;
        }
        let driver = self.sides.get_mut(side)?;
        Some((driver, port, next_port))
    }

    /// Poll the fault line of every side, reporting each new fault
    ///
    /// Faults are reported whether or not debug replies are enabled.
    pub fn check_faults(&mut self, mut respond: impl FnMut(Response)) {
        for (index, side) in self.sides.iter_mut().enumerate() {
            if side.check_fault() {
                let card = if index == 0 { 'A' } else { 'B' };
                log::warning!("overcurrent on card {}", card);
                respond(reply(format_args!(
                    "OVERCURRENT ERROR on card {}. Please reset",
                    card
                )));
            }
        }
    }

    /// Decode and apply one packet
    pub fn handle_packet(&mut self, packet: &[u8], now: Instant) -> Response {
        let message = match Message::parse(packet) {
            Ok(message) => message,
            Err(err) => {
                log::warning!("dropping packet: {}", err);
                return Response::Silent;
            }
        };
        match Command::parse(&message, self.board.osc_name) {
            Some(command) => self.execute(command, now),
            None => {
                log::debug!("no route for {}", message.address());
                Response::Silent
            }
        }
    }

    /// Apply every command waiting in `inbox`, handing each response to `respond`
    pub fn process_pending<const SIZE: usize>(
        &mut self,
        inbox: &Inbox<Command, SIZE>,
        now: Instant,
        mut respond: impl FnMut(Response),
    ) {
        while let Some(command) = inbox.take() {
            let response = self.execute(command, now);
            if response != Response::Silent {
                respond(response);
            }
        }
    }

    /// Run due coil tasks on every side, returning the earliest next deadline
    pub fn poll(&mut self, now: Instant) -> DispatchResult {
        let mut combined = DispatchResult {
            ran: 0,
            next_deadline: None,
            sleep_duration: None,
        };
        for side in &mut self.sides {
            let result = side.poll(now);
            combined.ran += result.ran;
            combined.next_deadline = earliest(combined.next_deadline, result.next_deadline);
            combined.sleep_duration = earliest(combined.sleep_duration, result.sleep_duration);
        }
        combined
    }

    /// Apply one command
    pub fn execute(&mut self, command: Command, now: Instant) -> Response {
        match command {
            Command::Coil { port, intensity } => self.coil(port, intensity, now),
            Command::Motor {
                port,
                next_port,
                speed,
            } => {
                if !(-255..=255).contains(&speed) {
                    return Response::Silent;
                }
                let result = self
                    .route_pair(port, next_port)
                    .map_or(Err(DriverError::Pairing), |(driver, port, next_port)| {
                        driver.motor(port, next_port, speed)
                    });
                Self::pairing_reply("/main/motor", result)
            }
            Command::MotorBrake { port, next_port } => {
                let result = self
                    .route_pair(port, next_port)
                    .map_or(Err(DriverError::Pairing), |(driver, port, next_port)| {
                        driver.motor_brake(port, next_port)
                    });
                Self::pairing_reply("/main/motor_brake", result)
            }
            Command::MotorCoast { port, next_port } => {
                let result = self
                    .route_pair(port, next_port)
                    .map_or(Err(DriverError::Pairing), |(driver, port, next_port)| {
                        driver.motor_coast(port, next_port)
                    });
                Self::pairing_reply("/main/motor_coast", result)
            }
            Command::Output { port, state } => {
                let debug = self.debug;
                let Some(level) = as_level(state) else {
                    return Response::Silent;
                };
                let Some((driver, local)) = self.route(port) else {
                    return Response::Silent;
                };
                let _ = driver.drv_enable(Port::Single(local), level);
                if debug {
                    return reply(format_args!("OUT {} {}", port, state));
                }
                Response::Silent
            }
            Command::OutputAll { state } => {
                let Some(level) = as_level(state) else {
                    return Response::Silent;
                };
                for side in &mut self.sides {
                    let _ = side.drv_enable(Port::All, level);
                }
                if self.debug {
                    return reply(format_args!("ALL OUT {}", state));
                }
                Response::Silent
            }
            Command::OutputState { port } => {
                let Some((driver, local)) = self.route(port) else {
                    return Response::Silent;
                };
                let level = driver.enabled(local).unwrap_or(false);
                reply(format_args!("OUT {} {}", port, u8::from(level)))
            }
            Command::Pwm { port, value } => {
                let debug = self.debug;
                let Ok(ratio) = u8::try_from(value) else {
                    return Response::Silent;
                };
                let Some((driver, local)) = self.route(port) else {
                    return Response::Silent;
                };
                let _ = driver.pwm_set(Port::Single(local), ratio);
                if debug {
                    return reply(format_args!("OUT {} PWM {}", port, value));
                }
                Response::Silent
            }
            Command::PwmAll { value } => {
                let Ok(ratio) = u8::try_from(value) else {
                    return Response::Silent;
                };
                for side in &mut self.sides {
                    let _ = side.pwm_set(Port::All, ratio);
                }
                if self.debug {
                    return reply(format_args!("ALL PWM {:2}", value));
                }
                Response::Silent
            }
            Command::PwmState { port } => {
                let Some((driver, local)) = self.route(port) else {
                    return Response::Silent;
                };
                match driver.state(local) {
                    Ok(state) => reply(format_args!("OUT {} PWM {}", port, state.value)),
                    Err(_) => Response::Silent,
                }
            }
            Command::OutputEnable { cycle, period } => {
                for side in &mut self.sides {
                    if let Some(cycle) = cycle.filter(|cycle| *cycle > 0.0) {
                        let _ = side.oe_cycle(cycle);
                    }
                    if let Some(period) = period {
                        let _ = side.oe_period(period);
                    }
                }
                Response::Silent
            }
            Command::Debug(enabled) => {
                self.debug = enabled;
                reply(format_args!("DEBUG {}", if enabled { "ON" } else { "OFF" }))
            }
            Command::ForceOffAll => {
                self.force_off_all();
                Response::Silent
            }
            Command::SoftReset => {
                self.soft_reset();
                reply(format_args!("RESET STATES..."))
            }
            Command::Count(count) => self.count(count),
            Command::Connect => Response::Connect,
            Command::HardReset => {
                self.force_off_all();
                Response::HardReset
            }
        }
    }

    fn coil(&mut self, port: i32, intensity: i32, now: Instant) -> Response {
        let debug = self.debug;
        let Some((driver, local)) = self.route(port) else {
            return Response::Silent;
        };
        if intensity != 0 {
            if let Err(err) = driver.coil_on_default(local, now) {
                log::debug!("coil {} not started: {}", port, err);
            }
            return Response::Silent;
        }

        if let Err(err) = driver.coil_off(local) {
            log::debug!("coil {} not released: {}", port, err);
        }
        if debug {
            let users = driver.users(local).unwrap_or(0);
            return reply(format_args!("COIL {} : {} use(s)", port, users));
        }
        Response::Silent
    }

    fn pairing_reply(address: &str, result: Result<(), DriverError>) -> Response {
        match result {
            Err(DriverError::Pairing | DriverError::Register(RegisterError::InvalidPort)) => {
                reply(format_args!("{} : wrong PINs configuration (see manual)", address))
            }
            Err(err) => {
                log::warning!("{} failed: {}", address, err);
                Response::Silent
            }
            Ok(()) => Response::Silent,
        }
    }

    /// Turn every output off and put the output-enable generator back to
    /// always-on
    pub fn force_off_all(&mut self) {
        for side in &mut self.sides {
            let _ = side.force_off(Port::All);
            let _ = side.oe_cycle(0.0);
            let _ = side.oe_period(1.0);
        }
    }

    /// Rebuild every side driver, dropping all claims and queued tasks
    pub fn soft_reset(&mut self) {
        let sides = core::mem::take(&mut self.sides);
        for side in sides {
            // Same number of sides as before, so this cannot overflow
            let _ = self.sides.push(side.soft_reset());
        }
        log::info!("soft reset of {} side(s)", self.sides.len());
    }

    fn count(&mut self, count: i32) -> Response {
        self.small_count = self.small_count.saturating_add(count);
        self.count = self.count.saturating_add(i64::from(count));
        if self.small_count >= COUNT_REPORT_EVERY {
            self.small_count = 0;
            return reply(format_args!("{}", self.count));
        }
        Response::Silent
    }

    /// Encode a debug reply as an OSC message into `buf`
    pub fn encode_reply(&self, text: &str, buf: &mut [u8]) -> Result<usize, osc::Error> {
        let mut header: String<REPLY_SIZE> = String::new();
        let _ = write!(header, "{} ({}):", self.board.name, self.board.version);
        Message::new(DEBUG_ADDRESS)
            .with(Argument::Str(&header))?
            .with(Argument::Str(text))?
            .write(buf)
    }
}

fn as_level(state: i32) -> Option<bool> {
    match state {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn earliest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
