//! Multi-user output register
//!
//! Every port keeps a small LIFO stack of `(value, enable)` claims, one per
//! logical user (a coil note, a motor command, a network request...). The top
//! of the stack is the state that should be visible on the hardware; the port
//! only goes idle once the last claim is released.
//!
//! The bank also stores the two scalars of the shared output-enable blink
//! generator (duty ratio and period), which are independent of per-port state.
//!
//! [`SharedRegister`] wraps the bank in a `critical-section` mutex so the
//! command task, the coil task and interrupt producers can all use it.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;

/// Default number of ports on one board side
pub const DEFAULT_PORTS: usize = 24;

/// Default maximum number of stacked users per port
pub const DEFAULT_MAX_USERS: usize = 4;

/// Output-enable duty ratio after reset (0.0 means always on)
pub const DEFAULT_OE_RATIO: f32 = 0.0;

/// Output-enable period after reset, in seconds
pub const DEFAULT_OE_PERIOD: f32 = 1.0;

/// Largest value a slot can hold
pub const MAX_VALUE: i32 = u8::MAX as i32;

/// Register failure. State is never mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// Port index outside the bank
    InvalidPort,
    /// Every user slot of the port is taken
    Full,
    /// The port has no user
    Empty,
    /// Value, ratio or period outside its accepted range
    OutOfRange,
    /// A claim token no longer names the top of its port
    Stale,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidPort => "invalid port",
            Self::Full => "port is full",
            Self::Empty => "port has no user",
            Self::OutOfRange => "value out of range",
            Self::Stale => "stale claim",
        };
        f.write_str(text)
    }
}

/// Resolved state of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortState {
    /// Number of users (for a pull: the count before the pull)
    pub users: u8,
    /// Value of the slot
    pub value: u8,
    /// Enable flag of the slot
    pub enable: bool,
}

impl PortState {
    /// The empty/idle tuple `(0, 0, false)`
    pub const IDLE: Self = Self {
        users: 0,
        value: 0,
        enable: false,
    };

    pub const fn is_idle(self) -> bool {
        self.users == 0
    }
}

/// Identifies one user's slot at the moment it was pushed.
///
/// A token stays valid while that slot is the top of its port. Any pull,
/// reset or newer push on top of it makes [`OutputRegister::retune`] reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    port: usize,
    depth: u8,
    claim: u32,
}

impl ClaimToken {
    pub const fn port(self) -> usize {
        self.port
    }

    /// User count of the port when the claim was taken
    pub const fn depth(self) -> u8 {
        self.depth
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    value: u8,
    enable: bool,
    claim: u32,
}

impl Slot {
    const EMPTY: Self = Self {
        value: 0,
        enable: false,
        claim: 0,
    };
}

#[derive(Debug, Clone, Copy)]
struct PortStack<const MAX_USERS: usize> {
    users: u8,
    slots: [Slot; MAX_USERS],
    generation: u32,
}

impl<const MAX_USERS: usize> PortStack<MAX_USERS> {
    const IDLE: Self = Self {
        users: 0,
        slots: [Slot::EMPTY; MAX_USERS],
        generation: 0,
    };

    fn depth(&self) -> usize {
        usize::from(self.users)
    }

    fn is_full(&self) -> bool {
        self.depth() >= MAX_USERS
    }

    fn next_claim(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    fn top(&self) -> Option<&Slot> {
        self.depth().checked_sub(1).map(|index| &self.slots[index])
    }

    fn top_mut(&mut self) -> Option<&mut Slot> {
        self.depth().checked_sub(1).map(|index| &mut self.slots[index])
    }

    fn state(&self) -> PortState {
        match self.top() {
            Some(slot) => PortState {
                users: self.users,
                value: slot.value,
                enable: slot.enable,
            },
            None => PortState::IDLE,
        }
    }

    fn push(&mut self, value: u8, enable: bool) -> Result<u8, RegisterError> {
        if self.is_full() {
            return Err(RegisterError::Full);
        }
        let index = self.depth();
        let claim = self.next_claim();
        self.slots[index] = Slot {
            value,
            enable,
            claim,
        };
        self.users += 1;
        Ok(self.users)
    }

    fn pull(&mut self) -> PortState {
        let Some(index) = self.depth().checked_sub(1) else {
            return PortState::IDLE;
        };
        let prior = self.users;
        let slot = core::mem::replace(&mut self.slots[index], Slot::EMPTY);
        self.users -= 1;
        self.next_claim();

        PortState {
            users: prior,
            value: slot.value,
            enable: slot.enable,
        }
    }

    fn clean_above(&mut self) {
        let depth = self.depth();
        for slot in &mut self.slots[depth..] {
            *slot = Slot::EMPTY;
        }
    }

    fn clear(&mut self) {
        self.users = 0;
        self.slots = [Slot::EMPTY; MAX_USERS];
        self.next_claim();
    }
}

/// Reference-counted register bank for `PORTS` outputs with up to
/// `MAX_USERS` stacked users each
#[derive(Debug, Clone)]
pub struct OutputRegister<const PORTS: usize, const MAX_USERS: usize> {
    ports: [PortStack<MAX_USERS>; PORTS],
    oe_ratio: f32,
    oe_period: f32,
}

impl<const PORTS: usize, const MAX_USERS: usize> OutputRegister<PORTS, MAX_USERS> {
    /// Create an idle register bank
    pub const fn new() -> Self {
        const { assert!(MAX_USERS > 0 && MAX_USERS <= u8::MAX as usize) };
        Self {
            ports: [PortStack::IDLE; PORTS],
            oe_ratio: DEFAULT_OE_RATIO,
            oe_period: DEFAULT_OE_PERIOD,
        }
    }

    fn stack(&self, port: usize) -> Result<&PortStack<MAX_USERS>, RegisterError> {
        self.ports.get(port).ok_or(RegisterError::InvalidPort)
    }

    fn stack_mut(&mut self, port: usize) -> Result<&mut PortStack<MAX_USERS>, RegisterError> {
        self.ports.get_mut(port).ok_or(RegisterError::InvalidPort)
    }

    /// Append a new user claim and return the new user count
    pub fn push_port(&mut self, port: usize, value: i32, enable: bool) -> Result<u8, RegisterError> {
        let stack = self.stack_mut(port)?;
        let value = checked_value(value)?;
        stack.push(value, enable)
    }

    /// Release the most recent claim
    ///
    /// Returns the popped slot with the user count it had before the pull.
    /// An empty port yields [`PortState::IDLE`] and stays untouched.
    pub fn pull_port(&mut self, port: usize) -> Result<PortState, RegisterError> {
        Ok(self.stack_mut(port)?.pull())
    }

    /// Current user count with the top slot, without touching the stack
    pub fn get_port(&self, port: usize) -> Result<PortState, RegisterError> {
        Ok(self.stack(port)?.state())
    }

    /// Current user count of a port
    pub fn read_user(&self, port: usize) -> Result<u8, RegisterError> {
        Ok(self.stack(port)?.users)
    }

    /// Value of the current user
    pub fn read_value(&self, port: usize) -> Result<u8, RegisterError> {
        self.stack(port)?
            .top()
            .map(|slot| slot.value)
            .ok_or(RegisterError::Empty)
    }

    /// Enable flag of the current user
    pub fn read_enable(&self, port: usize) -> Result<bool, RegisterError> {
        self.stack(port)?
            .top()
            .map(|slot| slot.enable)
            .ok_or(RegisterError::Empty)
    }

    /// Value and enable flag of user `user`, counted from 1
    pub fn read_slot(&self, port: usize, user: u8) -> Result<(u8, bool), RegisterError> {
        let stack = self.stack(port)?;
        if user == 0 || user > stack.users {
            return Err(RegisterError::Empty);
        }
        let slot = &stack.slots[usize::from(user) - 1];
        Ok((slot.value, slot.enable))
    }

    fn writable_top(&mut self, port: usize) -> Result<&mut Slot, RegisterError> {
        let stack = self.stack_mut(port)?;
        if stack.is_full() {
            return Err(RegisterError::Full);
        }
        stack.top_mut().ok_or(RegisterError::Empty)
    }

    /// Overwrite the value of the current user
    ///
    /// Only allowed while the port has at least one user and is not full.
    pub fn write_value(&mut self, port: usize, value: i32) -> Result<u8, RegisterError> {
        let value = checked_value(value)?;
        self.writable_top(port)?.value = value;
        Ok(value)
    }

    /// Overwrite the enable flag of the current user
    ///
    /// Same conditions as [`Self::write_value`].
    pub fn write_enable(&mut self, port: usize, enable: bool) -> Result<bool, RegisterError> {
        self.writable_top(port)?.enable = enable;
        Ok(enable)
    }

    /// Allocate a new, cleared user slot and return the new user count
    pub fn increase_user(&mut self, port: usize) -> Result<u8, RegisterError> {
        self.stack_mut(port)?.push(0, false)
    }

    /// Drop the current user and return the new user count
    ///
    /// The released slot keeps its content until [`Self::clean_values`].
    pub fn decrease_user(&mut self, port: usize) -> Result<u8, RegisterError> {
        let stack = self.stack_mut(port)?;
        if stack.users == 0 {
            return Err(RegisterError::Empty);
        }
        stack.users -= 1;
        stack.next_claim();
        Ok(stack.users)
    }

    /// Clear every slot above the current user, returning the user count
    pub fn clean_values(&mut self, port: usize) -> Result<u8, RegisterError> {
        let stack = self.stack_mut(port)?;
        stack.clean_above();
        Ok(stack.users)
    }

    pub fn read_oe_ratio(&self) -> f32 {
        self.oe_ratio
    }

    pub fn read_oe_period(&self) -> f32 {
        self.oe_period
    }

    /// Set the output-enable duty ratio, accepted in `[0.0, 1.0]`
    pub fn write_oe_ratio(&mut self, ratio: f32) -> Result<f32, RegisterError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(RegisterError::OutOfRange);
        }
        self.oe_ratio = ratio;
        Ok(ratio)
    }

    /// Set the output-enable period in seconds, accepted when positive
    pub fn write_oe_period(&mut self, period: f32) -> Result<f32, RegisterError> {
        if !(period.is_finite() && period > 0.0) {
            return Err(RegisterError::OutOfRange);
        }
        self.oe_period = period;
        Ok(period)
    }

    /// Snapshot of the resolved state of every port
    pub fn get_all(&self) -> [PortState; PORTS] {
        core::array::from_fn(|port| self.ports[port].state())
    }

    /// Push one claim per port from a bulk state
    ///
    /// `None` entries are skipped, as are ports that are already full.
    /// Returns the user count of every port afterwards.
    pub fn set_all(&mut self, entries: &[Option<(u8, bool)>; PORTS]) -> [u8; PORTS] {
        for (stack, entry) in self.ports.iter_mut().zip(entries) {
            if let Some((value, enable)) = *entry {
                // Full ports are left as they are
                let _ = stack.push(value, enable);
            }
        }
        core::array::from_fn(|port| self.ports[port].users)
    }

    /// Claim token for the current top of a port
    pub fn claim_top(&self, port: usize) -> Result<ClaimToken, RegisterError> {
        let stack = self.stack(port)?;
        let slot = stack.top().ok_or(RegisterError::Empty)?;
        Ok(ClaimToken {
            port,
            depth: stack.users,
            claim: slot.claim,
        })
    }

    /// Change the value of the slot named by `token`
    ///
    /// Only succeeds while that slot is still the top of its port.
    pub fn retune(&mut self, token: ClaimToken, value: u8) -> Result<PortState, RegisterError> {
        let stack = self.stack_mut(token.port)?;
        if stack.users != token.depth {
            return Err(RegisterError::Stale);
        }
        match stack.top_mut() {
            Some(slot) if slot.claim == token.claim => slot.value = value,
            _ => return Err(RegisterError::Stale),
        }
        Ok(stack.state())
    }

    /// Drop every claim on a port
    pub fn reset_port(&mut self, port: usize) -> Result<(), RegisterError> {
        self.stack_mut(port)?.clear();
        Ok(())
    }

    /// Drop every claim on every port and restore the output-enable defaults
    pub fn reset_all(&mut self) {
        for stack in &mut self.ports {
            stack.clear();
        }
        self.oe_ratio = DEFAULT_OE_RATIO;
        self.oe_period = DEFAULT_OE_PERIOD;
    }
}

impl<const PORTS: usize, const MAX_USERS: usize> Default for OutputRegister<PORTS, MAX_USERS> {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_value(value: i32) -> Result<u8, RegisterError> {
    u8::try_from(value).map_err(|_| RegisterError::OutOfRange)
}

/// [`OutputRegister`] behind a critical-section mutex.
///
/// Each call to [`Self::lock`] is one critical section, so a whole
/// transaction (push then claim, reset of a motor pair...) is atomic with
/// respect to interrupts and the other tasks. Never do bus I/O inside it.
pub struct SharedRegister<const PORTS: usize, const MAX_USERS: usize> {
    inner: Mutex<RefCell<OutputRegister<PORTS, MAX_USERS>>>,
}

impl<const PORTS: usize, const MAX_USERS: usize> SharedRegister<PORTS, MAX_USERS> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(OutputRegister::new())),
        }
    }

    /// Run `f` on the register inside a critical section
    pub fn lock<R>(&self, f: impl FnOnce(&mut OutputRegister<PORTS, MAX_USERS>) -> R) -> R {
        critical_section::with(|cs| {
            let mut register = self.inner.borrow(cs).borrow_mut();
            f(&mut register)
        })
    }

    /// Resolved state of one port
    pub fn get_port(&self, port: usize) -> Result<PortState, RegisterError> {
        self.lock(|register| register.get_port(port))
    }

    /// Resolved state of every port
    pub fn get_all(&self) -> [PortState; PORTS] {
        self.lock(|register| register.get_all())
    }
}

impl<const PORTS: usize, const MAX_USERS: usize> Default for SharedRegister<PORTS, MAX_USERS> {
    fn default() -> Self {
        Self::new()
    }
}
