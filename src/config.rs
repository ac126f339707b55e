//! Board and driver configuration
//!
//! Defaults follow the two reference boards: "suraig" (two sides of 24
//! outputs) and "respi" (a single side).

use embassy_time::Duration;

/// PWM register value that turns an output off. The LED driver sinks current,
/// so the register value is inverted relative to the output intensity.
pub const PWM_OFF: u8 = u8::MAX;

/// PWM register value that drives an output fully
pub const PWM_FULL: u8 = 0;

/// Attack/sustain envelope used to protect solenoids from continuous full
/// current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilTimings {
    /// Intensity of the initial pulse
    pub attack: u8,
    /// Intensity held after the pulse
    pub sustain: u8,
    /// Length of the pulse
    pub attack_delay: Duration,
}

impl CoilTimings {
    pub const DEFAULT: Self = Self {
        attack: 255,
        sustain: 230,
        attack_delay: Duration::from_millis(20),
    };
}

impl Default for CoilTimings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration of one coil driver (one board side)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverConfig {
    /// Output current limit written to every port at init (0-255)
    pub current_limit: u8,
    /// Default coil envelope
    pub coil: CoilTimings,
    /// Output-enable duty ratio at init
    pub oe_ratio: f32,
    /// Output-enable period at init, in seconds
    pub oe_period: f32,
}

impl DriverConfig {
    pub const DEFAULT: Self = Self {
        // 50 % of the chip's full-scale current
        current_limit: 127,
        coil: CoilTimings::DEFAULT,
        oe_ratio: 0.0,
        oe_period: 1.0,
    };
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Identity and layout of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardConfig {
    /// Human readable board name, used in debug replies
    pub name: &'static str,
    /// First component of every board command address (`/{osc_name}/...`)
    pub osc_name: &'static str,
    /// Firmware version string
    pub version: &'static str,
    /// Outputs wired on side A
    pub side_a_outputs: usize,
    /// Outputs wired on side B, 0 when the side is not fitted
    pub side_b_outputs: usize,
    /// Users allowed to stack on one output. Build the drivers with the same
    /// `MAX_USERS`.
    pub max_users: usize,
}

impl BoardConfig {
    /// Two cards: 24 outputs on side A, 18 on side B, one user per output
    pub const SURAIG: Self = Self {
        name: "SURAIGU board",
        osc_name: "suraig",
        version: "v0.3",
        side_a_outputs: 24,
        side_b_outputs: 18,
        max_users: 1,
    };

    /// A single card with 24 outputs shared by up to four users
    pub const RESPI: Self = Self {
        name: "RESPIRATOR board",
        osc_name: "respi",
        version: "v0.3",
        side_a_outputs: 24,
        side_b_outputs: 0,
        max_users: 4,
    };

    pub const fn has_side_b(&self) -> bool {
        self.side_b_outputs > 0
    }

    /// Outputs wired on a side, 0 being side A
    pub const fn outputs(&self, side: usize) -> usize {
        match side {
            0 => self.side_a_outputs,
            1 => self.side_b_outputs,
            _ => 0,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::SURAIG
    }
}
