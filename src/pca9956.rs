//! PCA9956A 24-channel constant-current LED driver
//!
//! Only the parts used as a PWM front-end are covered: per-port and broadcast
//! PWM/IREF registers, the init block and the general-call software reset.
//! See the NXP PCA9956B datasheet for the register map.

use core::fmt;

use embedded_hal::i2c::I2c;

use crate::{LedDriver, port::Port};

/// Number of outputs on the chip
pub const PORTS: usize = 24;

/// 7-bit address with AD pins strapped Vdd-GND-Vdd (0xD2 on the wire)
pub const DEFAULT_ADDRESS: u8 = 0x69;

/// Register auto-increment flag, or-ed into the first register address
const AUTO_INCREMENT: u8 = 0x80;

/// General-call address and the software reset byte
const GENERAL_CALL: u8 = 0x00;
const SWRST: u8 = 0x06;

/// LEDOUT value putting all four outputs of a register under PWM + GRPPWM control
const LEDOUT_PWM_GROUP: u8 = 0xAA;

/// IREF written by [`Pca9956::initialize`] (10 % of full scale)
const INITIAL_CURRENT: u8 = 25;

mod reg {
    pub(super) const MODE1: u8 = 0x00;
    pub(super) const PWM0: u8 = 0x0A;
    pub(super) const IREF0: u8 = 0x22;
    pub(super) const PWMALL: u8 = 0x3F;
    pub(super) const IREFALL: u8 = 0x40;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// The bus rejected the transfer
    Bus(E),
    /// Single port beyond the chip's outputs, nothing was written
    InvalidPort(usize),
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(err) => write!(f, "i2c error: {:?}", err),
            Self::InvalidPort(port) => write!(f, "no output {} on the chip", port),
        }
    }
}

pub struct Pca9956<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pca9956<I2C> {
    /// `address` is the 7-bit bus address
    pub const fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Put the chip in a known state: outputs off, low current, normal mode,
    /// every output on individual PWM with group dimming.
    pub fn initialize(&mut self) -> Result<(), Error<I2C::Error>> {
        self.pwm(Port::All, 0)?;
        self.current(Port::All, INITIAL_CURRENT)?;

        let init = [
            AUTO_INCREMENT | reg::MODE1,
            0x00, // MODE1
            0x00, // MODE2
            LEDOUT_PWM_GROUP,
            LEDOUT_PWM_GROUP,
            LEDOUT_PWM_GROUP,
            LEDOUT_PWM_GROUP,
            LEDOUT_PWM_GROUP,
            LEDOUT_PWM_GROUP,
            0x80, // GRPPWM
            0x00, // GRPFREQ
        ];
        self.i2c.write(self.address, &init).map_err(Error::Bus)
    }

    /// Software reset of every PCA995x on the bus
    pub fn reset(&mut self) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(GENERAL_CALL, &[SWRST]).map_err(Error::Bus)
    }

    /// Write one PWM register, or `PWMALL`
    pub fn pwm(&mut self, port: Port, value: u8) -> Result<(), Error<I2C::Error>> {
        self.write_register(register_for(port, reg::PWM0, reg::PWMALL)?, value)
    }

    /// Write one IREF register, or `IREFALL`
    pub fn current(&mut self, port: Port, value: u8) -> Result<(), Error<I2C::Error>> {
        self.write_register(register_for(port, reg::IREF0, reg::IREFALL)?, value)
    }

    /// Write all 24 PWM registers in one auto-increment transfer
    pub fn pwm_all(&mut self, values: &[u8; PORTS]) -> Result<(), Error<I2C::Error>> {
        self.write_block(reg::PWM0, values)
    }

    /// Write all 24 IREF registers in one auto-increment transfer
    pub fn current_all(&mut self, values: &[u8; PORTS]) -> Result<(), Error<I2C::Error>> {
        self.write_block(reg::IREF0, values)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c.write(self.address, &[register, value]).map_err(Error::Bus)
    }

    fn write_block(&mut self, start: u8, values: &[u8; PORTS]) -> Result<(), Error<I2C::Error>> {
        let mut data = [0u8; PORTS + 1];
        data[0] = AUTO_INCREMENT | start;
        data[1..].copy_from_slice(values);
        self.i2c.write(self.address, &data).map_err(Error::Bus)
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }
}

/// Register of one port in a per-port bank, or the broadcast register
fn register_for<E>(port: Port, first: u8, broadcast: u8) -> Result<u8, Error<E>> {
    match port {
        Port::Single(index) if index < PORTS => Ok(first + index as u8),
        Port::Single(index) => Err(Error::InvalidPort(index)),
        Port::All => Ok(broadcast),
    }
}

impl<I2C: I2c> LedDriver for Pca9956<I2C> {
    type Error = Error<I2C::Error>;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        Pca9956::initialize(self)
    }

    fn write_pwm(&mut self, port: Port, value: u8) -> Result<(), Self::Error> {
        self.pwm(port, value)
    }

    fn write_current_limit(&mut self, port: Port, level: u8) -> Result<(), Self::Error> {
        self.current(port, level)
    }
}
