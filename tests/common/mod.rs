#![allow(dead_code)]

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::i2c::{self, I2c, Operation, SevenBitAddress};
use myrtio_coil_driver::{
    BridgeLines, CoilDriver, DriverConfig, EnableBank, Handle, LedDriver, OutputEnable, Port,
};

pub const PORTS: usize = 24;
pub const MAX_USERS: usize = 4;

/// What the fake chip has seen
#[derive(Debug)]
pub struct ChipLog {
    pub pwm: [u8; PORTS],
    pub current: [u8; PORTS],
    pub writes: Vec<(Port, u8)>,
    pub inits: usize,
    pub fail: bool,
}

impl Default for ChipLog {
    fn default() -> Self {
        Self {
            pwm: [0; PORTS],
            current: [0; PORTS],
            writes: Vec::new(),
            inits: 0,
            fail: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeChip(pub Rc<RefCell<ChipLog>>);

impl FakeChip {
    pub fn pwm(&self, port: usize) -> u8 {
        self.0.borrow().pwm[port]
    }

    pub fn write_count(&self) -> usize {
        self.0.borrow().writes.len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.0.borrow_mut().fail = fail;
    }
}

impl LedDriver for FakeChip {
    type Error = ();

    fn initialize(&mut self) -> Result<(), Self::Error> {
        let mut log = self.0.borrow_mut();
        if log.fail {
            return Err(());
        }
        log.inits += 1;
        Ok(())
    }

    fn write_pwm(&mut self, port: Port, value: u8) -> Result<(), Self::Error> {
        let mut log = self.0.borrow_mut();
        if log.fail {
            return Err(());
        }
        log.writes.push((port, value));
        for index in port.indices(PORTS) {
            log.pwm[index] = value;
        }
        Ok(())
    }

    fn write_current_limit(&mut self, port: Port, level: u8) -> Result<(), Self::Error> {
        let mut log = self.0.borrow_mut();
        if log.fail {
            return Err(());
        }
        for index in port.indices(PORTS) {
            log.current[index] = level;
        }
        Ok(())
    }
}

/// Enable line writing into a shared level table
pub struct FakePin {
    index: usize,
    levels: Rc<RefCell<[bool; PORTS]>>,
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut()[self.index] = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut()[self.index] = true;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeOe(pub Rc<RefCell<(f32, f32)>>);

impl FakeOe {
    pub fn duty(&self) -> f32 {
        self.0.borrow().0
    }

    pub fn period(&self) -> f32 {
        self.0.borrow().1
    }
}

impl OutputEnable for FakeOe {
    fn set_duty(&mut self, ratio: f32) {
        self.0.borrow_mut().0 = ratio;
    }

    fn set_period(&mut self, seconds: f32) {
        self.0.borrow_mut().1 = seconds;
    }
}

/// A wire both driven and read by the test, with every driven level kept
#[derive(Clone)]
pub struct Wire(pub Rc<RefCell<(bool, Vec<bool>)>>);

impl Wire {
    pub fn new(level: bool) -> Self {
        Self(Rc::new(RefCell::new((level, Vec::new()))))
    }

    pub fn set(&self, level: bool) {
        self.0.borrow_mut().0 = level;
    }

    pub fn history(&self) -> Vec<bool> {
        self.0.borrow().1.clone()
    }
}

impl ErrorType for Wire {
    type Error = Infallible;
}

impl OutputPin for Wire {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut wire = self.0.borrow_mut();
        wire.0 = false;
        wire.1.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut wire = self.0.borrow_mut();
        wire.0 = true;
        wire.1.push(true);
        Ok(())
    }
}

impl InputPin for Wire {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.borrow().0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow().0)
    }
}

pub type TestBridge = BridgeLines<Wire, Wire>;

pub type TestDriver =
    CoilDriver<'static, FakeChip, FakePin, FakeOe, TestBridge, PORTS, MAX_USERS>;

/// Probes into the fake hardware of one driver
pub struct Bench {
    pub chip: FakeChip,
    pub lines: Rc<RefCell<[bool; PORTS]>>,
    pub oe: FakeOe,
    /// Active-low bridge reset
    pub reset: Wire,
    /// Active-low bridge fault, idle high
    pub fault: Wire,
}

impl Bench {
    pub fn line(&self, port: usize) -> bool {
        self.lines.borrow()[port]
    }
}

/// Enable pins of one side sharing a level table, all lines starting high
pub fn pins() -> ([FakePin; PORTS], Rc<RefCell<[bool; PORTS]>>) {
    let lines = Rc::new(RefCell::new([true; PORTS]));
    let pins = core::array::from_fn(|index| FakePin {
        index,
        levels: lines.clone(),
    });
    (pins, lines)
}

pub fn driver() -> (TestDriver, Bench) {
    let chip = FakeChip::default();
    let (pins, lines) = pins();
    let oe = FakeOe(Rc::new(RefCell::new((-1.0, -1.0))));
    let reset = Wire::new(true);
    let fault = Wire::new(true);
    let driver = CoilDriver::new(
        Handle::Owned(chip.clone()),
        EnableBank::new(pins),
        oe.clone(),
        BridgeLines::new(reset.clone(), fault.clone()),
        &DriverConfig::default(),
    );
    let bench = Bench {
        chip,
        lines,
        oe,
        reset,
        fault,
    };
    (driver, bench)
}

/// I2C bus recording every write as `(address, bytes)`
#[derive(Default)]
pub struct FakeI2c {
    pub writes: Vec<(u8, Vec<u8>)>,
}

impl i2c::ErrorType for FakeI2c {
    type Error = Infallible;
}

impl I2c<SevenBitAddress> for FakeI2c {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::Write(bytes) => self.writes.push((address, bytes.to_vec())),
                Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}
