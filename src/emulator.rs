use crate::arch::Architecture;
use crate::error::EmulationError;
use crate::process::Debuggee;

/// Result of a successful single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Address of the instruction that was executed.
    pub address: u64,
    pub size: u64,
}

/// A sandboxed CPU seeded from the debuggee's state at the program counter.
pub trait Emulator {
    fn pc(&self) -> u64;

    fn single_step(&mut self, check_valid: bool) -> Result<StepOutcome, EmulationError>;

    fn read_register(&self, name: &str) -> Option<u64>;

    /// Chase pointers through emulated memory. The first entry is `address`.
    fn telescope(&self, address: u64, limit: usize, read_size: Option<usize>) -> Vec<u64>;

    fn format_telescope(&self, addresses: &[u64], limit: usize, string_length: usize) -> String;
}

pub trait EmulatorFactory {
    fn supports(&self, arch: Architecture) -> bool;

    fn create(&self, process: &dyn Debuggee) -> Result<Box<dyn Emulator>, EmulationError>;
}

/// Emulator state threaded through one window assembly.
#[derive(Default)]
pub enum Emulation {
    #[default]
    Off,
    Active(Box<dyn Emulator>),
}

impl Emulation {
    pub fn is_active(&self) -> bool {
        matches!(self, Emulation::Active(_))
    }

    pub fn active(&self) -> Option<&dyn Emulator> {
        match self {
            Emulation::Active(emu) => Some(emu.as_ref()),
            Emulation::Off => None,
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut (dyn Emulator + 'static)> {
        match self {
            Emulation::Active(emu) => Some(emu.as_mut()),
            Emulation::Off => None,
        }
    }

    /// Stop trusting the emulator for the rest of the walk.
    pub fn discard(&mut self) {
        *self = Emulation::Off;
    }
}

impl std::fmt::Debug for Emulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Emulation::Off => f.write_str("Off"),
            Emulation::Active(emu) => write!(f, "Active(pc={:#x})", emu.pc()),
        }
    }
}
