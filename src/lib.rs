// Crate root: declare modules and control visibility
pub mod arch;
pub mod assistant;
pub mod bits;
pub mod chain;
pub mod config;
pub mod decoder;
pub mod emulator;
pub mod error;
pub mod format;
pub mod instruction;
pub mod logging;
pub mod process;
pub mod session;
pub mod snapshot;
pub mod symbols;

// Re-export commonly used API from the library for binaries/tests
pub use arch::{ArchInfo, Architecture};
pub use assistant::{enhance, Assistant, AssistantTable};
pub use config::{Config, EmulateMode};
pub use emulator::{Emulation, Emulator, EmulatorFactory};
pub use error::{Error, Result};
pub use instruction::{Condition, Instruction, Operand, OperandKind};
pub use process::Debuggee;
pub use session::Session;
pub use snapshot::Snapshot;
pub use symbols::SymbolTable;
