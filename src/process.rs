//! What the enhancement code needs from the debugger hosting it.

use serde::{Deserialize, Serialize};

use crate::arch::ArchInfo;
use crate::error::MemoryError;

pub trait MemoryReader {
    /// Read `length` bytes. With `partial`, a read that runs into unmapped
    /// memory returns the bytes that were readable instead of failing.
    fn read(&self, address: u64, length: usize, partial: bool) -> Result<Vec<u8>, MemoryError>;

    fn peek(&self, address: u64) -> bool {
        self.read(address, 1, false).is_ok()
    }

    /// Unsigned integer of `size` bytes in target byte order.
    fn read_uint(&self, arch: &ArchInfo, address: u64, size: usize) -> Result<u64, MemoryError> {
        let bytes = self.read(address, size, false)?;
        Ok(arch.unpack(&bytes))
    }

    fn read_pointer(&self, arch: &ArchInfo, address: u64) -> Result<u64, MemoryError> {
        self.read_uint(arch, address, arch.ptrsize)
    }
}

pub trait RegisterReader {
    fn register(&self, name: &str) -> Option<u64>;

    fn pc(&self) -> Option<u64>;

    fn sp(&self) -> Option<u64>;

    fn flags(&self, name: &str) -> Option<u64> {
        self.register(name)
    }
}

pub trait SymbolResolver {
    /// `name` or `name+offset` for an address inside a known symbol.
    fn resolve(&self, address: u64) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    #[serde(default)]
    pub objfile: String,
}

impl Page {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

pub trait MemoryClassifier {
    fn page_containing(&self, address: u64) -> Option<Page>;
}

/// A stopped process (or a stand-in for one) as seen by the enhancer.
pub trait Debuggee: MemoryReader + RegisterReader + SymbolResolver + MemoryClassifier {
    fn arch(&self) -> ArchInfo;
}
