//! A stopped process frozen to a file: registers, memory regions and
//! symbols. Used by the command line driver and by tests.
//!
//! ```json
//! {
//!   "arch": { "arch": "x86-64", "ptrsize": 8 },
//!   "registers": { "rip": "0x401000", "rsp": "0x7ffe0000", "rax": 0 },
//!   "regions": [
//!     { "start": "0x401000", "perms": "r-x", "objfile": "/bin/demo",
//!       "data": "48 8b 05 10 00 00 00 c3" }
//!   ],
//!   "symbols": [ { "name": "main", "address": "0x401000", "size": 8 } ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::arch::{ArchInfo, Architecture};
use crate::bits::mask;
use crate::error::{Error, MemoryError, Result};
use crate::process::{
    Debuggee, MemoryClassifier, MemoryReader, Page, RegisterReader, SymbolResolver,
};
use crate::symbols::{Symbol, SymbolTable, SymbolType};

#[derive(Debug, Clone)]
pub struct Region {
    pub start: u64,
    pub data: Vec<u8>,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub objfile: String,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.start.wrapping_add(self.data.len() as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    arch: ArchInfo,
    registers: HashMap<String, u64>,
    regions: BTreeMap<u64, Region>,
    symbols: SymbolTable,
}

// On-disk layout

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Text(String),
}

impl Number {
    fn value(&self) -> Result<u64> {
        match self {
            Number::Int(v) => Ok(*v),
            Number::Text(text) => parse_int(text),
        }
    }
}

#[derive(Deserialize)]
struct RegionFile {
    start: Number,
    data: String,
    #[serde(default = "default_perms")]
    perms: String,
    #[serde(default)]
    objfile: String,
}

fn default_perms() -> String {
    "rw-".to_string()
}

#[derive(Deserialize)]
struct SymbolFile {
    name: String,
    address: Number,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    kind: SymbolType,
}

#[derive(Deserialize)]
struct SnapshotFile {
    arch: ArchInfo,
    #[serde(default)]
    registers: BTreeMap<String, Number>,
    #[serde(default)]
    regions: Vec<RegionFile>,
    #[serde(default)]
    symbols: Vec<SymbolFile>,
}

fn parse_int(text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| Error::Snapshot(format!("bad number {:?}: {}", text, e)))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(Error::Snapshot("odd number of hex digits in region data".into()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::Snapshot(format!("bad hex byte {:?}", String::from_utf8_lossy(pair))))
        })
        .collect()
}

fn parse_perms(perms: &str) -> Result<(bool, bool, bool)> {
    let bytes = perms.as_bytes();
    if bytes.len() != 3 {
        return Err(Error::Snapshot(format!("bad permissions {:?}", perms)));
    }
    Ok((bytes[0] == b'r', bytes[1] == b'w', bytes[2] == b'x'))
}

impl Snapshot {
    pub fn new(arch: ArchInfo) -> Self {
        Self {
            arch,
            registers: HashMap::new(),
            regions: BTreeMap::new(),
            symbols: SymbolTable::new(),
        }
    }

    pub fn with_register(mut self, name: &str, value: u64) -> Self {
        self.set_register(name, value);
        self
    }

    pub fn set_register(&mut self, name: &str, value: u64) {
        self.registers.insert(name.to_lowercase(), value);
    }

    /// Map `data` at `start`. `perms` is `rwx` style, `-` for a missing bit.
    pub fn map(mut self, start: u64, data: impl Into<Vec<u8>>, perms: &str, objfile: &str) -> Self {
        let (readable, writable, executable) = parse_perms(perms).unwrap_or((true, true, false));
        self.regions.insert(
            start,
            Region {
                start,
                data: data.into(),
                readable,
                writable,
                executable,
                objfile: objfile.to_string(),
            },
        );
        self
    }

    pub fn with_symbol(mut self, name: &str, address: u64, size: u64) -> Self {
        self.symbols.insert(Symbol {
            name: name.to_string(),
            address,
            size,
            kind: SymbolType::Function,
        });
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn arch_info(&self) -> ArchInfo {
        self.arch
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: SnapshotFile =
            serde_json::from_str(text).map_err(|e| Error::Snapshot(e.to_string()))?;

        let mut snapshot = Snapshot::new(file.arch);
        for (name, value) in &file.registers {
            snapshot.set_register(name, value.value()?);
        }
        for region in file.regions {
            let (readable, writable, executable) = parse_perms(&region.perms)?;
            let start = region.start.value()?;
            snapshot.regions.insert(
                start,
                Region {
                    start,
                    data: parse_hex_bytes(&region.data)?,
                    readable,
                    writable,
                    executable,
                    objfile: region.objfile,
                },
            );
        }
        for symbol in file.symbols {
            snapshot.symbols.insert(Symbol {
                name: symbol.name,
                address: symbol.address.value()?,
                size: symbol.size,
                kind: symbol.kind,
            });
        }
        Ok(snapshot)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn region_containing(&self, address: u64) -> Option<&Region> {
        let (_, region) = self.regions.range(..=address).next_back()?;
        region.contains(address).then_some(region)
    }

    /// Narrower views of a register the snapshot stores at full width,
    /// as (full register, shift, width) candidates.
    fn sub_register(&self, name: &str) -> Vec<(String, u32, u32)> {
        const X86_GP: [&str; 8] = ["ax", "bx", "cx", "dx", "si", "di", "bp", "sp"];

        match self.arch.arch {
            Architecture::I8086 | Architecture::I386 | Architecture::X86_64 => {
                if let Some(stem) = name.strip_prefix('e') {
                    if X86_GP.contains(&stem) || stem == "ip" {
                        return vec![(format!("r{}", stem), 0, 32)];
                    }
                }
                if X86_GP.contains(&name) || name == "ip" {
                    return vec![(format!("r{}", name), 0, 16), (format!("e{}", name), 0, 16)];
                }
                if let [c @ (b'a' | b'b' | b'c' | b'd'), half @ (b'l' | b'h')] = name.as_bytes() {
                    let c = *c as char;
                    let shift = if *half == b'h' { 8 } else { 0 };
                    return vec![
                        (format!("r{}x", c), shift, 8),
                        (format!("e{}x", c), shift, 8),
                    ];
                }
                if let Some(stem) = name.strip_suffix('l') {
                    if matches!(stem, "si" | "di" | "bp" | "sp") {
                        return vec![(format!("r{}", stem), 0, 8)];
                    }
                }
                // r8d, r8w, r8b
                if let Some(rest) = name.strip_prefix('r') {
                    let (number, width) = match rest.as_bytes().last() {
                        Some(b'd') => (&rest[..rest.len() - 1], 32),
                        Some(b'w') => (&rest[..rest.len() - 1], 16),
                        Some(b'b') => (&rest[..rest.len() - 1], 8),
                        _ => return Vec::new(),
                    };
                    if number.parse::<u8>().is_ok() {
                        return vec![(format!("r{}", number), 0, width)];
                    }
                }
                Vec::new()
            }
            Architecture::Aarch64 => match name {
                "lr" => vec![("x30".into(), 0, 64)],
                "x30" => vec![("lr".into(), 0, 64)],
                "fp" => vec![("x29".into(), 0, 64)],
                "x29" => vec![("fp".into(), 0, 64)],
                _ => match name.strip_prefix('w') {
                    Some(number) if number.parse::<u8>().is_ok() => {
                        vec![(format!("x{}", number), 0, 32)]
                    }
                    _ => Vec::new(),
                },
            },
            Architecture::Arm | Architecture::ArmCortexM => match name {
                "lr" => vec![("r14".into(), 0, 32)],
                "sp" => vec![("r13".into(), 0, 32)],
                "pc" => vec![("r15".into(), 0, 32)],
                "fp" | "r11" => vec![("r11".into(), 0, 32), ("fp".into(), 0, 32)],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

impl MemoryReader for Snapshot {
    fn read(&self, address: u64, length: usize, partial: bool) -> std::result::Result<Vec<u8>, MemoryError> {
        let mut out = Vec::with_capacity(length);
        let mut cursor = address;
        // Reads may run across adjacent regions
        while out.len() < length {
            let Some(region) = self.region_containing(cursor).filter(|r| r.readable) else {
                break;
            };
            let offset = (cursor - region.start) as usize;
            let take = (length - out.len()).min(region.data.len() - offset);
            out.extend_from_slice(&region.data[offset..offset + take]);
            cursor = cursor.wrapping_add(take as u64);
        }

        if out.len() == length || (partial && !out.is_empty()) {
            Ok(out)
        } else {
            Err(MemoryError::Unmapped { address, length })
        }
    }
}

impl RegisterReader for Snapshot {
    fn register(&self, name: &str) -> Option<u64> {
        let name = name.to_lowercase();
        if let Some(value) = self.registers.get(&name) {
            return Some(*value);
        }
        self.sub_register(&name)
            .into_iter()
            .find_map(|(full, shift, width)| {
                self.registers
                    .get(&full)
                    .map(|value| (value >> shift) & mask(width))
            })
    }

    fn pc(&self) -> Option<u64> {
        self.register(self.arch.pc_register())
    }

    fn sp(&self) -> Option<u64> {
        self.register(self.arch.sp_register())
    }
}

impl SymbolResolver for Snapshot {
    fn resolve(&self, address: u64) -> Option<String> {
        self.symbols.resolve(address)
    }
}

impl MemoryClassifier for Snapshot {
    fn page_containing(&self, address: u64) -> Option<Page> {
        let region = self.region_containing(address)?;
        Some(Page {
            start: region.start,
            end: region.end(),
            readable: region.readable,
            writable: region.writable,
            executable: region.executable,
            objfile: region.objfile.clone(),
        })
    }
}

impl Debuggee for Snapshot {
    fn arch(&self) -> ArchInfo {
        self.arch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x64() -> ArchInfo {
        ArchInfo::new(Architecture::X86_64)
    }

    #[test]
    fn reads_span_adjacent_regions() {
        let snapshot = Snapshot::new(x64())
            .map(0x1000, vec![1u8, 2], "r--", "")
            .map(0x1002, vec![3u8, 4], "rw-", "");
        assert_eq!(snapshot.read(0x1001, 3, false).unwrap(), vec![2, 3, 4]);
        assert!(snapshot.read(0x1003, 2, false).is_err());
        assert_eq!(snapshot.read(0x1003, 2, true).unwrap(), vec![4]);
    }

    #[test]
    fn unreadable_regions_fail() {
        let snapshot = Snapshot::new(x64()).map(0x1000, vec![0u8; 8], "---", "");
        assert!(!snapshot.peek(0x1000));
        assert!(snapshot.page_containing(0x1000).is_some());
    }

    #[test]
    fn sub_registers() {
        let snapshot = Snapshot::new(x64())
            .with_register("rax", 0x1122_3344_5566_7788)
            .with_register("r9", 0xffff_0000_1234);
        assert_eq!(snapshot.register("eax"), Some(0x5566_7788));
        assert_eq!(snapshot.register("ax"), Some(0x7788));
        assert_eq!(snapshot.register("ah"), Some(0x77));
        assert_eq!(snapshot.register("al"), Some(0x88));
        assert_eq!(snapshot.register("r9w"), Some(0x1234));
        assert_eq!(snapshot.register("RAX"), Some(0x1122_3344_5566_7788));

        let arm64 = Snapshot::new(ArchInfo::new(Architecture::Aarch64)).with_register("x30", 0x4000);
        assert_eq!(arm64.register("lr"), Some(0x4000));
        assert_eq!(arm64.register("w30"), Some(0x4000));
    }

    #[test]
    fn loads_json() {
        let snapshot = Snapshot::from_json(
            r#"{
                "arch": {"arch": "x86-64", "ptrsize": 8},
                "registers": {"rip": "0x401000", "rsp": 4096},
                "regions": [{"start": "0x401000", "data": "c3 90", "perms": "r-x", "objfile": "/bin/demo"}],
                "symbols": [{"name": "main", "address": "0x401000", "size": 2}]
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.pc(), Some(0x401000));
        assert_eq!(snapshot.sp(), Some(0x1000));
        assert_eq!(snapshot.read(0x401000, 2, false).unwrap(), vec![0xc3, 0x90]);
        assert_eq!(snapshot.resolve(0x401001).as_deref(), Some("main+1"));
        let page = snapshot.page_containing(0x401001).unwrap();
        assert!(page.executable && !page.writable);
        assert_eq!(page.objfile, "/bin/demo");
    }

    #[test]
    fn rejects_bad_region_data() {
        let text = r#"{"arch": {"arch": "i386", "ptrsize": 4},
                       "regions": [{"start": 0, "data": "zz"}]}"#;
        assert!(Snapshot::from_json(text).is_err());
    }
}
