// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use object::{Object, ObjectSymbol, SymbolKind};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::SymbolResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Function,
    Data,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub kind: SymbolType,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    // start address -> symbol, for range lookups
    symbols_by_addr: BTreeMap<u64, Arc<Symbol>>,
    symbols_by_name: HashMap<String, Arc<Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol) {
        // Aliases at the same address: the last one wins
        let symbol = Arc::new(symbol);
        self.symbols_by_addr.insert(symbol.address, symbol.clone());
        self.symbols_by_name.insert(symbol.name.clone(), symbol);
    }

    /// Find the symbol that contains the given address
    pub fn lookup(&self, address: u64) -> Option<&Symbol> {
        let (&start, symbol) = self.symbols_by_addr.range(..=address).next_back()?;
        // Size 0 symbols are markers and only match their own address
        if (symbol.size > 0 && address < start.saturating_add(symbol.size))
            || (symbol.size == 0 && address == start)
        {
            return Some(symbol.as_ref());
        }
        None
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name.get(name).map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.symbols_by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_addr.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols_by_addr.clear();
        self.symbols_by_name.clear();
    }

    /// Import the function and data symbols of an ELF (or any format `object`
    /// reads) without copying the file into memory.
    pub fn load_elf(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the file is only read, and only for the duration of this call
        let mmap = unsafe { Mmap::map(&file)? };
        let obj = object::File::parse(&*mmap)?;

        let mut table = Self::new();
        for sym in obj.symbols() {
            let kind = match sym.kind() {
                SymbolKind::Text => SymbolType::Function,
                SymbolKind::Data => SymbolType::Data,
                _ => continue,
            };
            let Ok(name) = sym.name() else { continue };
            if name.is_empty() || sym.address() == 0 {
                continue;
            }
            table.insert(Symbol {
                name: demangle_or_original(name),
                address: sym.address(),
                size: sym.size(),
                kind,
            });
        }
        log::debug!("loaded {} symbols from {}", table.len(), path.display());
        Ok(table)
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, address: u64) -> Option<String> {
        let symbol = self.lookup(address)?;
        let offset = address - symbol.address;
        if offset == 0 {
            Some(symbol.name.clone())
        } else {
            Some(format!("{}+{}", symbol.name, offset))
        }
    }
}

pub fn demangle_or_original(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    if name.starts_with("_Z") {
        if let Some(demangled) = cpp_demangle::Symbol::new(name.as_bytes())
            .ok()
            .and_then(|symbol| symbol.demangle().ok())
        {
            return demangled;
        }
    }
    name.to_string()
}
