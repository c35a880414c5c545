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

//! Instruction windows around the program counter, and the caches that
//! live as long as the attached debuggee.

use std::collections::HashMap;

use memmap2::MmapOptions;

use crate::assistant::{self, AssistantTable};
use crate::config::{Config, EmulateMode};
use crate::decoder::{DecoderCache, DecoderKey, DecoderMode};
use crate::emulator::{Emulation, EmulatorFactory};
use crate::error::ResourceError;
use crate::instruction::Instruction;
use crate::process::Debuggee;
use crate::trace_enhancement;

/// Size of the anonymous executable mapping tried before the first emulation.
pub const EMULATOR_SCRATCH_SIZE: usize = 1 << 30;

pub type ResourceProbe = fn() -> Result<(), ResourceError>;

/// The emulator needs a large executable scratch region. Check the
/// environment can provide one before building the first emulator.
pub fn probe_scratch_region() -> Result<(), ResourceError> {
    let region = MmapOptions::new().len(EMULATOR_SCRATCH_SIZE).map_anon()?;
    let region = region.make_exec()?;
    drop(region);
    Ok(())
}

pub struct Session {
    config: Config,
    assistants: AssistantTable,
    decoders: DecoderCache,
    /// next -> address of the instruction that led there
    backward: HashMap<u64, u64>,
    computed: HashMap<u64, Instruction>,
    emulator_factory: Option<Box<dyn EmulatorFactory>>,
    resource_probe: ResourceProbe,
    first_emulate: bool,
    warnings: Vec<String>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            assistants: AssistantTable::new(),
            decoders: DecoderCache::new(),
            backward: HashMap::new(),
            computed: HashMap::new(),
            emulator_factory: None,
            resource_probe: probe_scratch_region,
            first_emulate: true,
            warnings: Vec::new(),
        }
    }

    pub fn with_emulator_factory(mut self, factory: Box<dyn EmulatorFactory>) -> Self {
        self.emulator_factory = Some(factory);
        self
    }

    pub fn with_resource_probe(mut self, probe: ResourceProbe) -> Self {
        self.resource_probe = probe;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Messages meant for the user, such as emulation being switched off.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn cached(&self, address: u64) -> Option<&Instruction> {
        self.computed.get(&address)
    }

    /// Forget everything learned about the previous debuggee or binary.
    /// The scratch region probe is not repeated.
    pub fn reset(&mut self) {
        self.backward.clear();
        self.computed.clear();
        self.decoders.clear();
        self.warnings.clear();
    }

    /// Enhance the instruction at `address` without emulation.
    pub fn enhance_one(&mut self, process: &dyn Debuggee, address: u64) -> Option<Instruction> {
        self.one(process, address, &mut Emulation::Off, false, false)
    }

    /// [`Session::near`] at the program counter.
    pub fn enhance_window(
        &mut self,
        process: &dyn Debuggee,
        count: usize,
        emulate: bool,
        include_history: bool,
    ) -> Vec<Instruction> {
        match process.pc() {
            Some(pc) => self.near(process, pc, count, emulate, include_history),
            None => Vec::new(),
        }
    }

    /// Up to `count` instructions that led to `address` (from history), the
    /// instruction at `address`, then the instructions that follow it. The
    /// emulator is only used when `address` is the program counter.
    pub fn near(
        &mut self,
        process: &dyn Debuggee,
        address: u64,
        count: usize,
        emulate: bool,
        show_history: bool,
    ) -> Vec<Instruction> {
        let arch = process.arch().arch;
        let pc = process.pc();

        let mut emulate = emulate && self.config.emulate != EmulateMode::Off;
        if !self
            .emulator_factory
            .as_ref()
            .is_some_and(|factory| factory.supports(arch))
        {
            emulate = false;
        }

        let mut emulation = Emulation::Off;
        if pc == Some(address) && emulate && self.can_emulate() {
            if let Some(factory) = &self.emulator_factory {
                match factory.create(process) {
                    Ok(emu) => emulation = Emulation::Active(emu),
                    Err(err) => log::warn!("cannot start emulator at {:#x}: {}", address, err),
                }
            }
        }

        let Some(current) = self.one(process, address, &mut emulation, false, true) else {
            return Vec::new();
        };

        let mut insns = Vec::with_capacity(1 + 2 * count);

        if show_history {
            trace_enhancement!("history walk from {:#x}", current.address);
            let mut cached = self.backward.get(&current.address).copied();
            while insns.len() < count {
                let Some(insn) = cached.and_then(|prev| self.one(process, prev, &mut Emulation::Off, true, false))
                else {
                    break;
                };
                cached = self.backward.get(&insn.address).copied();
                insns.push(insn);
            }
            insns.reverse();
        }

        insns.push(current);

        let total = 1 + 2 * count;
        while insns.len() < total {
            let Some(last) = insns.last() else { break };
            if emulation.is_active() && last.blocks_emulation() {
                trace_enhancement!("not emulating past {:#x}", last.address);
                emulation.discard();
            }
            let target = emulation.active().map(|emu| emu.pc()).unwrap_or(last.next);
            let Some(insn) = self.one(process, target, &mut emulation, false, true) else {
                break;
            };
            insns.push(insn);
        }

        // Loops and ret sleds: keep the current and next copy only
        while insns.len() > 2 {
            let n = insns.len();
            if insns[n - 3].address == insns[n - 2].address && insns[n - 2].address == insns[n - 1].address {
                insns.pop();
            } else {
                break;
            }
        }

        insns
    }

    fn one(
        &mut self,
        process: &dyn Debuggee,
        address: u64,
        emulation: &mut Emulation,
        from_cache: bool,
        put_cache: bool,
    ) -> Option<Instruction> {
        if !process.peek(address) {
            return None;
        }

        let cached = if from_cache {
            self.computed.get(&address).cloned()
        } else {
            None
        };
        let insn = match cached {
            Some(cached) => cached,
            None => {
                let mut insn = self.decode(process, address)?;
                let assistant = self.assistants.get(insn.arch);
                assistant::enhance(assistant, &mut insn, process, &self.config, emulation);
                if put_cache {
                    self.computed.insert(address, insn.clone());
                }
                insn
            }
        };

        self.backward.insert(insn.next, insn.address);
        Some(insn)
    }

    fn decode(&mut self, process: &dyn Debuggee, address: u64) -> Option<Instruction> {
        let arch = process.arch();
        let mode = DecoderMode::select(&arch, process);
        let decoder = match self.decoders.get(DecoderKey::new(&arch, mode)) {
            Ok(decoder) => decoder,
            Err(err) => {
                log::warn!("no decoder for {:?}: {}", arch.arch, err);
                return None;
            }
        };

        let code = process
            .read(address, arch.arch.max_instruction_size(), true)
            .ok()?;
        match decoder.decode_one(&code, address) {
            Ok(insn) => Some(insn),
            Err(err) => {
                log::debug!("{}", err);
                None
            }
        }
    }

    /// Runs the scratch region probe the first time only. A failed probe
    /// switches emulation off for the rest of the session.
    fn can_emulate(&mut self) -> bool {
        if !self.first_emulate {
            return true;
        }
        self.first_emulate = false;

        match (self.resource_probe)() {
            Ok(()) => true,
            Err(err) => {
                let message = format!(
                    "Disabling emulation used to compute branches: {}. \
                     Free some memory or set emulation off explicitly",
                    err
                );
                log::warn!("{}", message);
                self.warnings.push(message);
                self.config.emulate = EmulateMode::Off;
                false
            }
        }
    }
}
