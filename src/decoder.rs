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

use std::collections::HashMap;

use capstone::arch::arm::{ArmOperandType, ArmShift};
use capstone::arch::arm64::{Arm64Extender, Arm64OperandType, Arm64Shift};
use capstone::arch::mips::MipsOperand;
use capstone::arch::ppc::PpcOperand;
use capstone::arch::riscv::RiscVOperand;
use capstone::arch::sparc::SparcOperand;
use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchOperand;
use capstone::prelude::*;
use capstone::RegId;
use serde::Serialize;

use crate::arch::{ArchInfo, Architecture, Endian, IsaVariant};
use crate::error::DecodeError;
use crate::instruction::{
    Extend, Instruction, InstructionGroup, MemoryOperand, Operand, OperandKind, Shift, ShiftKind,
};
use crate::process::RegisterReader;

/// Architecture specific decoder mode, picked from the live CPU state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DecoderMode {
    #[default]
    Default,
    Arm,
    Thumb,
    MClass,
    MClassThumb,
    Real16,
    Mips32R6,
    SparcV9,
    RiscvCompressed,
}

impl DecoderMode {
    pub fn select<R: RegisterReader + ?Sized>(arch: &ArchInfo, regs: &R) -> Self {
        match arch.arch {
            Architecture::ArmCortexM => {
                // xPSR.T
                if regs.register("xpsr").is_some_and(|v| v & (1 << 24) != 0) {
                    DecoderMode::MClassThumb
                } else {
                    DecoderMode::MClass
                }
            }
            Architecture::Arm => {
                // CPSR.T
                if regs.register("cpsr").is_some_and(|v| v & (1 << 5) != 0) {
                    DecoderMode::Thumb
                } else {
                    DecoderMode::Arm
                }
            }
            Architecture::I8086 => DecoderMode::Real16,
            Architecture::Mips if arch.variant == IsaVariant::Mips32R6 => DecoderMode::Mips32R6,
            Architecture::Sparc if arch.variant == IsaVariant::SparcV9 => DecoderMode::SparcV9,
            Architecture::Rv32 | Architecture::Rv64 => DecoderMode::RiscvCompressed,
            _ => DecoderMode::Default,
        }
    }

    pub fn is_thumb(self) -> bool {
        matches!(self, DecoderMode::Thumb | DecoderMode::MClassThumb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderKey {
    pub arch: Architecture,
    pub ptrsize: usize,
    pub endian: Endian,
    pub mode: DecoderMode,
}

impl DecoderKey {
    pub fn new(arch: &ArchInfo, mode: DecoderMode) -> Self {
        Self {
            arch: arch.arch,
            ptrsize: arch.ptrsize,
            endian: arch.endian,
            mode,
        }
    }
}

pub struct Decoder {
    key: DecoderKey,
    cs: Capstone,
}

impl Decoder {
    pub fn new(key: DecoderKey) -> Result<Self, DecodeError> {
        let endian = match key.endian {
            Endian::Little => capstone::Endian::Little,
            Endian::Big => capstone::Endian::Big,
        };
        let thumb = key.mode.is_thumb();
        let mclass = matches!(key.mode, DecoderMode::MClass | DecoderMode::MClassThumb);

        let cs = match key.arch {
            Architecture::I8086 | Architecture::I386 | Architecture::X86_64 => {
                let mode = match key.arch {
                    Architecture::I8086 => arch::x86::ArchMode::Mode16,
                    Architecture::I386 => arch::x86::ArchMode::Mode32,
                    _ => arch::x86::ArchMode::Mode64,
                };
                Capstone::new()
                    .x86()
                    .mode(mode)
                    .syntax(arch::x86::ArchSyntax::Intel)
                    .detail(true)
                    .build()
            }
            Architecture::Arm | Architecture::ArmCortexM => {
                let mode = if thumb || mclass {
                    arch::arm::ArchMode::Thumb
                } else {
                    arch::arm::ArchMode::Arm
                };
                let extra: &[arch::arm::ArchExtraMode] = if mclass {
                    &[arch::arm::ArchExtraMode::MClass]
                } else {
                    &[]
                };
                Capstone::new()
                    .arm()
                    .mode(mode)
                    .extra_mode(extra.iter().copied())
                    .endian(endian)
                    .detail(true)
                    .build()
            }
            Architecture::Aarch64 => Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .endian(endian)
                .detail(true)
                .build(),
            Architecture::Mips => {
                let mode = if key.mode == DecoderMode::Mips32R6 {
                    arch::mips::ArchMode::Mips32R6
                } else if key.ptrsize == 8 {
                    arch::mips::ArchMode::Mips64
                } else {
                    arch::mips::ArchMode::Mips32
                };
                Capstone::new()
                    .mips()
                    .mode(mode)
                    .endian(endian)
                    .detail(true)
                    .build()
            }
            Architecture::Sparc => {
                let mode = if key.mode == DecoderMode::SparcV9 {
                    arch::sparc::ArchMode::V9
                } else {
                    arch::sparc::ArchMode::Default
                };
                Capstone::new()
                    .sparc()
                    .mode(mode)
                    .detail(true)
                    .build()
            }
            Architecture::PowerPc => {
                let mode = if key.ptrsize == 8 {
                    arch::ppc::ArchMode::Mode64
                } else {
                    arch::ppc::ArchMode::Mode32
                };
                Capstone::new()
                    .ppc()
                    .mode(mode)
                    .endian(endian)
                    .detail(true)
                    .build()
            }
            Architecture::Rv32 | Architecture::Rv64 => {
                let mode = if key.arch == Architecture::Rv64 {
                    arch::riscv::ArchMode::RiscV64
                } else {
                    arch::riscv::ArchMode::RiscV32
                };
                Capstone::new()
                    .riscv()
                    .mode(mode)
                    .extra_mode([arch::riscv::ArchExtraMode::RiscVC].iter().copied())
                    .detail(true)
                    .build()
            }
        }?;

        Ok(Self { key, cs })
    }

    /// Decode exactly one instruction from the start of `code`.
    pub fn decode_one(&self, code: &[u8], address: u64) -> Result<Instruction, DecodeError> {
        let insns = self.cs.disasm_count(code, address, 1)?;
        let insn = insns.iter().next().ok_or(DecodeError::Invalid { address })?;

        let mut out = Instruction::new(
            self.key.arch,
            insn.address(),
            insn.len() as u64,
            insn.mnemonic().unwrap_or(""),
            insn.op_str().unwrap_or(""),
        );
        out.mode = self.key.mode;
        out.bytes = insn.bytes().to_vec();

        if let Ok(detail) = self.cs.insn_detail(&insn) {
            out.groups = detail
                .groups()
                .iter()
                .filter_map(|g| InstructionGroup::from_capstone(g.0))
                .collect();
            out.operands = detail
                .arch_detail()
                .operands()
                .into_iter()
                .filter_map(|op| self.translate(op))
                .collect();
        }

        Ok(out)
    }

    fn reg(&self, id: RegId) -> Option<String> {
        if id.0 == 0 {
            return None;
        }
        self.cs.reg_name(id)
    }

    fn translate(&self, op: ArchOperand) -> Option<Operand> {
        match op {
            ArchOperand::X86Operand(op) => {
                let kind = match op.op_type {
                    X86OperandType::Reg(r) => OperandKind::Register(self.reg(r)?),
                    X86OperandType::Imm(v) => OperandKind::Immediate(v),
                    X86OperandType::Mem(m) => OperandKind::Memory(MemoryOperand {
                        segment: self.reg(m.segment()),
                        base: self.reg(m.base()),
                        index: self.reg(m.index()),
                        scale: i64::from(m.scale()),
                        disp: m.disp(),
                    }),
                    _ => return None,
                };
                Some(Operand::new(kind).with_size(op.size as usize))
            }
            ArchOperand::Arm64Operand(op) => {
                let kind = match op.op_type {
                    Arm64OperandType::Reg(r) => OperandKind::Register(self.reg(r)?),
                    Arm64OperandType::Imm(v) => OperandKind::Immediate(v),
                    Arm64OperandType::Mem(m) => OperandKind::Memory(MemoryOperand {
                        segment: None,
                        base: self.reg(m.base()),
                        index: self.reg(m.index()),
                        scale: 1,
                        disp: i64::from(m.disp()),
                    }),
                    _ => return None,
                };
                let mut operand = Operand::new(kind);
                operand.shift = match op.shift {
                    Arm64Shift::Lsl(n) => Some(Shift { kind: ShiftKind::Lsl, amount: n }),
                    Arm64Shift::Lsr(n) => Some(Shift { kind: ShiftKind::Lsr, amount: n }),
                    Arm64Shift::Asr(n) => Some(Shift { kind: ShiftKind::Asr, amount: n }),
                    Arm64Shift::Ror(n) => Some(Shift { kind: ShiftKind::Ror, amount: n }),
                    _ => None,
                };
                operand.extend = match op.ext {
                    Arm64Extender::ARM64_EXT_UXTB => Some(Extend::Uxtb),
                    Arm64Extender::ARM64_EXT_UXTH => Some(Extend::Uxth),
                    Arm64Extender::ARM64_EXT_UXTW => Some(Extend::Uxtw),
                    Arm64Extender::ARM64_EXT_UXTX => Some(Extend::Uxtx),
                    Arm64Extender::ARM64_EXT_SXTB => Some(Extend::Sxtb),
                    Arm64Extender::ARM64_EXT_SXTH => Some(Extend::Sxth),
                    Arm64Extender::ARM64_EXT_SXTW => Some(Extend::Sxtw),
                    Arm64Extender::ARM64_EXT_SXTX => Some(Extend::Sxtx),
                    _ => None,
                };
                Some(operand)
            }
            ArchOperand::ArmOperand(op) => {
                let kind = match op.op_type {
                    ArmOperandType::Reg(r) => OperandKind::Register(self.reg(r)?),
                    ArmOperandType::Imm(v) => OperandKind::Immediate(i64::from(v)),
                    ArmOperandType::Mem(m) => OperandKind::Memory(MemoryOperand {
                        segment: None,
                        base: self.reg(m.base()),
                        index: self.reg(m.index()),
                        scale: i64::from(m.scale()),
                        disp: i64::from(m.disp()),
                    }),
                    _ => return None,
                };
                let mut operand = Operand::new(kind);
                operand.subtracted = op.subtracted;
                operand.shift = match op.shift {
                    ArmShift::Lsl(n) => Some(Shift { kind: ShiftKind::Lsl, amount: n }),
                    ArmShift::Lsr(n) => Some(Shift { kind: ShiftKind::Lsr, amount: n }),
                    ArmShift::Asr(n) => Some(Shift { kind: ShiftKind::Asr, amount: n }),
                    ArmShift::Ror(n) => Some(Shift { kind: ShiftKind::Ror, amount: n }),
                    _ => None,
                };
                Some(operand)
            }
            ArchOperand::MipsOperand(op) => {
                let kind = match op {
                    MipsOperand::Reg(r) => OperandKind::Register(self.reg(r)?),
                    MipsOperand::Imm(v) => OperandKind::Immediate(i64::from(v)),
                    MipsOperand::Mem(m) => OperandKind::Memory(MemoryOperand {
                        base: self.reg(m.base()),
                        disp: i64::from(m.disp()),
                        ..MemoryOperand::default()
                    }),
                    _ => return None,
                };
                Some(Operand::new(kind))
            }
            ArchOperand::RiscVOperand(op) => {
                let kind = match op {
                    RiscVOperand::Reg(r) => OperandKind::Register(self.reg(r)?),
                    RiscVOperand::Imm(v) => OperandKind::Immediate(i64::from(v)),
                    RiscVOperand::Mem(m) => OperandKind::Memory(MemoryOperand {
                        base: self.reg(m.base()),
                        disp: i64::from(m.disp()),
                        ..MemoryOperand::default()
                    }),
                    _ => return None,
                };
                Some(Operand::new(kind))
            }
            ArchOperand::SparcOperand(op) => {
                let kind = match op {
                    SparcOperand::Reg(r) => OperandKind::Register(self.reg(r)?),
                    SparcOperand::Imm(v) => OperandKind::Immediate(i64::from(v)),
                    SparcOperand::Mem(m) => OperandKind::Memory(MemoryOperand {
                        base: self.reg(m.base()),
                        disp: i64::from(m.disp()),
                        ..MemoryOperand::default()
                    }),
                    _ => return None,
                };
                Some(Operand::new(kind))
            }
            ArchOperand::PpcOperand(op) => {
                let kind = match op {
                    PpcOperand::Reg(r) => OperandKind::Register(self.reg(r)?),
                    PpcOperand::Imm(v) => OperandKind::Immediate(i64::from(v)),
                    PpcOperand::Mem(m) => OperandKind::Memory(MemoryOperand {
                        base: self.reg(m.base()),
                        disp: i64::from(m.disp()),
                        ..MemoryOperand::default()
                    }),
                    _ => return None,
                };
                Some(Operand::new(kind))
            }
            _ => None,
        }
    }
}

/// Decoders live as long as the loaded image; `clear` on a new binary.
#[derive(Default)]
pub struct DecoderCache {
    decoders: HashMap<DecoderKey, Decoder>,
}

impl DecoderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: DecoderKey) -> Result<&Decoder, DecodeError> {
        if !self.decoders.contains_key(&key) {
            let decoder = Decoder::new(key)?;
            self.decoders.insert(key, decoder);
        }
        self.decoders
            .get(&key)
            .ok_or(DecodeError::Unsupported(key.arch))
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn clear(&mut self) {
        self.decoders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(arch: Architecture) -> Decoder {
        let info = ArchInfo::new(arch);
        let mode = match arch {
            Architecture::Rv64 => DecoderMode::RiscvCompressed,
            _ => DecoderMode::Default,
        };
        Decoder::new(DecoderKey::new(&info, mode)).unwrap()
    }

    #[test]
    fn decodes_rip_relative_load() {
        // mov rax, qword ptr [rip + 0x10]
        let insn = decoder(Architecture::X86_64)
            .decode_one(&[0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00, 0x90], 0x1000)
            .unwrap();
        assert_eq!(insn.mnemonic, "mov");
        assert_eq!(insn.size, 7);
        assert_eq!(insn.operands.len(), 2);
        assert_eq!(insn.operands[0].register(), Some("rax"));
        let mem = insn.operands[1].memory().unwrap();
        assert_eq!(mem.base.as_deref(), Some("rip"));
        assert_eq!(mem.disp, 0x10);
        assert_eq!(insn.operands[1].size, 8);
    }

    #[test]
    fn sparc_v9_mode() {
        let info = ArchInfo::new(Architecture::Sparc);
        let v9 = Decoder::new(DecoderKey::new(&info, DecoderMode::SparcV9)).unwrap();
        let insn = v9.decode_one(&[0x01, 0x00, 0x00, 0x00], 0x1000).unwrap();
        assert_eq!(insn.mnemonic, "nop");
        assert_eq!(insn.mode, DecoderMode::SparcV9);
    }

    #[test]
    fn reports_groups() {
        // ret
        let insn = decoder(Architecture::X86_64).decode_one(&[0xc3], 0x1000).unwrap();
        assert!(insn.has_group(InstructionGroup::Ret));
    }

    #[test]
    fn invalid_bytes_fail() {
        // 0xffffffff is not an AArch64 encoding
        let result = decoder(Architecture::Aarch64).decode_one(&[0xff, 0xff, 0xff, 0xff], 0x1000);
        assert!(result.is_err());
    }

    #[test]
    fn aarch64_shifted_register() {
        // add x0, x1, x2, lsl #3
        let insn = decoder(Architecture::Aarch64)
            .decode_one(&[0x20, 0x0c, 0x02, 0x8b], 0x1000)
            .unwrap();
        assert_eq!(insn.mnemonic, "add");
        let shift = insn.operands[2].shift.unwrap();
        assert_eq!(shift.kind, ShiftKind::Lsl);
        assert_eq!(shift.amount, 3);
    }

    #[test]
    fn compressed_riscv() {
        // c.nop
        let insn = decoder(Architecture::Rv64).decode_one(&[0x01, 0x00], 0x1000).unwrap();
        assert_eq!(insn.size, 2);
    }

    #[test]
    fn cache_reuses_decoders() {
        let mut cache = DecoderCache::new();
        let key = DecoderKey::new(&ArchInfo::new(Architecture::X86_64), DecoderMode::Default);
        cache.get(key).unwrap();
        cache.get(key).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
