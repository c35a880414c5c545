use serde::Serialize;

use crate::arch::Architecture;
use crate::decoder::DecoderMode;

/// Semantic categories reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionGroup {
    Invalid,
    Jump,
    Call,
    Ret,
    Int,
    Iret,
    Privilege,
    BranchRelative,
}

impl InstructionGroup {
    pub fn from_capstone(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Invalid),
            1 => Some(Self::Jump),
            2 => Some(Self::Call),
            3 => Some(Self::Ret),
            4 => Some(Self::Int),
            5 => Some(Self::Iret),
            6 => Some(Self::Privilege),
            7 => Some(Self::BranchRelative),
            _ => None,
        }
    }

    /// Instructions in these groups are never stepped by the emulator.
    pub fn blocks_emulation(self) -> bool {
        matches!(self, Self::Int | Self::Invalid | Self::Iret | Self::Call)
    }
}

/// Whether a conditionally executed instruction is known to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Condition {
    #[default]
    Undetermined,
    True,
    False,
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        if value {
            Condition::True
        } else {
            Condition::False
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shift {
    pub kind: ShiftKind,
    pub amount: u32,
}

impl Shift {
    pub fn apply(&self, value: u64, width: u32) -> u64 {
        use crate::bits;
        match self.kind {
            ShiftKind::Lsl => bits::lsl(value, self.amount, width),
            ShiftKind::Lsr => bits::lsr(value, self.amount, width),
            ShiftKind::Asr => bits::asr(value, self.amount, width),
            ShiftKind::Ror => bits::ror(value, self.amount, width),
        }
    }
}

/// AArch64 extend operators: take a byte, halfword, word or doubleword and
/// zero- or sign-extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Extend {
    Uxtb,
    Uxth,
    Uxtw,
    Uxtx,
    Sxtb,
    Sxth,
    Sxtw,
    Sxtx,
}

impl Extend {
    pub fn apply(&self, value: u64) -> u64 {
        use crate::bits::{mask, to_signed};
        match self {
            Extend::Uxtb => value & mask(8),
            Extend::Uxth => value & mask(16),
            Extend::Uxtw => value & mask(32),
            Extend::Uxtx => value,
            Extend::Sxtb => to_signed(value, 8) as u64,
            Extend::Sxth => to_signed(value, 16) as u64,
            Extend::Sxtw => to_signed(value, 32) as u64,
            Extend::Sxtx => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MemoryOperand {
    pub segment: Option<String>,
    pub base: Option<String>,
    pub index: Option<String>,
    pub scale: i64,
    pub disp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OperandKind {
    Immediate(i64),
    Register(String),
    Memory(MemoryOperand),
}

#[derive(Debug, Clone, Serialize)]
pub struct Operand {
    pub kind: OperandKind,
    /// Access width in bytes, 0 when the decoder does not report it.
    pub size: usize,
    pub shift: Option<Shift>,
    pub extend: Option<Extend>,
    /// ARM `[r0, -r1]` style index.
    pub subtracted: bool,

    pub before_value: Option<u64>,
    pub after_value: Option<u64>,
    /// Value the instruction actually consumes: memory operands are
    /// dereferenced at their access width, everything else is unchanged.
    pub before_resolved: Option<u64>,
    pub after_resolved: Option<u64>,
    pub symbol: Option<String>,
    pub display: Option<String>,
}

impl Operand {
    pub fn new(kind: OperandKind) -> Self {
        Self {
            kind,
            size: 0,
            shift: None,
            extend: None,
            subtracted: false,
            before_value: None,
            after_value: None,
            before_resolved: None,
            after_resolved: None,
            symbol: None,
            display: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn register(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Register(name) => Some(name),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryOperand> {
        match &self.kind {
            OperandKind::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, OperandKind::Immediate(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind, OperandKind::Register(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, OperandKind::Memory(_))
    }

    /// Rendered operand, `?` when the operand could not be rendered.
    pub fn label(&self) -> &str {
        self.display.as_deref().unwrap_or("?")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    pub arch: Architecture,
    pub mode: DecoderMode,
    pub address: u64,
    pub size: u64,
    pub mnemonic: String,
    pub op_str: String,
    pub bytes: Vec<u8>,
    pub groups: Vec<InstructionGroup>,
    pub operands: Vec<Operand>,

    // Filled in by enhancement
    pub condition: Condition,
    /// Address the PC holds after stepping over this instruction.
    pub next: u64,
    /// Where the PC may go if this instruction transfers control, else `next`.
    pub target: u64,
    pub target_string: Option<String>,
    pub target_is_constant: bool,
    pub annotation: Option<String>,
    pub emulated: bool,
}

impl Instruction {
    pub fn new(arch: Architecture, address: u64, size: u64, mnemonic: &str, op_str: &str) -> Self {
        Self {
            arch,
            mode: DecoderMode::Default,
            address,
            size,
            mnemonic: mnemonic.to_string(),
            op_str: op_str.to_string(),
            bytes: Vec::new(),
            groups: Vec::new(),
            operands: Vec::new(),
            condition: Condition::Undetermined,
            next: address.wrapping_add(size),
            target: address.wrapping_add(size),
            target_string: None,
            target_is_constant: false,
            annotation: None,
            emulated: false,
        }
    }

    pub fn fall_through(&self) -> u64 {
        self.address.wrapping_add(self.size)
    }

    pub fn has_group(&self, group: InstructionGroup) -> bool {
        self.groups.contains(&group)
    }

    pub fn is_call_like(&self) -> bool {
        self.has_group(InstructionGroup::Call)
            || match self.arch {
                Architecture::Aarch64 => matches!(self.mnemonic.as_str(), "bl" | "blr"),
                Architecture::Arm | Architecture::ArmCortexM => {
                    matches!(self.mnemonic.as_str(), "bl" | "blx")
                }
                _ => false,
            }
    }

    /// Call, return, or an ISA jump that always transfers control.
    pub fn is_unconditional_jump(&self) -> bool {
        self.has_group(InstructionGroup::Call)
            || self.has_group(InstructionGroup::Ret)
            || unconditional_mnemonics(self.arch)
                .iter()
                .any(|m| *m == self.base_mnemonic())
    }

    pub fn is_jump_like(&self) -> bool {
        self.has_group(InstructionGroup::Jump)
            || self.has_group(InstructionGroup::Ret)
            || self.is_call_like()
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.is_jump_like() && !self.is_unconditional_jump()
    }

    pub fn is_conditional_jump_taken(&self) -> bool {
        self.is_conditional_jump()
            && (self.next != self.fall_through() || self.condition == Condition::True)
    }

    pub fn can_change_instruction_pointer(&self) -> bool {
        self.target != self.fall_through()
    }

    pub fn has_jump_target(&self) -> bool {
        self.is_jump_like() && self.can_change_instruction_pointer()
    }

    pub fn blocks_emulation(&self) -> bool {
        self.is_call_like() || self.groups.iter().any(|g| g.blocks_emulation())
    }

    /// Mnemonic without Thumb width qualifiers.
    pub fn base_mnemonic(&self) -> &str {
        self.mnemonic
            .strip_suffix(".w")
            .or_else(|| self.mnemonic.strip_suffix(".n"))
            .unwrap_or(&self.mnemonic)
    }
}

fn unconditional_mnemonics(arch: Architecture) -> &'static [&'static str] {
    match arch {
        Architecture::I8086 | Architecture::I386 | Architecture::X86_64 => &["jmp", "ljmp"],
        Architecture::Mips => &["j", "jr", "jal", "jalr", "b", "bal"],
        Architecture::Sparc => &["jmp", "jmpl"],
        Architecture::Arm | Architecture::ArmCortexM => {
            &["b", "bl", "blx", "bx", "bxj", "tbb", "tbh"]
        }
        Architecture::Aarch64 => &["b", "bl", "blr", "br", "ret"],
        Architecture::Rv32 | Architecture::Rv64 => {
            &["jal", "jalr", "j", "jr", "c.j", "c.jal", "c.jr", "c.jalr"]
        }
        Architecture::PowerPc => &["b", "ba", "bl", "bla"],
    }
}
