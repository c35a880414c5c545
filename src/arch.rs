use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "i8086")]
    I8086,
    #[serde(rename = "i386")]
    I386,
    #[serde(rename = "x86-64")]
    X86_64,
    #[serde(rename = "arm")]
    Arm,
    /// Cortex-M (ARMv6-M / ARMv7-M / ARMv8-M)
    #[serde(rename = "armcm")]
    ArmCortexM,
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "mips")]
    Mips,
    #[serde(rename = "sparc")]
    Sparc,
    #[serde(rename = "powerpc")]
    PowerPc,
    #[serde(rename = "rv32")]
    Rv32,
    #[serde(rename = "rv64")]
    Rv64,
}

impl Architecture {
    pub fn default_ptrsize(self) -> usize {
        match self {
            Self::I8086 => 2,
            Self::X86_64 | Self::Aarch64 | Self::Rv64 => 8,
            _ => 4,
        }
    }

    /// Bytes fetched before decoding. Covers the widest encoding of the ISA.
    pub fn max_instruction_size(self) -> usize {
        match self {
            Self::I8086 | Self::I386 | Self::X86_64 => 16,
            Self::Mips => 8,
            Self::Rv32 | Self::Rv64 => 22,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// ISA revisions that need a different decoder mode than the base architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsaVariant {
    #[default]
    Base,
    Mips32R6,
    SparcV9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    pub arch: Architecture,
    pub ptrsize: usize,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub variant: IsaVariant,
}

impl ArchInfo {
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch,
            ptrsize: arch.default_ptrsize(),
            endian: Endian::Little,
            variant: IsaVariant::Base,
        }
    }

    pub fn with_ptrsize(mut self, ptrsize: usize) -> Self {
        self.ptrsize = ptrsize;
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn ptrbits(&self) -> u32 {
        (self.ptrsize * 8) as u32
    }

    pub fn ptrmask(&self) -> u64 {
        crate::bits::mask(self.ptrbits())
    }

    /// Interpret up to eight bytes as an unsigned integer in target byte order.
    pub fn unpack(&self, bytes: &[u8]) -> u64 {
        let bytes = &bytes[..bytes.len().min(8)];
        match self.endian {
            Endian::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
            Endian::Big => bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        }
    }

    pub fn pc_register(&self) -> &'static str {
        match self.arch {
            Architecture::I8086 => "ip",
            Architecture::I386 => "eip",
            Architecture::X86_64 => "rip",
            _ => "pc",
        }
    }

    pub fn sp_register(&self) -> &'static str {
        match self.arch {
            Architecture::I8086 => "sp",
            Architecture::I386 => "esp",
            Architecture::X86_64 => "rsp",
            Architecture::PowerPc => "r1",
            _ => "sp",
        }
    }

    /// Name of the status register holding the condition flags.
    pub fn flags_register(&self) -> Option<&'static str> {
        match self.arch {
            Architecture::I8086 | Architecture::I386 | Architecture::X86_64 => Some("eflags"),
            Architecture::Arm | Architecture::Aarch64 => Some("cpsr"),
            Architecture::ArmCortexM => Some("xpsr"),
            _ => None,
        }
    }

    /// Single-bit flags of a status register, in display order.
    pub fn flag_bits(&self, register: &str) -> &'static [(&'static str, u32)] {
        match (self.arch, register) {
            (Architecture::I8086 | Architecture::I386 | Architecture::X86_64, "eflags") => &[
                ("CF", 0),
                ("PF", 2),
                ("AF", 4),
                ("ZF", 6),
                ("SF", 7),
                ("IF", 9),
                ("DF", 10),
                ("OF", 11),
            ],
            (Architecture::Aarch64, "cpsr") => &[
                ("N", 31),
                ("Z", 30),
                ("C", 29),
                ("V", 28),
                ("Q", 27),
                ("PAN", 22),
                ("IL", 20),
                ("D", 9),
                ("A", 8),
                ("I", 7),
                ("F", 6),
                ("SP", 0),
            ],
            (Architecture::Arm, "cpsr") => &[
                ("N", 31),
                ("Z", 30),
                ("C", 29),
                ("V", 28),
                ("Q", 27),
                ("J", 24),
                ("E", 9),
                ("A", 8),
                ("I", 7),
                ("F", 6),
                ("T", 5),
            ],
            (Architecture::ArmCortexM, "xpsr") => &[
                ("N", 31),
                ("Z", 30),
                ("C", 29),
                ("V", 28),
                ("Q", 27),
                ("T", 24),
            ],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptrmask_follows_pointer_width() {
        assert_eq!(ArchInfo::new(Architecture::X86_64).ptrmask(), u64::MAX);
        assert_eq!(ArchInfo::new(Architecture::I386).ptrmask(), 0xffff_ffff);
        assert_eq!(ArchInfo::new(Architecture::I8086).ptrmask(), 0xffff);
    }

    #[test]
    fn unpack_respects_endianness() {
        let le = ArchInfo::new(Architecture::Mips);
        let be = le.with_endian(Endian::Big);
        assert_eq!(le.unpack(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(be.unpack(&[0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
    }

    #[test]
    fn fetch_size_covers_variable_length_encodings() {
        assert_eq!(Architecture::X86_64.max_instruction_size(), 16);
        assert_eq!(Architecture::Rv64.max_instruction_size(), 22);
        assert_eq!(Architecture::Aarch64.max_instruction_size(), 4);
    }

    #[test]
    fn arch_names_match_debugger_names() {
        let info: ArchInfo = serde_json::from_str(r#"{"arch":"x86-64","ptrsize":8}"#).unwrap();
        assert_eq!(info.arch, Architecture::X86_64);
        assert_eq!(info.endian, Endian::Little);
    }
}
