//! Enhancement options. Loadable from JSON and flattenable into a CLI.

use std::path::Path;

use clap::{ArgAction, Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EmulateMode {
    /// Emulate for operand values and branch prediction
    #[default]
    On,
    /// Only step the emulator to predict where branches go
    JumpsOnly,
    Off,
}

#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emulation of code from the program counter
    #[arg(long = "emulate", value_enum, default_value_t = EmulateMode::On)]
    pub emulate: EmulateMode,

    /// Don't annotate instructions with operand values and results
    #[arg(long = "no-disasm-annotations", action = ArgAction::SetFalse)]
    pub disasm_annotations: bool,

    /// Don't use the emulator for register and memory values
    #[arg(long = "no-emulate-annotations", action = ArgAction::SetFalse)]
    pub emulate_annotations: bool,

    /// Only use emulated values for the instruction at the program counter
    #[arg(long = "no-emulate-future-annotations", action = ArgAction::SetFalse)]
    pub emulate_future_annotations: bool,

    /// Depth of pointer chains shown in annotations
    #[arg(long = "telescope-depth", default_value_t = 3)]
    pub telescope_depth: usize,

    /// Characters of a string shown at the end of a pointer chain
    #[arg(long = "telescope-string-length", default_value_t = 50)]
    pub telescope_string_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            emulate: EmulateMode::On,
            disasm_annotations: true,
            emulate_annotations: true,
            emulate_future_annotations: true,
            telescope_depth: 3,
            telescope_string_length: 50,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::Config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Whether operand values may come from the emulator at all.
    pub fn values_from_emulator(&self) -> bool {
        self.emulate == EmulateMode::On && self.emulate_annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json(r#"{"emulate":"jumps-only","telescope_depth":1}"#).unwrap();
        assert_eq!(config.emulate, EmulateMode::JumpsOnly);
        assert_eq!(config.telescope_depth, 1);
        assert!(config.disasm_annotations);
        assert_eq!(config.telescope_string_length, 50);
        assert!(!config.values_from_emulator());
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Config::from_json(r#"{"emulate":"sometimes"}"#).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"disasm_annotations": false}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(!config.disasm_annotations);
        assert_eq!(config.emulate, EmulateMode::On);
    }
}
