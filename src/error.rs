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

use thiserror::Error;

use crate::arch::Architecture;

/// The bytes at an address could not be turned into an instruction.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("capstone: {0}")]
    Engine(String),
    #[error("no valid instruction at {address:#x}")]
    Invalid { address: u64 },
    #[error("no decoder for {0:?}")]
    Unsupported(Architecture),
}

impl From<capstone::Error> for DecodeError {
    fn from(err: capstone::Error) -> Self {
        DecodeError::Engine(err.to_string())
    }
}

/// A debuggee read failed. Always recovered locally by the enhancement code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("cannot access {length} bytes at {address:#x}")]
    Unmapped { address: u64, length: usize },
}

#[derive(Error, Debug)]
pub enum EmulationError {
    #[error("emulator failed to step at {address:#x}")]
    StepFailed { address: u64 },
    #[error("emulator diverged: expected pc {expected:#x}, found {actual:#x}")]
    Diverged { expected: u64, actual: u64 },
    #[error("no emulator for {0:?}")]
    Unsupported(Architecture),
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("cannot map emulator scratch region: {0}")]
    ScratchMapping(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Emulation(#[from] EmulationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    Snapshot(String),
    #[error("cannot parse object file: {0}")]
    Object(#[from] object::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
