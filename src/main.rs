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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use insn_enhance::format::instruction_line;
use insn_enhance::logging;
use insn_enhance::process::RegisterReader;
use insn_enhance::{Config, Session, Snapshot, SymbolTable};

/// Print the annotated instruction window around the program counter of a
/// process snapshot.
#[derive(Parser, Debug)]
#[command(name = "insn-enhance", version)]
struct Cli {
    /// JSON snapshot of the stopped process
    #[arg(short = 's', long = "snapshot")]
    snapshot: PathBuf,

    /// Take symbols from this ELF instead of the snapshot
    #[arg(short = 'e', long = "elf")]
    elf: Option<PathBuf>,

    /// JSON config file; command line flags are ignored when given
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Instructions shown before and after the program counter
    #[arg(short = 'n', long = "count", default_value_t = 5)]
    count: usize,

    /// Don't show previously executed instructions
    #[arg(long = "no-history", default_value_t = false)]
    no_history: bool,

    /// Enable debug output
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Log every enhanced instruction (implies --debug)
    #[arg(long = "trace", default_value_t = false)]
    trace: bool,

    #[command(flatten)]
    options: Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = logging::init(cli.debug || cli.trace)?;
    logging::set_trace_enhancement(cli.trace);

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => cli.options.clone(),
    };

    let mut snapshot = Snapshot::load(&cli.snapshot)
        .with_context(|| format!("loading snapshot {}", cli.snapshot.display()))?;
    if let Some(elf) = &cli.elf {
        let symbols = SymbolTable::load_elf(elf)
            .with_context(|| format!("loading symbols from {}", elf.display()))?;
        log::info!("{} symbols from {}", symbols.len(), elf.display());
        snapshot = snapshot.with_symbols(symbols);
    }

    let mut session = Session::new(config);
    let window = session.enhance_window(&snapshot, cli.count, true, !cli.no_history);
    for warning in session.warnings() {
        eprintln!("{}", warning);
    }
    if window.is_empty() {
        anyhow::bail!("no instruction at the program counter");
    }

    let pc = snapshot.pc();
    for insn in &window {
        println!("{}", instruction_line(insn, Some(insn.address) == pc));
    }
    Ok(())
}
