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

use std::sync::atomic::{AtomicBool, Ordering};

use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

static TRACE_ENHANCEMENT: AtomicBool = AtomicBool::new(false);

/// Start the global logger. `RUST_LOG` overrides the level picked from `debug`.
pub fn init(debug: bool) -> Result<LoggerHandle, FlexiLoggerError> {
    let spec = if debug { "debug" } else { "info" };
    Logger::try_with_env_or_str(spec)?
        .log_to_stderr()
        .format(flexi_logger::default_format)
        .start()
}

/// Dump every enhanced instruction at debug level.
pub fn set_trace_enhancement(enabled: bool) {
    TRACE_ENHANCEMENT.store(enabled, Ordering::Relaxed);
}

pub fn is_tracing() -> bool {
    TRACE_ENHANCEMENT.load(Ordering::Relaxed)
}

/// Log an enhancement trace line if tracing was switched on
#[macro_export]
macro_rules! trace_enhancement {
    ($($arg:tt)*) => {
        if $crate::logging::is_tracing() {
            ::log::debug!($($arg)*);
        }
    };
}
