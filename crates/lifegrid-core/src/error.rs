// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

/// Problems with user input that are reported before any GPU object exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read seed file {path}: {source}")]
    SeedFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} must be non-zero (got {width}x{height})")]
    ZeroSize {
        what: &'static str,
        width: u32,
        height: u32,
    },

    #[error("tick rate must be at least 1 per second")]
    ZeroTickRate,

    #[error("tick rate {0} exceeds the maximum of {max}", max = crate::clock::MAX_TICK_RATE)]
    TickRateTooHigh(u32),

    #[error("only one seed source may be given (found {0})")]
    ConflictingSeeds(String),

    #[error("could not parse cell position {0:?}, expected \"x,y\"")]
    BadPosition(String),

    #[error("could not read config file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },
}
