// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

pub mod clock;
pub mod error;
pub mod grid;
pub mod seed;
pub mod settings;

pub use clock::{TickClock, TickRate};
pub use error::ConfigError;
pub use grid::{CellGrid, ALIVE_TEXEL, DEAD_TEXEL};
pub use settings::{GridSize, Position, SeedSource, Settings, WindowSettings};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
