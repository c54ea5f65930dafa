// SPDX-License-Identifier: CEPL-1.0
//! Window/input collaborator. The event loop itself is `winit`'s; this crate
//! re-exports it and turns raw input into [`Control`] events.

pub mod input;

pub use input::{map_key, scroll_steps, Buttons, Control, InputState};
pub use winit;
