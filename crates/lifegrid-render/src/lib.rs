// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::Result;
use lifegrid_core::CellGrid;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod phase;
pub mod pingpong;

pub use phase::{FramePhase, PhaseError};
pub use pingpong::{PingPong, TickPlan};

#[derive(Clone, Copy, Debug)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// How the current generation reaches the swapchain image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentStrategy {
    /// Textured quad through a sampler descriptor.
    #[default]
    Sampled,
    /// Raw image blit, no descriptors involved.
    Blit,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub grid: (u32, u32),
    pub clear_color: [f32; 4],
    pub present: PresentStrategy,
    /// Load `*.spv` from here instead of the built-in shaders.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            grid: (1, 1),
            clear_color: [0.12, 0.12, 0.12, 1.0],
            present: PresentStrategy::Sampled,
            shader_dir: None,
        }
    }
}

/// What a call to [`Renderer::render`] ended up doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// The automaton advanced one generation.
    pub ticked: bool,
    /// Nothing reached the screen this frame.
    pub dropped: bool,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        seed: &CellGrid,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Presents one frame, advancing the automaton first when `tick` is set.
    fn render(&mut self, tick: bool, view: [[f32; 4]; 4]) -> Result<FrameReport>;

    /// Replaces the latest generation. Blocks until the upload has finished.
    fn reseed(&mut self, grid: &CellGrid) -> Result<()>;
}
