// SPDX-License-Identifier: CEPL-1.0
//! View math for presenting the grid: the fitted quad, the pan/zoom camera, and
//! the pixel rectangles used when presenting by blit.

mod camera;
mod fit;

pub use camera::Camera2D;
pub use fit::{clip_blit, project_quad, BlitRegion, GridFit, PixelRect};
pub use glam::{Mat4, Vec2};
