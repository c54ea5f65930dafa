// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

use crate::fit::{project_quad, PixelRect};

const MIN_ZOOM: f32 = 0.05;
const MAX_ZOOM: f32 = 64.0;
const ZOOM_STEP: f32 = 1.1;

/// Orthographic pan/zoom camera over the NDC-sized world the grid quad lives in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera2D {
    viewport: (u32, u32),
    pan: Vec2,
    zoom: f32,
}

impl Camera2D {
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            viewport: (viewport.0.max(1), viewport.1.max(1)),
            pan: Vec2::ZERO,
            zoom: 1.0,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_viewport(&mut self, viewport: (u32, u32)) {
        self.viewport = (viewport.0.max(1), viewport.1.max(1));
    }

    pub fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.zoom = 1.0;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_scale(Vec3::new(self.zoom, self.zoom, 1.0))
            * Mat4::from_translation(Vec3::new(-self.pan.x, -self.pan.y, 0.0))
    }

    /// Window pixel to world position.
    pub fn screen_to_world(&self, px: f32, py: f32) -> Vec2 {
        let ndc = Vec2::new(
            2.0 * px / self.viewport.0 as f32 - 1.0,
            2.0 * py / self.viewport.1 as f32 - 1.0,
        );
        let w = self.view_matrix().inverse() * ndc.extend(0.0).extend(1.0);
        w.xy()
    }

    /// World position to window pixel.
    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        let ndc = (self.view_matrix() * world.extend(0.0).extend(1.0)).xy();
        (ndc + Vec2::ONE) * 0.5 * Vec2::new(self.viewport.0 as f32, self.viewport.1 as f32)
    }

    /// Scroll zoom; positive `steps` zooms in.
    pub fn zoom_by(&mut self, steps: f32) {
        self.zoom = (self.zoom * ZOOM_STEP.powf(steps)).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Drags the world so the point under `from` ends up under `to` (both window pixels).
    pub fn drag(&mut self, from: Vec2, to: Vec2) {
        let delta = self.screen_to_world(from.x, from.y) - self.screen_to_world(to.x, to.y);
        self.pan += delta;
    }

    /// Where a world-space rectangle centred on the origin lands on screen.
    pub fn project_rect(&self, half_extent: Vec2) -> PixelRect {
        project_quad(&self.view_matrix(), half_extent, self.viewport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn identity_camera_maps_corners() {
        let cam = Camera2D::new((200, 100));
        assert!(close(cam.screen_to_world(0.0, 0.0), Vec2::new(-1.0, -1.0)));
        assert!(close(cam.screen_to_world(200.0, 100.0), Vec2::new(1.0, 1.0)));
        assert!(close(cam.world_to_screen(Vec2::ZERO), Vec2::new(100.0, 50.0)));
    }

    #[test]
    fn drag_keeps_point_under_cursor() {
        let mut cam = Camera2D::new((400, 400));
        cam.zoom_by(3.0);
        let grabbed = cam.screen_to_world(100.0, 120.0);
        cam.drag(Vec2::new(100.0, 120.0), Vec2::new(250.0, 60.0));
        assert!(close(cam.screen_to_world(250.0, 60.0), grabbed));
    }

    #[test]
    fn zoom_is_clamped() {
        let mut cam = Camera2D::new((10, 10));
        cam.zoom_by(1000.0);
        assert_eq!(cam.zoom(), MAX_ZOOM);
        cam.zoom_by(-1000.0);
        assert_eq!(cam.zoom(), MIN_ZOOM);
        cam.reset();
        assert_eq!(cam.zoom(), 1.0);
    }

    #[test]
    fn projected_rect_scales_with_zoom() {
        let mut cam = Camera2D::new((100, 100));
        let r = cam.project_rect(Vec2::new(0.5, 0.5));
        assert!(close(r.min, Vec2::new(25.0, 25.0)));
        assert!(close(r.max, Vec2::new(75.0, 75.0)));
        cam.zoom_by(ZOOM_STEP.ln().recip() * 2f32.ln());
        let r = cam.project_rect(Vec2::new(0.5, 0.5));
        assert!(close(r.min, Vec2::ZERO));
        assert!(close(r.max, Vec2::new(100.0, 100.0)));
    }
}
