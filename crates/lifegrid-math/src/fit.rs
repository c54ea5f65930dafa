// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec2, Vec4Swizzles};

/// Uniform scale and centering of a `grid` inside a `target`, both in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridFit {
    /// Target pixels per grid cell.
    pub scale: f32,
    /// Top-left corner of the fitted grid, in target pixels.
    pub offset: Vec2,
    /// Half extent of the fitted quad in normalized device coordinates.
    pub ndc_half_extent: Vec2,
}

impl GridFit {
    pub fn new(grid: (u32, u32), target: (u32, u32)) -> Self {
        let g = Vec2::new(grid.0.max(1) as f32, grid.1.max(1) as f32);
        let t = Vec2::new(target.0.max(1) as f32, target.1.max(1) as f32);
        let scale = (t.x / g.x).min(t.y / g.y);
        let drawn = g * scale;
        GridFit {
            scale,
            offset: (t - drawn) * 0.5,
            ndc_half_extent: drawn / t,
        }
    }

    /// Quad corners in NDC, clockwise from top-left (Vulkan: +y is down).
    pub fn quad_corners(&self) -> [Vec2; 4] {
        let h = self.ndc_half_extent;
        [
            Vec2::new(-h.x, -h.y),
            Vec2::new(h.x, -h.y),
            Vec2::new(h.x, h.y),
            Vec2::new(-h.x, h.y),
        ]
    }
}

/// Axis-aligned rectangle in (possibly fractional) pixels; `min` inclusive, `max` exclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRect {
    pub min: Vec2,
    pub max: Vec2,
}

/// Source and destination corners for an image blit, in whole texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitRegion {
    pub src: [[i32; 2]; 2],
    pub dst: [[i32; 2]; 2],
}

/// Window pixels covered by the centred quad of `half_extent` (NDC) after `view`.
pub fn project_quad(view: &Mat4, half_extent: Vec2, target: (u32, u32)) -> PixelRect {
    let t = Vec2::new(target.0 as f32, target.1 as f32);
    let to_px = |ndc: Vec2| {
        let p = (*view * ndc.extend(0.0).extend(1.0)).xy();
        (p + Vec2::ONE) * 0.5 * t
    };
    let a = to_px(-half_extent);
    let b = to_px(half_extent);
    PixelRect {
        min: a.min(b),
        max: a.max(b),
    }
}

/// One axis of a clipped blit: texels `src.0..src.1` land on pixels `dst.0..dst.1`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Span {
    src: (i32, i32),
    dst: (f32, f32),
}

/// Splits the visible part `lo..hi` of a row of `cells` drawn over `d0..d1` into
/// whole cells at true scale plus the partly visible cell at each end.
fn axis_spans(cells: u32, d0: f32, d1: f32, lo: f32, hi: f32) -> Vec<Span> {
    let scale = (d1 - d0) / cells as f32;
    let snap = |v: f32| if (v - v.round()).abs() < 1e-4 { v.round() } else { v };
    let a = snap((lo - d0) / scale);
    let b = snap((hi - d0) / scale);
    let edge = |i: f32| d0 + i * scale;
    let (first, last) = (a.ceil(), b.floor());

    let mut spans = Vec::with_capacity(3);
    if first > last {
        // visible part lies inside a single cell
        let t = a.floor() as i32;
        spans.push(Span {
            src: (t, t + 1),
            dst: (lo, hi),
        });
        return spans;
    }
    if a < first {
        let t = first as i32 - 1;
        spans.push(Span {
            src: (t, t + 1),
            dst: (lo, edge(first)),
        });
    }
    if first < last {
        spans.push(Span {
            src: (first as i32, last as i32),
            dst: (edge(first), edge(last)),
        });
    }
    if last < b {
        let t = last as i32;
        spans.push(Span {
            src: (t, t + 1),
            dst: (edge(last), hi),
        });
    }
    spans
}

/// Clips a grid drawn at `dst` to a `target` of the given size. Every visible
/// cell keeps the pixel footprint it has when the grid is drawn unclipped, so the
/// result is one region per run of whole cells plus one per partly visible edge
/// cell. Empty when nothing is visible.
pub fn clip_blit(grid: (u32, u32), dst: PixelRect, target: (u32, u32)) -> Vec<BlitRegion> {
    let size = dst.max - dst.min;
    if grid.0 == 0 || grid.1 == 0 || size.x <= 0.0 || size.y <= 0.0 {
        return Vec::new();
    }
    let t = Vec2::new(target.0 as f32, target.1 as f32);
    let lo = dst.min.max(Vec2::ZERO);
    let hi = dst.max.min(t);
    if hi.x <= lo.x || hi.y <= lo.y {
        return Vec::new();
    }

    let xs = axis_spans(grid.0, dst.min.x, dst.max.x, lo.x, hi.x);
    let ys = axis_spans(grid.1, dst.min.y, dst.max.y, lo.y, hi.y);
    let px = |v: f32| v.round() as i32;

    let mut regions = Vec::with_capacity(xs.len() * ys.len());
    for y in &ys {
        for x in &xs {
            let r = BlitRegion {
                src: [[x.src.0, y.src.0], [x.src.1, y.src.1]],
                dst: [[px(x.dst.0), px(y.dst.0)], [px(x.dst.1), px(y.dst.1)]],
            };
            let empty = |c: [[i32; 2]; 2]| c[1][0] <= c[0][0] || c[1][1] <= c[0][1];
            if !empty(r.src) && !empty(r.dst) {
                regions.push(r);
            }
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_fills_target() {
        let f = GridFit::new((800, 600), (800, 600));
        assert_eq!(f.scale, 1.0);
        assert_eq!(f.offset, Vec2::ZERO);
        assert_eq!(f.ndc_half_extent, Vec2::ONE);
    }

    #[test]
    fn square_grid_in_wide_window_is_pillarboxed() {
        let f = GridFit::new((100, 100), (400, 200));
        assert_eq!(f.scale, 2.0);
        assert_eq!(f.offset, Vec2::new(100.0, 0.0));
        assert_eq!(f.ndc_half_extent, Vec2::new(0.5, 1.0));
    }

    #[test]
    fn large_grid_is_scaled_down_without_distortion() {
        let f = GridFit::new((4000, 1000), (1000, 1000));
        assert_eq!(f.scale, 0.25);
        assert_eq!(f.offset, Vec2::new(0.0, 375.0));
        let aspect = f.ndc_half_extent.x * 1000.0 / (f.ndc_half_extent.y * 1000.0);
        assert!((aspect - 4.0).abs() < 1e-5);
    }

    #[test]
    fn blit_fully_visible() {
        let r = clip_blit(
            (10, 10),
            PixelRect {
                min: Vec2::new(20.0, 0.0),
                max: Vec2::new(120.0, 100.0),
            },
            (140, 100),
        );
        assert_eq!(
            r,
            vec![BlitRegion {
                src: [[0, 0], [10, 10]],
                dst: [[20, 0], [120, 100]],
            }]
        );
    }

    #[test]
    fn blit_clips_on_a_cell_boundary() {
        // grid zoomed so that only its right half is on screen
        let r = clip_blit(
            (10, 10),
            PixelRect {
                min: Vec2::new(-100.0, 0.0),
                max: Vec2::new(100.0, 200.0),
            },
            (200, 200),
        );
        assert_eq!(
            r,
            vec![BlitRegion {
                src: [[5, 0], [10, 10]],
                dst: [[0, 0], [100, 200]],
            }]
        );
    }

    #[test]
    fn clipped_blit_keeps_cell_size() {
        // 10 px per cell, a cell and a half hidden past the left edge
        let r = clip_blit(
            (10, 10),
            PixelRect {
                min: Vec2::new(-15.0, 0.0),
                max: Vec2::new(85.0, 100.0),
            },
            (200, 100),
        );
        assert_eq!(r.len(), 2);
        let (edge, whole) = (r[0], r[1]);
        assert_eq!(edge.src, [[1, 0], [2, 10]]);
        assert_eq!(edge.dst, [[0, 0], [5, 100]]);
        assert_eq!(whole.src, [[2, 0], [10, 10]]);
        assert_eq!(whole.dst, [[5, 0], [85, 100]]);

        let cells = (whole.src[1][0] - whole.src[0][0]) as f32;
        let pixels = (whole.dst[1][0] - whole.dst[0][0]) as f32;
        assert_eq!(pixels / cells, 10.0);
        // cell 5 starts where the sampled quad puts it
        assert_eq!(whole.dst[0][0] + (5 - whole.src[0][0]) * 10, -15 + 5 * 10);
    }

    #[test]
    fn zoomed_blit_matches_fit_scale_on_every_side() {
        // fit scale 2 px per cell, zoomed 4x about the centre of a 200x200 target
        let fit = GridFit::new((100, 100), (200, 200));
        let zoom = 4.0;
        let view = Mat4::from_scale(Vec2::splat(zoom).extend(1.0));
        let rect = project_quad(&view, fit.ndc_half_extent, (200, 200));
        let r = clip_blit((100, 100), rect, (200, 200));

        let per_cell = fit.scale * zoom;
        let covered: i32 = r
            .iter()
            .filter(|b| b.dst[0][1] == 0)
            .map(|b| b.dst[1][0] - b.dst[0][0])
            .sum();
        assert_eq!(covered, 200);
        for b in &r {
            let cells = (b.src[1][0] - b.src[0][0]) as f32;
            let pixels = (b.dst[1][0] - b.dst[0][0]) as f32;
            if cells > 1.0 {
                assert_eq!(pixels / cells, per_cell);
            } else {
                assert!(pixels <= per_cell);
            }
        }
    }

    #[test]
    fn blit_inside_one_cell() {
        let r = clip_blit(
            (2, 2),
            PixelRect {
                min: Vec2::new(-300.0, -300.0),
                max: Vec2::new(500.0, 500.0),
            },
            (100, 100),
        );
        assert_eq!(
            r,
            vec![BlitRegion {
                src: [[0, 0], [1, 1]],
                dst: [[0, 0], [100, 100]],
            }]
        );
    }

    #[test]
    fn identity_projection_matches_offset() {
        let f = GridFit::new((100, 100), (400, 200));
        let r = project_quad(&Mat4::IDENTITY, f.ndc_half_extent, (400, 200));
        assert_eq!(r.min, f.offset);
        assert_eq!(r.max, Vec2::new(300.0, 200.0));
    }

    #[test]
    fn blit_off_screen_is_none() {
        let off = PixelRect {
            min: Vec2::new(300.0, 0.0),
            max: Vec2::new(400.0, 100.0),
        };
        assert!(clip_blit((10, 10), off, (200, 200)).is_empty());
    }
}
