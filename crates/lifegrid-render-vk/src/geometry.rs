// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::{Pod, Zeroable};
use lifegrid_math::GridFit;

use crate::context::GpuContext;
use crate::error::GpuError;
use crate::memory::Buffer;
use crate::upload::upload_via_staging;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
}

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// First vertex of the full-target quad used by the step pass.
pub const FULL_QUAD: i32 = 0;
/// First vertex of the fitted quad used by the present pass.
pub const FITTED_QUAD: i32 = 4;

/// Full-target quad followed by the fitted grid quad, clockwise from top-left.
pub fn quad_vertices(fit: &GridFit) -> [Vertex; 8] {
    let uv = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    let full = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
    let fitted = fit.quad_corners();

    let mut out = [Vertex::zeroed(); 8];
    for i in 0..4 {
        out[i] = Vertex {
            pos: [full[i][0], full[i][1], 0.0],
            uv: uv[i],
        };
        out[i + 4] = Vertex {
            pos: [fitted[i].x, fitted[i].y, 0.0],
            uv: uv[i],
        };
    }
    out
}

pub struct QuadBuffers {
    pub vertices: Buffer,
    pub indices: Buffer,
}

impl QuadBuffers {
    pub unsafe fn new(ctx: &GpuContext, fit: &GridFit) -> Result<Self, GpuError> {
        let verts = quad_vertices(fit);
        let vbytes: &[u8] = bytemuck::cast_slice(&verts);
        let ibytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);

        let mut vertices = Buffer::new(
            ctx,
            vbytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let indices = Buffer::new(
            ctx,
            ibytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        let mut indices = match indices {
            Ok(b) => b,
            Err(e) => {
                vertices.destroy(&ctx.device);
                return Err(e);
            }
        };

        let uploaded = upload_via_staging(ctx, &vertices, vbytes)
            .and_then(|_| upload_via_staging(ctx, &indices, ibytes));
        if let Err(e) = uploaded {
            vertices.destroy(&ctx.device);
            indices.destroy(&ctx.device);
            return Err(e);
        }
        Ok(QuadBuffers { vertices, indices })
    }

    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle], &[0]);
        device.cmd_bind_index_buffer(cmd, self.indices.handle, 0, vk::IndexType::UINT16);
    }

    /// Draws the quad starting at vertex `first`.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, first: i32) {
        device.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32, 1, 0, first, 0);
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.vertices.destroy(device);
        self.indices.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_quad_covers_target() {
        let v = quad_vertices(&GridFit::new((10, 10), (10, 10)));
        assert_eq!(v[0].pos, [-1.0, -1.0, 0.0]);
        assert_eq!(v[2].pos, [1.0, 1.0, 0.0]);
        assert_eq!(v[4..8], v[0..4]);
    }

    #[test]
    fn fitted_quad_keeps_aspect() {
        let v = quad_vertices(&GridFit::new((100, 50), (200, 200)));
        let f = &v[FITTED_QUAD as usize..];
        assert_eq!(f[0].pos, [-1.0, -0.5, 0.0]);
        assert_eq!(f[2].pos, [1.0, 0.5, 0.0]);
        assert_eq!(f[0].uv, [0.0, 0.0]);
        assert_eq!(f[2].uv, [1.0, 1.0]);
    }

    #[test]
    fn indices_form_two_triangles() {
        assert_eq!(QUAD_INDICES.len(), 6);
        assert!(QUAD_INDICES.iter().all(|&i| i < 4));
    }
}
