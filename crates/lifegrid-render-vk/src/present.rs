// SPDX-License-Identifier: CEPL-1.0
//! Getting the latest generation onto a swapchain image.

use std::path::Path;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use lifegrid_math::{clip_blit, project_quad, BlitRegion, GridFit, Mat4};
use lifegrid_render::PresentStrategy;
use tracing::{info, warn};

use crate::context::GpuContext;
use crate::error::GpuError;
use crate::geometry::{QuadBuffers, FITTED_QUAD};
use crate::image::{record_barrier, Image2D, COLOR_LAYERS, COLOR_RANGE, GRID_FORMAT};
use crate::memory::Buffer;
use crate::pipeline::{
    allocate_sets, begin_pass, create_color_pass, create_framebuffer, create_graphics_pipeline,
    create_set_layout, load_shader, sampler_binding, uniform_binding, write_sampler,
    PipelineDesc, Stage,
};
use crate::swapchain::Swapchain;

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct ViewUbo {
    pub view: [[f32; 4]; 4],
}

/// Whether `strategy` can be honoured; blit needs transfer usage on the
/// swapchain and blit support for both formats.
pub fn resolve_strategy(
    strategy: PresentStrategy,
    swap_usage: vk::ImageUsageFlags,
    swap_features: vk::FormatFeatureFlags,
    grid_features: vk::FormatFeatureFlags,
) -> PresentStrategy {
    match strategy {
        PresentStrategy::Blit
            if swap_usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
                && swap_features.contains(vk::FormatFeatureFlags::BLIT_DST)
                && grid_features.contains(vk::FormatFeatureFlags::BLIT_SRC) =>
        {
            PresentStrategy::Blit
        }
        PresentStrategy::Blit => PresentStrategy::Sampled,
        s => s,
    }
}

/// Layout change for a freshly acquired swapchain image, ordered after the
/// acquire semaphore wait at `wait_stage`.
unsafe fn acquired_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    new: vk::ImageLayout,
    wait_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: dst_access,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        wait_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

pub struct Presenter {
    strategy: PresentStrategy,
    extent: vk::Extent2D,
    grid: (u32, u32),
    fit: GridFit,

    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    desc_pool: vk::DescriptorPool,
    /// `sets[i]` samples automaton image `i`.
    sets: [vk::DescriptorSet; 2],
    ubo: Option<Buffer>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl Presenter {
    pub unsafe fn new(
        ctx: &GpuContext,
        swapchain: &Swapchain,
        grid_views: [vk::ImageView; 2],
        sampler: vk::Sampler,
        grid: (u32, u32),
        wanted: PresentStrategy,
        shader_dir: Option<&Path>,
    ) -> Result<Self, GpuError> {
        let strategy = resolve_strategy(
            wanted,
            swapchain.usage,
            ctx.format_features(swapchain.format),
            ctx.format_features(GRID_FORMAT),
        );
        if strategy != wanted {
            warn!("{wanted:?} presentation unsupported here; using {strategy:?}");
        }
        let extent = swapchain.extent;
        let fit = GridFit::new(grid, (extent.width, extent.height));
        info!(
            "present {:?}: grid {}x{} at scale {:.3}, offset ({:.1}, {:.1})",
            strategy, grid.0, grid.1, fit.scale, fit.offset.x, fit.offset.y
        );

        let mut p = Presenter {
            strategy,
            extent,
            grid,
            fit,
            render_pass: vk::RenderPass::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            desc_pool: vk::DescriptorPool::null(),
            sets: [vk::DescriptorSet::null(); 2],
            ubo: None,
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        if strategy == PresentStrategy::Sampled {
            if let Err(e) = p.init_sampled(ctx, swapchain.format, grid_views, sampler, shader_dir) {
                p.destroy(&ctx.device);
                return Err(e);
            }
        }
        Ok(p)
    }

    unsafe fn init_sampled(
        &mut self,
        ctx: &GpuContext,
        format: vk::Format,
        grid_views: [vk::ImageView; 2],
        sampler: vk::Sampler,
        shader_dir: Option<&Path>,
    ) -> Result<(), GpuError> {
        let d = &ctx.device;
        let vert = load_shader(shader_dir, Stage::PresentVert)?;
        let frag = load_shader(shader_dir, Stage::PresentFrag)?;

        self.render_pass = create_color_pass(d, format, vk::ImageLayout::PRESENT_SRC_KHR)?;
        self.set_layout = create_set_layout(d, &[uniform_binding(0), sampler_binding(1)])?;

        let ubo_size = std::mem::size_of::<ViewUbo>() as vk::DeviceSize;
        let ubo = Buffer::host_visible(ctx, ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let ubo_handle = ubo.handle;
        self.ubo = Some(ubo);
        self.update_view(d, Mat4::IDENTITY.to_cols_array_2d())?;

        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 2,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 2,
            },
        ];
        let (pool, sets) = allocate_sets(d, &sizes, &[self.set_layout; 2])?;
        self.desc_pool = pool;
        self.sets = [sets[0], sets[1]];

        for (i, &set) in self.sets.iter().enumerate() {
            let info = vk::DescriptorBufferInfo {
                buffer: ubo_handle,
                offset: 0,
                range: ubo_size,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &info,
                ..Default::default()
            };
            d.update_descriptor_sets(std::slice::from_ref(&write), &[]);
            write_sampler(d, set, 1, grid_views[i], sampler);
        }

        let (layout, pipeline) = create_graphics_pipeline(
            d,
            &PipelineDesc {
                vert: &vert,
                frag: &frag,
                render_pass: self.render_pass,
                set_layout: self.set_layout,
                extent: self.extent,
            },
        )?;
        self.pipeline_layout = layout;
        self.pipeline = pipeline;
        Ok(())
    }

    pub fn strategy(&self) -> PresentStrategy {
        self.strategy
    }

    /// Stage at which the acquire semaphore has to be waited on.
    pub fn wait_stage(&self) -> vk::PipelineStageFlags {
        match self.strategy {
            PresentStrategy::Sampled => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            PresentStrategy::Blit => vk::PipelineStageFlags::TRANSFER,
        }
    }

    /// Only valid once the previous frame's fence has signaled.
    pub unsafe fn update_view(&self, device: &ash::Device, view: [[f32; 4]; 4]) -> Result<(), GpuError> {
        match &self.ubo {
            Some(ubo) => ubo.write(device, &[ViewUbo { view }]),
            None => Ok(()),
        }
    }

    /// Per-frame framebuffer on the acquired image; none needed for blits.
    pub unsafe fn prepare(
        &self,
        device: &ash::Device,
        swap_view: vk::ImageView,
    ) -> Result<Option<vk::Framebuffer>, GpuError> {
        match self.strategy {
            PresentStrategy::Sampled => {
                create_framebuffer(device, self.render_pass, swap_view, self.extent).map(Some)
            }
            PresentStrategy::Blit => Ok(None),
        }
    }

    /// Records drawing automaton image `source_index` into `swap_image`,
    /// which ends up in the present layout.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: Option<vk::Framebuffer>,
        swap_image: vk::Image,
        source: &mut Image2D,
        source_index: usize,
        quad: &QuadBuffers,
        view: [[f32; 4]; 4],
        clear: [f32; 4],
    ) {
        match (self.strategy, framebuffer) {
            (PresentStrategy::Sampled, Some(fb)) => {
                begin_pass(device, cmd, self.render_pass, fb, self.extent, clear);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[self.sets[source_index]],
                    &[],
                );
                quad.bind(device, cmd);
                quad.draw(device, cmd, FITTED_QUAD);
                device.cmd_end_render_pass(cmd);
            }
            (PresentStrategy::Blit, _) => {
                let regions = self.blit_regions(&Mat4::from_cols_array_2d(&view));
                self.record_blit(device, cmd, swap_image, source, &regions, clear);
            }
            (PresentStrategy::Sampled, None) => self.record_recovery(device, cmd, swap_image),
        }
    }

    /// Pixel regions the fitted grid covers under `view`, clipped to the target.
    pub fn blit_regions(&self, view: &Mat4) -> Vec<BlitRegion> {
        let target = (self.extent.width, self.extent.height);
        let rect = project_quad(view, self.fit.ndc_half_extent, target);
        clip_blit(self.grid, rect, target)
    }

    unsafe fn record_blit(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        swap_image: vk::Image,
        source: &mut Image2D,
        regions: &[BlitRegion],
        clear: [f32; 4],
    ) {
        let dst = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        acquired_barrier(
            device,
            cmd,
            swap_image,
            dst,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        );
        let color = vk::ClearColorValue { float32: clear };
        device.cmd_clear_color_image(cmd, swap_image, dst, &color, std::slice::from_ref(&COLOR_RANGE));

        if !regions.is_empty() {
            // clear and blit both write the swapchain image
            record_barrier(device, cmd, swap_image, dst, dst);
            source.record_transition(device, cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            let offset = |p: [i32; 2]| vk::Offset3D {
                x: p[0],
                y: p[1],
                z: 0,
            };
            let far = |p: [i32; 2]| vk::Offset3D {
                x: p[0],
                y: p[1],
                z: 1,
            };
            let blits: Vec<vk::ImageBlit> = regions
                .iter()
                .map(|r| vk::ImageBlit {
                    src_subresource: COLOR_LAYERS,
                    src_offsets: [offset(r.src[0]), far(r.src[1])],
                    dst_subresource: COLOR_LAYERS,
                    dst_offsets: [offset(r.dst[0]), far(r.dst[1])],
                })
                .collect();
            device.cmd_blit_image(
                cmd,
                source.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                dst,
                &blits,
                vk::Filter::NEAREST,
            );
            source.record_transition(device, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        record_barrier(device, cmd, swap_image, dst, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    /// Puts an acquired image straight into the present layout so it can be
    /// handed back when nothing could be drawn into it.
    pub unsafe fn record_recovery(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        swap_image: vk::Image,
    ) {
        acquired_barrier(
            device,
            cmd,
            swap_image,
            vk::ImageLayout::PRESENT_SRC_KHR,
            self.wait_stage(),
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        );
    }

    /// Idempotent.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.desc_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.desc_pool, None);
            self.desc_pool = vk::DescriptorPool::null();
            self.sets = [vk::DescriptorSet::null(); 2];
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.set_layout, None);
            self.set_layout = vk::DescriptorSetLayout::null();
        }
        if let Some(mut ubo) = self.ubo.take() {
            ubo.destroy(device);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
        vk::FormatFeatureFlags::BLIT_SRC.as_raw() | vk::FormatFeatureFlags::BLIT_DST.as_raw(),
    );

    #[test]
    fn blit_kept_when_supported() {
        let s = resolve_strategy(
            PresentStrategy::Blit,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            ALL,
            ALL,
        );
        assert_eq!(s, PresentStrategy::Blit);
    }

    #[test]
    fn blit_falls_back_to_sampled() {
        let no_transfer = resolve_strategy(
            PresentStrategy::Blit,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ALL,
            ALL,
        );
        assert_eq!(no_transfer, PresentStrategy::Sampled);

        let no_src = resolve_strategy(
            PresentStrategy::Blit,
            vk::ImageUsageFlags::TRANSFER_DST,
            ALL,
            vk::FormatFeatureFlags::BLIT_DST,
        );
        assert_eq!(no_src, PresentStrategy::Sampled);
    }

    #[test]
    fn sampled_always_available() {
        let s = resolve_strategy(
            PresentStrategy::Sampled,
            vk::ImageUsageFlags::empty(),
            vk::FormatFeatureFlags::empty(),
            vk::FormatFeatureFlags::empty(),
        );
        assert_eq!(s, PresentStrategy::Sampled);
    }
}
