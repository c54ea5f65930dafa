// SPDX-License-Identifier: CEPL-1.0
//! The ping-pong image pair and the step pass that advances it.

use std::path::Path;

use ash::vk;
use lifegrid_core::{CellGrid, GridSize};
use lifegrid_render::{PingPong, TickPlan};
use tracing::{debug, info};

use crate::context::GpuContext;
use crate::error::{GpuError, VkResultExt};
use crate::geometry::{QuadBuffers, FULL_QUAD};
use crate::image::{create_sampler, Image2D, COLOR_RANGE, GRID_FORMAT, GRID_USAGE};
use crate::pipeline::{
    allocate_sets, begin_pass, create_color_pass, create_framebuffer, create_graphics_pipeline,
    create_set_layout, load_shader, sampler_binding, write_sampler, PipelineDesc, Stage,
};
use crate::upload::{one_shot, read_image, seed_image};

/// A step whose framebuffer exists but whose commands are not recorded yet.
#[derive(Debug)]
pub struct PendingTick {
    pub plan: TickPlan,
    pub framebuffer: vk::Framebuffer,
}

pub struct Automaton {
    images: PingPong<Image2D>,
    extent: vk::Extent2D,
    sampler: vk::Sampler,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    desc_pool: vk::DescriptorPool,
    /// `sets[i]` samples `images[i]`.
    sets: [vk::DescriptorSet; 2],
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl Automaton {
    pub unsafe fn new(
        ctx: &GpuContext,
        grid: (u32, u32),
        shader_dir: Option<&Path>,
    ) -> Result<Self, GpuError> {
        let extent = vk::Extent2D {
            width: grid.0,
            height: grid.1,
        };
        let mut a = Image2D::new(ctx, extent, GRID_FORMAT, GRID_USAGE)?;
        let b = match Image2D::new(ctx, extent, GRID_FORMAT, GRID_USAGE) {
            Ok(b) => b,
            Err(e) => {
                a.destroy(&ctx.device);
                return Err(e);
            }
        };

        let mut automaton = Automaton {
            images: PingPong::new(a, b),
            extent,
            sampler: vk::Sampler::null(),
            render_pass: vk::RenderPass::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            desc_pool: vk::DescriptorPool::null(),
            sets: [vk::DescriptorSet::null(); 2],
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        if let Err(e) = automaton.init(ctx, shader_dir) {
            automaton.destroy(&ctx.device);
            return Err(e);
        }
        info!("automaton images {}x{} ready", grid.0, grid.1);
        Ok(automaton)
    }

    unsafe fn init(&mut self, ctx: &GpuContext, shader_dir: Option<&Path>) -> Result<(), GpuError> {
        let d = &ctx.device;
        let vert = load_shader(shader_dir, Stage::StepVert)?;
        let frag = load_shader(shader_dir, Stage::StepFrag)?;

        self.sampler = create_sampler(d)?;
        self.render_pass =
            create_color_pass(d, GRID_FORMAT, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        self.set_layout = create_set_layout(d, &[sampler_binding(0)])?;

        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 2,
        }];
        let (pool, sets) = allocate_sets(d, &sizes, &[self.set_layout; 2])?;
        self.desc_pool = pool;
        self.sets = [sets[0], sets[1]];
        for (i, &set) in self.sets.iter().enumerate() {
            write_sampler(d, set, 0, self.images.get(i).view, self.sampler);
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

        self.clear_all(ctx)
    }

    /// Both images dead and shader-readable.
    unsafe fn clear_all(&mut self, ctx: &GpuContext) -> Result<(), GpuError> {
        let images = &mut self.images;
        one_shot(ctx, |d, cmd| {
            let black = vk::ClearColorValue { float32: [0.0; 4] };
            for img in images.iter_mut() {
                img.discard();
                img.record_transition(d, cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                d.cmd_clear_color_image(
                    cmd,
                    img.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &black,
                    std::slice::from_ref(&COLOR_RANGE),
                );
                img.record_transition(d, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
        })
    }

    pub fn grid_size(&self) -> GridSize {
        GridSize::new(self.extent.width, self.extent.height)
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn images(&self) -> &PingPong<Image2D> {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut PingPong<Image2D> {
        &mut self.images
    }

    /// Creates the framebuffer on the write image. Roles stay as they are
    /// until [`commit`](Self::commit).
    pub unsafe fn prepare_tick(&self, device: &ash::Device) -> Result<PendingTick, GpuError> {
        let plan = self.images.plan();
        let framebuffer = create_framebuffer(
            device,
            self.render_pass,
            self.images.get(plan.write).view,
            self.extent,
        )?;
        Ok(PendingTick { plan, framebuffer })
    }

    /// Records the step pass: sample `plan.read`, render into `plan.write`.
    pub unsafe fn record_tick(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        tick: &PendingTick,
        quad: &QuadBuffers,
    ) {
        let plan = tick.plan;
        debug_assert_ne!(plan.read, plan.write);
        begin_pass(
            device,
            cmd,
            self.render_pass,
            tick.framebuffer,
            self.extent,
            [0.0; 4],
        );
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            &[self.sets[plan.read]],
            &[],
        );
        quad.bind(device, cmd);
        quad.draw(device, cmd, FULL_QUAD);
        device.cmd_end_render_pass(cmd);

        let (_, write) = self.images.split_mut(plan);
        write.assume_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    /// The written image becomes the latest generation.
    pub fn commit(&mut self, tick: &PendingTick) -> bool {
        self.images.commit(tick.plan)
    }

    /// Runs one step to completion on its own submission.
    pub unsafe fn step_blocking(
        &mut self,
        ctx: &GpuContext,
        quad: &QuadBuffers,
    ) -> Result<(), GpuError> {
        let tick = self.prepare_tick(&ctx.device)?;
        let res = one_shot(ctx, |d, cmd| self.record_tick(d, cmd, &tick, quad));
        ctx.device.destroy_framebuffer(tick.framebuffer, None);
        res?;
        self.commit(&tick);
        Ok(())
    }

    /// Replaces the latest generation. Blocks until the upload completes.
    pub unsafe fn seed(&mut self, ctx: &GpuContext, grid: &CellGrid) -> Result<(), GpuError> {
        seed_image(ctx, self.images.current_mut(), &grid.to_texels())?;
        debug!(
            "seeded image {} with {} live cells",
            self.images.current_index(),
            grid.live_count()
        );
        Ok(())
    }

    /// Latest generation, copied back to the host.
    pub unsafe fn read(&mut self, ctx: &GpuContext) -> Result<CellGrid, GpuError> {
        let size = self.grid_size();
        let texels = read_image(ctx, self.images.current_mut())?;
        Ok(CellGrid::from_texels(size, &texels))
    }

    /// Pipeline before its layout; the pool frees its sets. Idempotent.
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
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
        if self.sampler != vk::Sampler::null() {
            device.destroy_sampler(self.sampler, None);
            self.sampler = vk::Sampler::null();
        }
        for img in self.images.iter_mut() {
            img.destroy(device);
        }
    }
}
