// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: the automaton advances by rendering one generation into
//! the idle half of an image pair, and the latest half is drawn to the window.

use std::path::Path;

use anyhow::{Context, Result};
use ash::vk;
use lifegrid_core::CellGrid;
use lifegrid_math::GridFit;
use lifegrid_render::{FramePhase, FrameReport, PresentStrategy, RenderSettings, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

mod automaton;
mod context;
mod error;
mod frame;
mod geometry;
mod image;
mod memory;
mod pipeline;
mod present;
mod swapchain;
mod upload;

pub use automaton::{Automaton, PendingTick};
pub use context::{pick_families, rank_candidates, Candidate, GpuContext, QueueFamilies};
pub use error::{GpuError, VkResultExt};
pub use frame::FrameSync;
pub use geometry::{quad_vertices, QuadBuffers, Vertex};
pub use image::{Image2D, GRID_FORMAT};
pub use memory::{find_memory_type, Buffer};
pub use pipeline::{load_shader, Stage};
pub use present::{resolve_strategy, Presenter};
pub use swapchain::{choose_present_mode, choose_surface_format, Swapchain};

pub struct VkRenderer {
    ctx: GpuContext,
    swapchain: Swapchain,
    quad: QuadBuffers,
    automaton: Automaton,
    presenter: Presenter,
    frame: FrameSync,
    clear: [f32; 4],
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - Per-frame framebuffers, semaphores, fence, then the command pool
// - Present pipeline BEFORE its layout; descriptor pool, UBO, render pass
// - Step pipeline, sets, sampler, render pass; views BEFORE their images
// - Quad buffers
// - Swapchain views BEFORE the swapchain
// - GpuContext last: device, surface, messenger, instance
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();

            self.frame.destroy(d);
            self.presenter.destroy(d);
            self.automaton.destroy(d);
            self.quad.destroy(d);
            self.swapchain.destroy(d);
        }
        info!("renderer torn down");
    }
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    settings: &RenderSettings,
    seed: &CellGrid,
) -> Result<VkRenderer> {
    let ctx = GpuContext::new(window, display).context("vulkan device")?;
    let d = &ctx.device;
    let shader_dir = settings.shader_dir.as_deref();

    let extra_usage = match settings.present {
        PresentStrategy::Blit => vk::ImageUsageFlags::TRANSFER_DST,
        PresentStrategy::Sampled => vk::ImageUsageFlags::empty(),
    };
    let mut swapchain = Swapchain::new(&ctx, size, extra_usage).context("swapchain")?;

    let fit = GridFit::new(
        settings.grid,
        (swapchain.extent.width, swapchain.extent.height),
    );
    let mut quad = match QuadBuffers::new(&ctx, &fit) {
        Ok(q) => q,
        Err(e) => {
            swapchain.destroy(d);
            return Err(e).context("quad buffers");
        }
    };

    let mut automaton = match Automaton::new(&ctx, settings.grid, shader_dir) {
        Ok(a) => a,
        Err(e) => {
            quad.destroy(d);
            swapchain.destroy(d);
            return Err(e).context("step pipeline");
        }
    };

    let images = automaton.images();
    let views = [images.get(0).view, images.get(1).view];
    let presenter = Presenter::new(
        &ctx,
        &swapchain,
        views,
        automaton.sampler(),
        settings.grid,
        settings.present,
        shader_dir,
    );
    let mut presenter = match presenter {
        Ok(p) => p,
        Err(e) => {
            automaton.destroy(d);
            quad.destroy(d);
            swapchain.destroy(d);
            return Err(e).context("present pipeline");
        }
    };

    let frame = match FrameSync::new(d, ctx.families.graphics, swapchain.images.len()) {
        Ok(f) => f,
        Err(e) => {
            presenter.destroy(d);
            automaton.destroy(d);
            quad.destroy(d);
            swapchain.destroy(d);
            return Err(e).context("frame sync");
        }
    };

    let mut r = VkRenderer {
        ctx,
        swapchain,
        quad,
        automaton,
        presenter,
        frame,
        clear: settings.clear_color,
    };
    r.automaton.seed(&r.ctx, seed).context("initial seed")?;
    Ok(r)
}

impl VkRenderer {
    pub fn device_name(&self) -> &str {
        &self.ctx.name
    }

    /// `None` when the swapchain no longer matches the surface.
    unsafe fn acquire(&mut self) -> Result<Option<u32>> {
        let acquired = self.swapchain.loader.acquire_next_image(
            self.swapchain.handle,
            u64::MAX,
            self.frame.image_available,
            vk::Fence::null(),
        );
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("swapchain suboptimal");
                }
                self.frame.phase.advance(FramePhase::Acquired)?;
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date; frame dropped");
                Ok(None)
            }
            Err(result) => Err(GpuError::Vk {
                step: "acquire_next_image",
                result,
            }
            .into()),
        }
    }

    /// Step pass (when ticking) then present pass. Returns the pending tick
    /// and whether the frame had to be dropped.
    unsafe fn record(
        &mut self,
        image_index: u32,
        tick: bool,
        view: [[f32; 4]; 4],
    ) -> Result<(Option<PendingTick>, bool)> {
        let d = &self.ctx.device;
        let cmd = self.frame.cmd;
        let img = image_index as usize;

        self.presenter.update_view(d, view)?;
        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .step("reset_command_buffer")?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)
            .step("begin_command_buffer")?;

        let pending = if tick {
            match self.automaton.prepare_tick(d) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("step skipped: {e}");
                    None
                }
            }
        } else {
            None
        };
        if let Some(t) = &pending {
            self.frame.keep(t.framebuffer);
            self.automaton.record_tick(d, cmd, t, &self.quad);
        }

        let mut dropped = false;
        let fb = match self.presenter.prepare(d, self.swapchain.views[img]) {
            Ok(fb) => fb,
            Err(e) => {
                warn!("present framebuffer: {e}; frame dropped");
                dropped = true;
                None
            }
        };
        if let Some(fb) = fb {
            self.frame.keep(fb);
        }

        let source_index = match &pending {
            Some(t) => t.plan.write,
            None => self.automaton.images().current_index(),
        };
        let source = self.automaton.images_mut().get_mut(source_index);
        self.presenter.record(
            d,
            cmd,
            fb,
            self.swapchain.images[img],
            source,
            source_index,
            &self.quad,
            view,
            self.clear,
        );

        d.end_command_buffer(cmd).step("end_command_buffer")?;
        self.frame.phase.advance(FramePhase::Recorded)?;
        Ok((pending, dropped))
    }

    // STRICT PER-FRAME ORDER:
    // 1) acquire_next_image (signals image_available)
    // 2) record step pass (optional) + present pass
    // 3) queue_submit (waits image_available, signals render_finished[image] + fence)
    // 4) queue_present (waits render_finished[image])
    // 5) fence wait + reset, then destroy this frame's framebuffers
    unsafe fn draw_frame(&mut self, tick: bool, view: [[f32; 4]; 4]) -> Result<FrameReport> {
        let Some(image_index) = self.acquire()? else {
            return Ok(FrameReport {
                ticked: false,
                dropped: true,
            });
        };
        let img = image_index as usize;

        let (pending, mut dropped) = match self.record(image_index, tick, view) {
            Ok(r) => r,
            Err(e) => {
                self.frame.release(&self.ctx.device);
                self.frame.phase = FramePhase::Idle;
                return Err(e);
            }
        };

        let d = &self.ctx.device;
        let wait_stages = [self.presenter.wait_stage()];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.frame.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &self.frame.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.frame.render_finished[img],
            ..Default::default()
        };
        if let Err(result) =
            d.queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&submit), self.frame.in_flight)
        {
            self.frame.release(d);
            self.frame.phase = FramePhase::Idle;
            return Err(GpuError::Vk {
                step: "queue_submit",
                result,
            }
            .into());
        }
        self.frame.phase.advance(FramePhase::Submitted)?;

        // Roles flip only for a step that actually reached the queue.
        let ticked = match &pending {
            Some(t) => self.automaton.commit(t),
            None => false,
        };

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.frame.render_finished[img],
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented = self
            .swapchain
            .loader
            .queue_present(self.ctx.present_queue, &present);
        let present_err = match presented {
            Ok(_) => {
                self.frame.phase.advance(FramePhase::Presented)?;
                None
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date at present; frame dropped");
                dropped = true;
                None
            }
            Err(result) => Some(GpuError::Vk {
                step: "queue_present",
                result,
            }),
        };

        self.frame.wait_and_release(d)?;
        if let Some(e) = present_err {
            return Err(e.into());
        }
        Ok(FrameReport { ticked, dropped })
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        seed: &CellGrid,
    ) -> Result<Self> {
        let r = unsafe { build_renderer(window, display, size, settings, seed)? };
        info!(
            "vulkan ready on {} ({}x{}, fmt {:?}, {:?} present)",
            r.ctx.name,
            r.swapchain.extent.width,
            r.swapchain.extent.height,
            r.swapchain.format,
            r.presenter.strategy()
        );
        Ok(r)
    }

    fn render(&mut self, tick: bool, view: [[f32; 4]; 4]) -> Result<FrameReport> {
        unsafe { self.draw_frame(tick, view) }
    }

    fn reseed(&mut self, grid: &CellGrid) -> Result<()> {
        debug_assert!(!self.frame.phase.in_flight());
        unsafe { self.automaton.seed(&self.ctx, grid) }.context("reseed")?;
        info!("reseeded with {} live cells", grid.live_count());
        Ok(())
    }
}

/// The step pipeline on a surfaceless device, one blocking submission per tick.
pub struct Simulation {
    ctx: GpuContext,
    quad: QuadBuffers,
    automaton: Automaton,
}

impl Drop for Simulation {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();
            self.automaton.destroy(d);
            self.quad.destroy(d);
        }
    }
}

impl Simulation {
    pub fn new(seed: &CellGrid, shader_dir: Option<&Path>) -> Result<Self> {
        let ctx = GpuContext::headless().context("headless vulkan device")?;
        let size = seed.size();
        let grid = (size.width, size.height);
        unsafe {
            let mut quad =
                QuadBuffers::new(&ctx, &GridFit::new(grid, grid)).context("quad buffers")?;
            let automaton = match Automaton::new(&ctx, grid, shader_dir) {
                Ok(a) => a,
                Err(e) => {
                    quad.destroy(&ctx.device);
                    return Err(e).context("step pipeline");
                }
            };
            let mut sim = Simulation {
                ctx,
                quad,
                automaton,
            };
            sim.seed(seed)?;
            Ok(sim)
        }
    }

    pub fn device_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn seed(&mut self, grid: &CellGrid) -> Result<()> {
        unsafe { self.automaton.seed(&self.ctx, grid) }.context("seed")
    }

    pub fn step(&mut self, ticks: u32) -> Result<()> {
        for _ in 0..ticks {
            unsafe { self.automaton.step_blocking(&self.ctx, &self.quad) }.context("step")?;
        }
        Ok(())
    }

    pub fn read(&mut self) -> Result<CellGrid> {
        unsafe { self.automaton.read(&self.ctx) }.context("readback")
    }
}
