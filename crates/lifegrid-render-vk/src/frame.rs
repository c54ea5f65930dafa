// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lifegrid_render::FramePhase;
use tracing::warn;

use crate::error::{GpuError, VkResultExt};

/// Per-frame synchronization and recording state. One frame in flight.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    /// One per swapchain image; presentation of image `i` waits on `render_finished[i]`.
    pub render_finished: Vec<vk::Semaphore>,
    pub in_flight: vk::Fence,
    pub pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
    pub phase: FramePhase,
    /// Framebuffers recorded into the frame in flight.
    transient: Vec<vk::Framebuffer>,
}

impl FrameSync {
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        image_count: usize,
    ) -> Result<Self, GpuError> {
        let mut sync = FrameSync {
            image_available: vk::Semaphore::null(),
            render_finished: Vec::with_capacity(image_count),
            in_flight: vk::Fence::null(),
            pool: vk::CommandPool::null(),
            cmd: vk::CommandBuffer::null(),
            phase: FramePhase::Idle,
            transient: Vec::new(),
        };
        if let Err(e) = sync.create(device, queue_family, image_count) {
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    unsafe fn create(
        &mut self,
        device: &ash::Device,
        queue_family: u32,
        image_count: usize,
    ) -> Result<(), GpuError> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        self.image_available = device
            .create_semaphore(&sem_ci, None)
            .step("create_semaphore")?;
        for _ in 0..image_count {
            let rf = device
                .create_semaphore(&sem_ci, None)
                .step("create_semaphore")?;
            self.render_finished.push(rf);
        }

        // Unsignaled: the frame loop waits on it only after a submit.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            ..Default::default()
        };
        self.in_flight = device.create_fence(&fence_ci, None).step("create_fence")?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        self.pool = device
            .create_command_pool(&pool_info, None)
            .step("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        self.cmd = device
            .allocate_command_buffers(&alloc_info)
            .step("allocate_command_buffers")?[0];
        Ok(())
    }

    /// Keeps `fb` alive until the frame's fence has signaled.
    pub fn keep(&mut self, fb: vk::Framebuffer) {
        self.transient.push(fb);
    }

    /// Destroys the frame's framebuffers. Only valid when the GPU cannot be
    /// using them: after the fence wait, or when nothing was submitted.
    pub unsafe fn release(&mut self, device: &ash::Device) {
        for fb in self.transient.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
    }

    /// Blocks on the frame fence, resets it and releases the frame's framebuffers.
    pub unsafe fn wait_and_release(&mut self, device: &ash::Device) -> Result<(), GpuError> {
        device
            .wait_for_fences(&[self.in_flight], true, u64::MAX)
            .step("wait_for_fences")?;
        device
            .reset_fences(&[self.in_flight])
            .step("reset_fences")?;
        self.release(device);
        if let Err(e) = self.phase.advance(FramePhase::Idle) {
            warn!("{e}");
            self.phase = FramePhase::Idle;
        }
        Ok(())
    }

    /// Idempotent. The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.release(device);
        if self.pool != vk::CommandPool::null() {
            if self.cmd != vk::CommandBuffer::null() {
                device.free_command_buffers(self.pool, &[self.cmd]);
                self.cmd = vk::CommandBuffer::null();
            }
            device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
        if self.in_flight != vk::Fence::null() {
            device.destroy_fence(self.in_flight, None);
            self.in_flight = vk::Fence::null();
        }
        for s in self.render_finished.drain(..) {
            device.destroy_semaphore(s, None);
        }
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available, None);
            self.image_available = vk::Semaphore::null();
        }
    }
}
