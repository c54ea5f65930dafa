// SPDX-License-Identifier: CEPL-1.0
//! Blocking one-shot submissions: geometry upload, seeding and readback.

use ash::vk;
use tracing::debug;

use crate::context::GpuContext;
use crate::error::{GpuError, VkResultExt};
use crate::image::{Image2D, COLOR_LAYERS};
use crate::memory::Buffer;

/// Records `record` into a fresh command buffer, submits it on the graphics
/// queue and blocks on a dedicated fence. Pool, buffer and fence are gone on return.
pub unsafe fn one_shot<F>(ctx: &GpuContext, record: F) -> Result<(), GpuError>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let d = &ctx.device;
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: ctx.families.graphics,
        flags: vk::CommandPoolCreateFlags::TRANSIENT,
        ..Default::default()
    };
    let pool = d.create_command_pool(&pool_info, None).step("create_command_pool")?;
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        ..Default::default()
    };
    let fence = match d.create_fence(&fence_ci, None).step("create_fence") {
        Ok(f) => f,
        Err(e) => {
            d.destroy_command_pool(pool, None);
            return Err(e);
        }
    };

    let res = submit_and_wait(d, ctx.graphics_queue, pool, fence, record);

    // Freed with the pool.
    d.destroy_fence(fence, None);
    d.destroy_command_pool(pool, None);
    res
}

unsafe fn submit_and_wait<F>(
    d: &ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    fence: vk::Fence,
    record: F,
) -> Result<(), GpuError>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = d.allocate_command_buffers(&ai).step("allocate_command_buffers")?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    d.begin_command_buffer(cmd, &bi).step("begin_command_buffer")?;
    record(d, cmd);
    d.end_command_buffer(cmd).step("end_command_buffer")?;

    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    d.queue_submit(queue, std::slice::from_ref(&si), fence)
        .step("queue_submit")?;
    d.wait_for_fences(&[fence], true, u64::MAX)
        .step("wait_for_fences")
}

/// Host bytes -> staging buffer -> device-local `dst`.
pub unsafe fn upload_via_staging(
    ctx: &GpuContext,
    dst: &Buffer,
    src_data: &[u8],
) -> Result<(), GpuError> {
    let size = src_data.len() as vk::DeviceSize;
    let mut staging = Buffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    let res = staging.write(&ctx.device, src_data).and_then(|_| {
        one_shot(ctx, |d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            d.cmd_copy_buffer(cmd, staging.handle, dst.handle, std::slice::from_ref(&region));
        })
    });
    staging.destroy(&ctx.device);
    res
}

/// Overwrites `image` with row-major RGBA8 `texels` and leaves it shader-readable.
/// Previous contents are discarded.
pub unsafe fn seed_image(
    ctx: &GpuContext,
    image: &mut Image2D,
    texels: &[u32],
) -> Result<(), GpuError> {
    let expected = image.extent.width as usize * image.extent.height as usize;
    if texels.len() != expected {
        return Err(GpuError::SizeMismatch {
            expected,
            got: texels.len(),
        });
    }

    let size = (expected * 4) as vk::DeviceSize;
    let mut staging = Buffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    let res = staging.write(&ctx.device, texels).and_then(|_| {
        rollback_layout_on_error(image, |image| one_shot(ctx, |d, cmd| {
            image.discard();
            image.record_transition(d, cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            let region = buffer_image_region(image.extent);
            d.cmd_copy_buffer_to_image(
                cmd,
                staging.handle,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            image.record_transition(d, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }))
    });
    staging.destroy(&ctx.device);
    if res.is_ok() {
        debug!(
            "seeded {}x{} image ({} bytes)",
            image.extent.width, image.extent.height, size
        );
    }
    res
}

/// Copies `image` back to the host as row-major RGBA8 words.
/// The image is returned to its previous layout.
pub unsafe fn read_image(ctx: &GpuContext, image: &mut Image2D) -> Result<Vec<u32>, GpuError> {
    let count = image.extent.width as usize * image.extent.height as usize;
    let size = (count * 4) as vk::DeviceSize;
    let mut readback = Buffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_DST)?;
    let restore = match image.layout() {
        vk::ImageLayout::UNDEFINED => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        l => l,
    };

    let res = rollback_layout_on_error(image, |image| one_shot(ctx, |d, cmd| {
        image.record_transition(d, cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let region = buffer_image_region(image.extent);
        d.cmd_copy_image_to_buffer(
            cmd,
            image.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            readback.handle,
            std::slice::from_ref(&region),
        );
        let host = vk::BufferMemoryBarrier {
            s_type: vk::StructureType::BUFFER_MEMORY_BARRIER,
            src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
            dst_access_mask: vk::AccessFlags::HOST_READ,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: readback.handle,
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        };
        d.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[],
            std::slice::from_ref(&host),
            &[],
        );
        image.record_transition(d, cmd, restore);
    }))
    .and_then(|_| readback.read_u32s(&ctx.device, count));

    readback.destroy(&ctx.device);
    res
}

/// Recording moves the tracked layout ahead of the GPU; when the submission
/// fails the image is still in the layout it had before.
fn rollback_layout_on_error<T>(
    image: &mut Image2D,
    submit: impl FnOnce(&mut Image2D) -> Result<T, GpuError>,
) -> Result<T, GpuError> {
    let before = image.layout();
    let res = submit(image);
    if res.is_err() {
        image.assume_layout(before);
    }
    res
}

fn buffer_image_region(extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: COLOR_LAYERS,
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader_readable() -> Image2D {
        let mut img = Image2D::unbound(vk::Extent2D {
            width: 4,
            height: 4,
        });
        img.assume_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        img
    }

    #[test]
    fn failed_submission_keeps_previous_layout() {
        let mut img = shader_readable();
        let res: Result<(), GpuError> = rollback_layout_on_error(&mut img, |img| {
            img.discard();
            img.assume_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            Err(GpuError::Vk {
                step: "queue_submit",
                result: vk::Result::ERROR_DEVICE_LOST,
            })
        });
        assert!(res.is_err());
        assert_eq!(img.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn successful_submission_keeps_recorded_layout() {
        let mut img = shader_readable();
        rollback_layout_on_error(&mut img, |img| {
            img.assume_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            Ok(())
        })
        .unwrap();
        assert_eq!(img.layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }
}
