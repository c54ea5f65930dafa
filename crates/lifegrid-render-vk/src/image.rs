// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::context::GpuContext;
use crate::error::{GpuError, VkResultExt};
use crate::memory::allocate;

/// Format of the automaton images. The red channel carries the cell state.
pub const GRID_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub const GRID_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

pub(crate) const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub(crate) const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

/// Access and stage that must complete before leaving, or wait before entering, `layout`.
pub fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Records a full-image layout barrier on `image` from `old` to `new`.
pub unsafe fn record_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let (src_access, src_stage) = layout_access(old);
    let (dst_access, dst_stage) = layout_access(new);
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

/// Device-local 2D color image with its view and tracked layout.
#[derive(Debug)]
pub struct Image2D {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    layout: vk::ImageLayout,
}

impl Image2D {
    pub unsafe fn new(
        ctx: &GpuContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, GpuError> {
        let d = &ctx.device;
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = d.create_image(&ici, None).step("create_image")?;
        let req = d.get_image_memory_requirements(image);
        let mut out = Image2D {
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
            extent,
            usage,
            layout: vk::ImageLayout::UNDEFINED,
        };

        match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok((mem, _)) => out.memory = mem,
            Err(e) => {
                out.destroy(d);
                return Err(e);
            }
        }
        if let Err(e) = d.bind_image_memory(image, out.memory, 0).step("bind_image_memory") {
            out.destroy(d);
            return Err(e);
        }

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        match d.create_image_view(&view_ci, None).step("create_image_view") {
            Ok(v) => out.view = v,
            Err(e) => {
                out.destroy(d);
                return Err(e);
            }
        }
        Ok(out)
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Records the layout a render pass left the image in.
    pub fn assume_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Next transition discards the current contents.
    pub fn discard(&mut self) {
        self.layout = vk::ImageLayout::UNDEFINED;
    }

    pub unsafe fn record_transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new: vk::ImageLayout,
    ) {
        if self.layout == new {
            return;
        }
        record_barrier(device, cmd, self.image, self.layout, new);
        self.layout = new;
    }

    /// View destroyed before the image, memory last. Idempotent.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
            self.view = vk::ImageView::null();
        }
        if self.image != vk::Image::null() {
            device.destroy_image(self.image, None);
            self.image = vk::Image::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
    }
}

/// Nearest filtering; reads outside the image return opaque black.
pub unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler, GpuError> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
        border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    };
    device.create_sampler(&ci, None).step("create_sampler")
}

#[cfg(test)]
impl Image2D {
    /// Handle-less image for layout bookkeeping tests.
    pub(crate) fn unbound(extent: vk::Extent2D) -> Self {
        Image2D {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format: GRID_FORMAT,
            extent,
            usage: GRID_USAGE,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_usage_covers_every_role() {
        for u in [
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::ImageUsageFlags::SAMPLED,
            vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageUsageFlags::TRANSFER_DST,
        ] {
            assert!(GRID_USAGE.contains(u));
        }
    }

    #[test]
    fn seed_transitions_order_transfer_before_shader() {
        let (_, undefined) = layout_access(vk::ImageLayout::UNDEFINED);
        let (write, copy) = layout_access(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let (read, shader) = layout_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(undefined, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(write, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(copy, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(read, vk::AccessFlags::SHADER_READ);
        assert_eq!(shader, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn present_layout_has_no_access() {
        let (a, _) = layout_access(vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(a.is_empty());
    }
}
