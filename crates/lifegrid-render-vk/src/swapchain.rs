// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use lifegrid_render::RenderSize;
use tracing::info;

use crate::context::GpuContext;
use crate::error::{GpuError, VkResultExt};
use crate::image::COLOR_RANGE;

/// Known-good 8-bit BGRA if offered, otherwise whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub struct Swapchain {
    pub loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// `extra_usage` is requested only where the surface supports it.
    pub unsafe fn new(
        ctx: &GpuContext,
        want: RenderSize,
        extra_usage: vk::ImageUsageFlags,
    ) -> Result<Self, GpuError> {
        let surf = ctx.surface().ok_or(GpuError::Window("no surface".into()))?;
        let caps = surf
            .loader
            .get_physical_device_surface_capabilities(ctx.phys, surf.handle)
            .step("get_physical_device_surface_capabilities")?;
        let formats = surf
            .loader
            .get_physical_device_surface_formats(ctx.phys, surf.handle)
            .step("get_physical_device_surface_formats")?;
        let modes = surf
            .loader
            .get_physical_device_surface_present_modes(ctx.phys, surf.handle)
            .step("get_physical_device_surface_present_modes")?;

        let surf_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes);
        let extent = extent_from_caps(&caps, want);
        let min_count = image_count(&caps);
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | (extra_usage & caps.supported_usage_flags);

        let families = [ctx.families.graphics, ctx.families.present];
        let (sharing_mode, family_count) = if families[0] == families[1] {
            (vk::SharingMode::EXCLUSIVE, 0)
        } else {
            (vk::SharingMode::CONCURRENT, 2)
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surf.handle,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: usage,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let loader = swapchain::Device::new(&ctx.instance, &ctx.device);
        let handle = loader
            .create_swapchain(&swap_info, None)
            .step("create_swapchain")?;
        let mut sc = Swapchain {
            loader,
            handle,
            format: surf_format.format,
            extent,
            usage,
            images: Vec::new(),
            views: Vec::new(),
        };

        match sc.loader.get_swapchain_images(handle).step("get_swapchain_images") {
            Ok(images) => sc.images = images,
            Err(e) => {
                sc.destroy(&ctx.device);
                return Err(e);
            }
        }
        for &img in &sc.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: sc.format,
                subresource_range: COLOR_RANGE,
                ..Default::default()
            };
            match ctx.device.create_image_view(&iv_info, None).step("create_image_view") {
                Ok(v) => sc.views.push(v),
                Err(e) => {
                    sc.destroy(&ctx.device);
                    return Err(e);
                }
            }
        }

        info!(
            "swapchain {}x{}, {:?}/{:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surf_format.format,
            surf_format.color_space,
            present_mode,
            sc.images.len()
        );
        Ok(sc)
    }

    /// Views before the swapchain. Idempotent.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for iv in self.views.drain(..) {
            device.destroy_image_view(iv, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_bgra_unorm() {
        let f = choose_surface_format(&[
            fmt(vk::Format::R8G8B8A8_SRGB),
            fmt(vk::Format::B8G8R8A8_UNORM),
        ]);
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn otherwise_first_offered() {
        let f = choose_surface_format(&[
            fmt(vk::Format::R8G8B8A8_SRGB),
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32),
        ]);
        assert_eq!(f.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(choose_surface_format(&[]).format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn present_mode_policy() {
        let m = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&m), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_and_count_from_caps() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1000,
                height: 1000,
            },
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        let e = extent_from_caps(
            &caps,
            RenderSize {
                width: 1920,
                height: 600,
            },
        );
        assert_eq!((e.width, e.height), (1000, 600));
        assert_eq!(image_count(&caps), 2);
        caps.max_image_count = 0;
        assert_eq!(image_count(&caps), 3);
    }
}
