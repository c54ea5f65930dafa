// SPDX-License-Identifier: CEPL-1.0
//! Shader loading, render passes and fixed-function graphics pipelines.

use std::io::Cursor;
use std::path::Path;

use ash::util::read_spv;
use ash::vk;
use tracing::info;

use crate::error::{GpuError, VkResultExt};
use crate::geometry::Vertex;

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// One of the four built-in stages, named by its SPIR-V file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    StepVert,
    StepFrag,
    PresentVert,
    PresentFrag,
}

impl Stage {
    pub fn file_name(self) -> &'static str {
        match self {
            Stage::StepVert => "step.vert.spv",
            Stage::StepFrag => "step.frag.spv",
            Stage::PresentVert => "present.vert.spv",
            Stage::PresentFrag => "present.frag.spv",
        }
    }

    fn embedded(self) -> &'static [u8] {
        match self {
            Stage::StepVert => include_bytes!(concat!(env!("OUT_DIR"), "/step.vert.spv")),
            Stage::StepFrag => include_bytes!(concat!(env!("OUT_DIR"), "/step.frag.spv")),
            Stage::PresentVert => include_bytes!(concat!(env!("OUT_DIR"), "/present.vert.spv")),
            Stage::PresentFrag => include_bytes!(concat!(env!("OUT_DIR"), "/present.frag.spv")),
        }
    }
}

/// SPIR-V words for `stage`, from `dir` when given, otherwise the built-in copy.
pub fn load_shader(dir: Option<&Path>, stage: Stage) -> Result<Vec<u32>, GpuError> {
    match dir {
        Some(dir) => {
            let path = dir.join(stage.file_name());
            let bytes = std::fs::read(&path).map_err(|source| GpuError::ShaderLoad {
                path: path.clone(),
                source,
            })?;
            info!("shader {} loaded from {}", stage.file_name(), path.display());
            parse_spirv(stage.file_name(), &bytes)
        }
        None => parse_spirv(stage.file_name(), stage.embedded()),
    }
}

pub fn parse_spirv(name: &str, bytes: &[u8]) -> Result<Vec<u32>, GpuError> {
    read_spv(&mut Cursor::new(bytes)).map_err(|_| GpuError::InvalidShader(name.to_owned()))
}

pub unsafe fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> Result<vk::ShaderModule, GpuError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .step("create_shader_module")
}

/// Single color attachment, cleared on load, left in `final_layout`.
/// The attachment's previous contents are always discarded.
pub unsafe fn create_color_pass(
    device: &ash::Device,
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass, GpuError> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };

    // In: wait for earlier fragment reads / transfers of this image and for
    // the acquire semaphore. Out: writes visible to later sampling or blits.
    let deps = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::TRANSFER,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::TRANSFER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ,
            ..Default::default()
        },
    ];

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: deps.len() as u32,
        p_dependencies: deps.as_ptr(),
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .step("create_render_pass")
}

pub unsafe fn create_set_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout, GpuError> {
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&ci, None)
        .step("create_descriptor_set_layout")
}

pub fn sampler_binding(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    }
}

pub fn uniform_binding(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    }
}

/// Writes `view` + `sampler` into binding `binding` of `set`.
pub unsafe fn write_sampler(
    device: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let info = vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    let write = vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: &info,
        ..Default::default()
    };
    device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
}

/// Pool + `layouts.len()` sets allocated from it.
pub unsafe fn allocate_sets(
    device: &ash::Device,
    sizes: &[vk::DescriptorPoolSize],
    layouts: &[vk::DescriptorSetLayout],
) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>), GpuError> {
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: layouts.len() as u32,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    let pool = device
        .create_descriptor_pool(&pool_ci, None)
        .step("create_descriptor_pool")?;
    let alloc = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    match device.allocate_descriptor_sets(&alloc) {
        Ok(sets) => Ok((pool, sets)),
        Err(result) => {
            device.destroy_descriptor_pool(pool, None);
            Err(GpuError::Vk {
                step: "allocate_descriptor_sets",
                result,
            })
        }
    }
}

/// Single-attachment framebuffer for one frame. Destroyed by the caller once
/// the GPU has finished with it.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer, GpuError> {
    let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: 1,
        p_attachments: &view,
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    device
        .create_framebuffer(&fb_info, None)
        .step("create_framebuffer")
}

pub unsafe fn begin_pass(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear: [f32; 4],
) {
    let clears = [vk::ClearValue {
        color: vk::ClearColorValue { float32: clear },
    }];
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass,
        framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
}

/// Everything a graphics pipeline is built from.
pub struct PipelineDesc<'a> {
    pub vert: &'a [u32],
    pub frag: &'a [u32],
    pub render_pass: vk::RenderPass,
    pub set_layout: vk::DescriptorSetLayout,
    pub extent: vk::Extent2D,
}

/// Layout + pipeline with a fixed viewport and scissor covering `extent`.
/// Blending is off; the fragment stage owns every written texel.
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
) -> Result<(vk::PipelineLayout, vk::Pipeline), GpuError> {
    let vs = create_shader_module(device, desc.vert)?;
    let fs = match create_shader_module(device, desc.frag) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let res = build_pipeline(device, desc, vs, fs);

    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    res
}

unsafe fn build_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<(vk::PipelineLayout, vk::Pipeline), GpuError> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
    ];

    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::size_of::<[f32; 3]>() as u32,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: desc.extent.width as f32,
        height: desc.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: desc.extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &desc.set_layout,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .step("create_pipeline_layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass: desc.render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => Ok((layout, p[0])),
        Err((_, result)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(GpuError::Vk {
                step: "create_graphics_pipelines",
                result,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shaders_are_spirv() {
        for s in [
            Stage::StepVert,
            Stage::StepFrag,
            Stage::PresentVert,
            Stage::PresentFrag,
        ] {
            let words = load_shader(None, s).unwrap();
            assert_eq!(words[0], 0x0723_0203, "{}", s.file_name());
        }
    }

    #[test]
    fn garbage_is_rejected() {
        let e = parse_spirv("bad.spv", &[1, 2, 3]).unwrap_err();
        assert!(matches!(e, GpuError::InvalidShader(ref n) if n == "bad.spv"));
    }

    #[test]
    fn missing_dir_reports_path() {
        let dir = std::env::temp_dir().join("lifegrid-no-such-shader-dir");
        let e = load_shader(Some(&dir), Stage::StepFrag).unwrap_err();
        match e {
            GpuError::ShaderLoad { path, .. } => assert!(path.ends_with("step.frag.spv")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
