// SPDX-License-Identifier: CEPL-1.0
//! Instance, adapter selection and the logical device.

use std::cmp::Reverse;
use std::ffi::{c_char, CStr};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use crate::error::{GpuError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"lifegrid";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// What selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub name: String,
    pub kind: vk::PhysicalDeviceType,
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    /// All required device extensions are exposed.
    pub extensions: bool,
    /// At least one surface format and one present mode.
    pub surface_support: bool,
}

fn type_score(kind: vk::PhysicalDeviceType) -> u32 {
    match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Index of the best qualifying candidate. Discrete adapters win; ties go to
/// enumeration order.
pub fn rank_candidates(cands: &[Candidate], need_present: bool) -> Option<usize> {
    cands
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.graphics.is_some()
                && c.extensions
                && (!need_present || (c.present.is_some() && c.surface_support))
        })
        .max_by_key(|(i, c)| (type_score(c.kind), Reverse(*i)))
        .map(|(i, _)| i)
}

/// Picks graphics and present families, preferring one family that does both.
pub fn pick_families(families: &[(vk::QueueFlags, bool)]) -> (Option<u32>, Option<u32>) {
    let graphics = |f: &vk::QueueFlags| f.contains(vk::QueueFlags::GRAPHICS);
    if let Some(i) = families.iter().position(|(f, p)| graphics(f) && *p) {
        return (Some(i as u32), Some(i as u32));
    }
    (
        families.iter().position(|(f, _)| graphics(f)).map(|i| i as u32),
        families.iter().position(|(_, p)| *p).map(|i| i as u32),
    )
}

pub(crate) struct SurfaceParts {
    pub loader: surface::Instance,
    pub handle: vk::SurfaceKHR,
}

/// Owns everything device-scoped resources hang off. Dropped last.
pub struct GpuContext {
    _entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<SurfaceParts>,

    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub name: String,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn validation_available(entry: &Entry) -> bool {
    if !cfg!(debug_assertions) {
        return false;
    }
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if !found {
        info!("validation layer not installed; running without it");
    }
    found
}

unsafe fn create_instance(
    entry: &Entry,
    display: Option<RawDisplayHandle>,
    validation: bool,
) -> Result<Instance, GpuError> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts: Vec<*const c_char> = match display {
        Some(dh) => ash_window::enumerate_required_extensions(dh)
            .step("enumerate_required_extensions")?
            .to_vec(),
        None => Vec::new(),
    };
    if validation {
        exts.push(debug_utils::NAME.as_ptr());
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    entry.create_instance(&create_info, None).step("create_instance")
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT), GpuError> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .step("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

fn required_device_extensions(windowed: bool) -> Vec<&'static CStr> {
    if windowed {
        vec![swapchain::NAME]
    } else {
        Vec::new()
    }
}

unsafe fn describe(
    instance: &Instance,
    surface: Option<&SurfaceParts>,
    phys: vk::PhysicalDevice,
) -> Candidate {
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let families: Vec<(vk::QueueFlags, bool)> = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let present = surface.is_some_and(|s| {
                s.loader
                    .get_physical_device_surface_support(phys, i as u32, s.handle)
                    .unwrap_or(false)
            });
            (q.queue_flags, present)
        })
        .collect();
    let (graphics, present) = pick_families(&families);

    let available = instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default();
    let extensions = required_device_extensions(surface.is_some())
        .iter()
        .all(|need| {
            available
                .iter()
                .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == *need)
        });

    let surface_support = match surface {
        Some(s) => {
            let formats = s
                .loader
                .get_physical_device_surface_formats(phys, s.handle)
                .unwrap_or_default();
            let modes = s
                .loader
                .get_physical_device_surface_present_modes(phys, s.handle)
                .unwrap_or_default();
            !formats.is_empty() && !modes.is_empty()
        }
        None => true,
    };

    Candidate {
        name,
        kind: props.device_type,
        graphics,
        present,
        extensions,
        surface_support,
    }
}

unsafe fn select_device(
    instance: &Instance,
    surface: Option<&SurfaceParts>,
) -> Result<(vk::PhysicalDevice, QueueFamilies, String), GpuError> {
    let physicals = instance
        .enumerate_physical_devices()
        .step("enumerate_physical_devices")?;

    let cands: Vec<Candidate> = physicals
        .iter()
        .map(|&p| describe(instance, surface, p))
        .collect();
    for c in &cands {
        debug!(?c, "adapter candidate");
    }

    let idx = rank_candidates(&cands, surface.is_some()).ok_or(GpuError::NoSuitableDevice)?;
    let c = &cands[idx];
    let graphics = c.graphics.ok_or(GpuError::NoSuitableDevice)?;
    let families = QueueFamilies {
        graphics,
        present: c.present.unwrap_or(graphics),
    };
    info!(
        "adapter: {} ({:?}), graphics family {}, present family {}",
        c.name, c.kind, families.graphics, families.present
    );
    Ok((physicals[idx], families, c.name.clone()))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    windowed: bool,
) -> Result<ash::Device, GpuError> {
    let priorities = [1.0_f32];
    let mut unique = vec![families.graphics];
    if families.present != families.graphics {
        unique.push(families.present);
    }
    let qinfos: Vec<vk::DeviceQueueCreateInfo> = unique
        .iter()
        .map(|&f| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: f,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let exts: Vec<*const c_char> = required_device_extensions(windowed)
        .iter()
        .map(|e| e.as_ptr())
        .collect();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .step("create_device")
}

impl GpuContext {
    /// Device able to render and present to `window`.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self, GpuError> {
        let dh = display
            .display_handle()
            .map_err(|e| GpuError::Window(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| GpuError::Window(e.to_string()))?
            .as_raw();
        unsafe { Self::build(Some((dh, wh))) }
    }

    /// Device without a surface, for offscreen simulation.
    pub fn headless() -> Result<Self, GpuError> {
        unsafe { Self::build(None) }
    }

    // STRICT ORDER:
    // 1) Instance (WSI + optional debug extension)
    // 2) Surface from THIS instance
    // 3) Adapter + queue families checked AGAINST this surface
    // 4) Device
    unsafe fn build(handles: Option<(RawDisplayHandle, RawWindowHandle)>) -> Result<Self, GpuError> {
        let entry = Entry::linked();
        let validation = validation_available(&entry);
        let instance = create_instance(&entry, handles.map(|(dh, _)| dh), validation)?;

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface = match handles {
            Some((dh, wh)) => match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(handle) => Some(SurfaceParts {
                    loader: surface::Instance::new(&entry, &instance),
                    handle,
                }),
                Err(result) => {
                    destroy_early(&instance, debug, None);
                    return Err(GpuError::Vk {
                        step: "create_surface",
                        result,
                    });
                }
            },
            None => None,
        };

        let picked = select_device(&instance, surface.as_ref()).and_then(|(phys, fam, name)| {
            create_device(&instance, phys, fam, surface.is_some()).map(|d| (phys, fam, name, d))
        });
        let (phys, families, name, device) = match picked {
            Ok(p) => p,
            Err(e) => {
                destroy_early(&instance, debug, surface);
                return Err(e);
            }
        };

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        let memory = instance.get_physical_device_memory_properties(phys);

        Ok(GpuContext {
            _entry: entry,
            instance,
            debug,
            surface,
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
            memory,
            name,
        })
    }

    pub(crate) fn surface(&self) -> Option<&SurfaceParts> {
        self.surface.as_ref()
    }

    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
                .optimal_tiling_features
        }
    }
}

unsafe fn destroy_early(
    instance: &Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<SurfaceParts>,
) {
    if let Some(s) = surface {
        s.loader.destroy_surface(s.handle, None);
    }
    if let Some((loader, m)) = debug {
        loader.destroy_debug_utils_messenger(m, None);
    }
    instance.destroy_instance(None);
}

// Device, then surface, then messenger, instance last. Everything created
// from the device must already be gone.
impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            destroy_early(&self.instance, self.debug.take(), self.surface.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(kind: vk::PhysicalDeviceType) -> Candidate {
        Candidate {
            name: format!("{kind:?}"),
            kind,
            graphics: Some(0),
            present: Some(0),
            extensions: true,
            surface_support: true,
        }
    }

    #[test]
    fn discrete_preferred() {
        let cands = [
            cand(vk::PhysicalDeviceType::INTEGRATED_GPU),
            cand(vk::PhysicalDeviceType::DISCRETE_GPU),
            cand(vk::PhysicalDeviceType::CPU),
        ];
        assert_eq!(rank_candidates(&cands, true), Some(1));
    }

    #[test]
    fn falls_back_to_other_types() {
        let mut discrete = cand(vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.extensions = false;
        let cands = [discrete, cand(vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(rank_candidates(&cands, true), Some(1));
    }

    #[test]
    fn present_required_only_with_surface() {
        let mut c = cand(vk::PhysicalDeviceType::DISCRETE_GPU);
        c.present = None;
        c.surface_support = false;
        assert_eq!(rank_candidates(&[c.clone()], true), None);
        assert_eq!(rank_candidates(&[c], false), Some(0));
    }

    #[test]
    fn first_of_equals_wins() {
        let cands = [
            cand(vk::PhysicalDeviceType::DISCRETE_GPU),
            cand(vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(rank_candidates(&cands, true), Some(0));
        assert_eq!(rank_candidates(&[], false), None);
    }

    #[test]
    fn shared_family_preferred() {
        let g = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
        let t = vk::QueueFlags::TRANSFER;
        assert_eq!(pick_families(&[(g, false), (t, true), (g, true)]), (Some(2), Some(2)));
        assert_eq!(pick_families(&[(g, false), (t, true)]), (Some(0), Some(1)));
        assert_eq!(pick_families(&[(t, false)]), (None, None));
    }
}
