// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bytemuck::Pod;

use crate::context::GpuContext;
use crate::error::{GpuError, VkResultExt};

/// Lowest-indexed memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, GpuError> {
    for i in 0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32) {
        let ok = (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required);
        if ok {
            return Ok(i);
        }
    }
    Err(GpuError::NoMatchingMemoryType {
        type_bits,
        required,
    })
}

/// Allocates exactly `req.size` bytes of a qualifying type.
pub(crate) unsafe fn allocate(
    ctx: &GpuContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<(vk::DeviceMemory, u32), GpuError> {
    let mem_type = find_memory_type(&ctx.memory, req.memory_type_bits, props)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
    };
    let mem = ctx.device.allocate_memory(&mai, None).step("allocate_memory")?;
    Ok((mem, mem_type))
}

/// A buffer bound 1:1 to its own allocation.
#[derive(Debug)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Driver-reported allocation size, which may exceed the requested size.
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub props: vk::MemoryPropertyFlags,
    pub mem_type: u32,
}

impl Buffer {
    pub unsafe fn new(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, GpuError> {
        let d = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = d.create_buffer(&bci, None).step("create_buffer")?;
        let req = d.get_buffer_memory_requirements(handle);
        let (memory, mem_type) = match allocate(ctx, req, props) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_buffer(handle, None);
                return Err(e);
            }
        };
        if let Err(e) = d.bind_buffer_memory(handle, memory, 0).step("bind_buffer_memory") {
            d.destroy_buffer(handle, None);
            d.free_memory(memory, None);
            return Err(e);
        }
        Ok(Buffer {
            handle,
            memory,
            size: req.size,
            usage,
            props,
            mem_type,
        })
    }

    pub unsafe fn host_visible(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, GpuError> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Copies `data` to the start of a host-visible, coherent buffer.
    pub unsafe fn write<T: Pod>(&self, device: &ash::Device, data: &[T]) -> Result<(), GpuError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        let ptr = device
            .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
            .step("map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    /// Reads `count` words from the start of a host-visible, coherent buffer.
    pub unsafe fn read_u32s(&self, device: &ash::Device, count: usize) -> Result<Vec<u32>, GpuError> {
        let len = (count * 4) as vk::DeviceSize;
        let ptr = device
            .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
            .step("map_memory")?;
        let mut out = vec![0u32; count];
        std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr() as *mut u8, count * 4);
        device.unmap_memory(self.memory);
        Ok(out)
    }

    /// Idempotent.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.handle != vk::Buffer::null() {
            device.destroy_buffer(self.handle, None);
            self.handle = vk::Buffer::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: f,
                heap_index: 0,
            };
        }
        p
    }

    const LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_lowest_qualifying_index() {
        let t = table(&[LOCAL, HOST, HOST | LOCAL, HOST]);
        assert_eq!(find_memory_type(&t, 0b1111, HOST).unwrap(), 1);
        assert_eq!(find_memory_type(&t, 0b1100, HOST).unwrap(), 2);
        assert_eq!(find_memory_type(&t, 0b1111, LOCAL).unwrap(), 0);
        for _ in 0..3 {
            assert_eq!(find_memory_type(&t, 0b1010, HOST).unwrap(), 1);
        }
    }

    #[test]
    fn superset_is_enough() {
        let t = table(&[HOST | LOCAL]);
        assert_eq!(
            find_memory_type(&t, 1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            0
        );
    }

    #[test]
    fn no_silent_substitute() {
        let t = table(&[LOCAL, HOST]);
        let e = find_memory_type(&t, 0b01, HOST).unwrap_err();
        assert!(matches!(
            e,
            GpuError::NoMatchingMemoryType { type_bits: 0b01, .. }
        ));
        assert!(find_memory_type(&t, 0b100, LOCAL).is_err());
    }
}
