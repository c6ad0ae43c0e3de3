use slotmap::SlotMap;

use crate::gpu::{
    BufferHandle, BufferUsage, DeviceBackend, DeviceError, DeviceLimits, MemoryHandle,
    MemoryProperties, MemoryRequirements, MemoryType, ShaderModuleHandle,
};
use crate::{rvec, RVec};

#[derive(Debug)]
struct MockBuffer {
    size: u64,
    bound: Option<MemoryHandle>,
}

#[derive(Debug)]
struct MockAllocation {
    bytes: Box<[u8]>,
    mapped: bool,
}

/// Software stand-in for a device backend: buffers are plain host
/// allocations behind slotmap handles. Tracks enough bookkeeping to assert
/// the allocator's lifecycle invariants, and can inject failures into the
/// next create/allocate/map call.
#[derive(Debug)]
pub struct MockDevice {
    limits: DeviceLimits,
    memory_types: RVec<MemoryType>,
    buffers: SlotMap<BufferHandle, MockBuffer>,
    allocations: SlotMap<MemoryHandle, MockAllocation>,
    modules: SlotMap<ShaderModuleHandle, usize>,
    destroyed: Vec<BufferHandle>,

    pub fail_next_buffer: bool,
    pub fail_next_alloc: bool,
    pub fail_next_map: bool,
    ///`Some(n)`: the next `n` allocations succeed, then every one fails.
    pub allocs_until_fail: Option<u32>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_offset_alignment(256)
    }

    pub fn with_offset_alignment(alignment: u64) -> Self {
        Self {
            limits: DeviceLimits {
                max_uniform_buffer_range: 1 << 16,
                min_uniform_buffer_offset_alignment: alignment,
            },
            memory_types: rvec![MemoryType {
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            }],
            buffers: SlotMap::with_key(),
            allocations: SlotMap::with_key(),
            modules: SlotMap::with_key(),
            destroyed: Vec::new(),
            fail_next_buffer: false,
            fail_next_alloc: false,
            fail_next_map: false,
            allocs_until_fail: None,
        }
    }

    ///A device exposing no host-visible memory at all.
    pub fn device_local_only() -> Self {
        let mut device = Self::new();
        device.memory_types = rvec![MemoryType {
            properties: MemoryProperties::DEVICE_LOCAL,
        }];
        device
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn live_modules(&self) -> usize {
        self.modules.len()
    }

    pub fn was_destroyed(&self, buffer: BufferHandle) -> bool {
        self.destroyed.contains(&buffer)
    }

    ///Reads a buffer's content back through its memory binding.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> &[u8] {
        let buffer = &self.buffers[buffer];
        let memory = buffer.bound.expect("buffer has no bound memory");
        &self.allocations[memory].bytes[..buffer.size as usize]
    }
}

impl DeviceBackend for MockDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: BufferUsage,
    ) -> Result<BufferHandle, DeviceError> {
        if std::mem::take(&mut self.fail_next_buffer) {
            return Err(DeviceError::ResourceCreationFailed("buffer"));
        }
        Ok(self.buffers.insert(MockBuffer { size, bound: None }))
    }

    fn buffer_memory_requirements(&mut self, buffer: BufferHandle) -> MemoryRequirements {
        let size = self.buffers[buffer].size;
        MemoryRequirements::new(size, 256, 0b1)
    }

    fn memory_types(&self) -> RVec<MemoryType> {
        self.memory_types.clone()
    }

    fn allocate_memory(
        &mut self,
        size: u64,
        _memory_type_index: u32,
    ) -> Result<MemoryHandle, DeviceError> {
        if std::mem::take(&mut self.fail_next_alloc) {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        if let Some(remaining) = self.allocs_until_fail.as_mut() {
            if *remaining == 0 {
                return Err(DeviceError::OutOfDeviceMemory);
            }
            *remaining -= 1;
        }
        let bytes = vec![0u8; size as usize].into_boxed_slice();
        Ok(self.allocations.insert(MockAllocation {
            bytes,
            mapped: false,
        }))
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        _offset: u64,
    ) -> Result<(), DeviceError> {
        if !self.allocations.contains_key(memory) {
            return Err(DeviceError::UnknownHandle);
        }
        self.buffers
            .get_mut(buffer)
            .ok_or(DeviceError::UnknownHandle)?
            .bound = Some(memory);
        Ok(())
    }

    fn map_memory(
        &mut self,
        memory: MemoryHandle,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8, DeviceError> {
        if std::mem::take(&mut self.fail_next_map) {
            return Err(DeviceError::MapFailed);
        }
        let allocation = self
            .allocations
            .get_mut(memory)
            .ok_or(DeviceError::UnknownHandle)?;
        if offset + size > allocation.bytes.len() as u64 {
            return Err(DeviceError::MapFailed);
        }
        allocation.mapped = true;
        // Box keeps the bytes at a stable address for the allocation's
        // lifetime, so the pointer survives slotmap growth.
        Ok(unsafe { allocation.bytes.as_mut_ptr().add(offset as usize) })
    }

    fn unmap_memory(&mut self, memory: MemoryHandle) {
        if let Some(allocation) = self.allocations.get_mut(memory) {
            allocation.mapped = false;
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(buffer).is_some() {
            self.destroyed.push(buffer);
        }
    }

    fn free_memory(&mut self, memory: MemoryHandle) {
        self.allocations.remove(memory);
    }

    fn create_shader_module(&mut self, code: &[u32]) -> Result<ShaderModuleHandle, DeviceError> {
        if code.is_empty() {
            return Err(DeviceError::ResourceCreationFailed("shader module"));
        }
        Ok(self.modules.insert(code.len()))
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleHandle) {
        self.modules.remove(module);
    }
}

#[cfg(test)]
mod tests {
    use super::MockDevice;
    use crate::gpu::{BufferUsage, DeviceBackend, MemoryProperties};

    #[test]
    fn find_memory_type_respects_mask_and_properties() {
        let device = MockDevice::new();
        let wanted = MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT;
        assert_eq!(device.find_memory_type(0b1, wanted), Some(0));
        // Mask excludes the only type.
        assert_eq!(device.find_memory_type(0b10, wanted), None);

        let local = MockDevice::device_local_only();
        assert_eq!(local.find_memory_type(0b1, wanted), None);
    }

    #[test]
    fn handles_die_on_destroy() {
        let mut device = MockDevice::new();
        let buffer = device.create_buffer(64, BufferUsage::Uniform).unwrap();
        assert_eq!(device.live_buffers(), 1);
        device.destroy_buffer(buffer);
        assert_eq!(device.live_buffers(), 0);
        assert!(device.was_destroyed(buffer));
    }
}
