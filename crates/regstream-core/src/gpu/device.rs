use crate::RVec;

//All slotmap keys are COPY
slotmap::new_key_type! { pub struct BufferHandle; }
slotmap::new_key_type! { pub struct MemoryHandle; }
slotmap::new_key_type! { pub struct ShaderModuleHandle; }

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemoryProperties: u32 {
        const HOST_VISIBLE = 1 << 0;
        const HOST_COHERENT = 1 << 1;
        const DEVICE_LOCAL = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Uniform,
}

#[derive(Clone, Copy, Debug, derive_new::new)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    ///Bit `i` set means memory type `i` is compatible with the buffer.
    pub memory_type_bits: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct MemoryType {
    pub properties: MemoryProperties,
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceLimits {
    pub max_uniform_buffer_range: u64,
    pub min_uniform_buffer_offset_alignment: u64,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to create device resource: {0}")]
    ResourceCreationFailed(&'static str),
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("failed to bind buffer to memory")]
    BindFailed,
    #[error("failed to map device memory")]
    MapFailed,
    #[error("unknown handle passed to device backend")]
    UnknownHandle,
}

/// # Device backend
///
/// The primitive operations the streaming allocator needs from a graphics
/// device. The allocator drives these as opaque calls and never inspects the
/// resources behind the handles; a backend wraps a real API (Vulkan-style
/// explicit memory) or host memory ([`super::MockDevice`]).
///
/// Handles are slotmap keys owned by the backend. A handle is valid from the
/// call that returned it until the matching destroy/free call.
pub trait DeviceBackend {
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&mut self, size: u64, usage: BufferUsage)
        -> Result<BufferHandle, DeviceError>;
    fn buffer_memory_requirements(&mut self, buffer: BufferHandle) -> MemoryRequirements;
    fn memory_types(&self) -> RVec<MemoryType>;
    fn allocate_memory(
        &mut self,
        size: u64,
        memory_type_index: u32,
    ) -> Result<MemoryHandle, DeviceError>;
    fn bind_buffer_memory(
        &mut self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> Result<(), DeviceError>;

    ///The returned pointer stays valid until [`Self::unmap_memory`] or
    ///[`Self::free_memory`] on the same handle.
    fn map_memory(
        &mut self,
        memory: MemoryHandle,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8, DeviceError>;
    fn unmap_memory(&mut self, memory: MemoryHandle);

    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn free_memory(&mut self, memory: MemoryHandle);

    fn create_shader_module(&mut self, code: &[u32]) -> Result<ShaderModuleHandle, DeviceError>;
    fn destroy_shader_module(&mut self, module: ShaderModuleHandle);

    ///First memory type that is both compatible with the buffer
    ///(`type_mask`) and carries all `required` properties.
    fn find_memory_type(&self, type_mask: u32, required: MemoryProperties) -> Option<u32> {
        self.memory_types()
            .iter()
            .enumerate()
            .find_map(|(index, memory_type)| {
                let compatible = type_mask & (1 << index) != 0;
                (compatible && memory_type.properties.contains(required)).then_some(index as u32)
            })
    }
}
