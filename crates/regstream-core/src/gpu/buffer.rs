use crate::gpu::{
    BufferHandle, BufferUsage, DeviceBackend, DeviceError, MemoryHandle, MemoryProperties,
};
use crate::StreamError;

/// One physical uniform buffer: a device buffer bound to host-visible,
/// host-coherent memory with a persistent mapping held for the buffer's
/// whole lifetime.
///
/// A `BackingBuffer` is exclusively owned by one stream slot at a time.
/// When a stream outgrows it, ownership moves to the retired queue; the
/// device resources are only released in [`super::RetiredBuffers::reclaim`].
#[derive(Debug)]
pub struct BackingBuffer {
    buffer: BufferHandle,
    memory: MemoryHandle,
    mapping: *mut u8,
    capacity: u64,
}

impl BackingBuffer {
    pub fn new<D: DeviceBackend>(device: &mut D, capacity: u64) -> Result<Self, StreamError> {
        let buffer = device.create_buffer(capacity, BufferUsage::Uniform)?;

        let requirements = device.buffer_memory_requirements(buffer);
        let memory_type = match device.find_memory_type(
            requirements.memory_type_bits,
            MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        ) {
            Some(index) => index,
            None => {
                device.destroy_buffer(buffer);
                return Err(StreamError::NoSuitableMemoryType);
            }
        };

        let memory = match device.allocate_memory(requirements.size, memory_type) {
            Ok(memory) => memory,
            Err(e) => return Err(Self::unwind_buffer(device, buffer, e)),
        };
        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.free_memory(memory);
            return Err(Self::unwind_buffer(device, buffer, e));
        }
        let mapping = match device.map_memory(memory, 0, requirements.size) {
            Ok(mapping) => mapping,
            Err(e) => {
                device.free_memory(memory);
                return Err(Self::unwind_buffer(device, buffer, e));
            }
        };

        log::debug!("created {capacity}b backing buffer {buffer:?}");
        Ok(Self {
            buffer,
            memory,
            mapping,
            capacity,
        })
    }

    /// Replacement path for growth: builds a larger buffer carrying forward
    /// the previous buffer's full content. The caller still owns `previous`
    /// and must retire it; a buffer the GPU may be reading is never freed
    /// here.
    pub fn grown<D: DeviceBackend>(
        device: &mut D,
        capacity: u64,
        previous: &BackingBuffer,
    ) -> Result<Self, StreamError> {
        debug_assert!(capacity >= previous.capacity);
        let mut next = Self::new(device, capacity)?;
        next.write(0, previous.mapped_bytes());
        Ok(next)
    }

    //A failed creation step was never visible to the GPU, so the partial
    //resources are released synchronously rather than retired.
    fn unwind_buffer<D: DeviceBackend>(
        device: &mut D,
        buffer: BufferHandle,
        e: DeviceError,
    ) -> StreamError {
        device.destroy_buffer(buffer);
        e.into()
    }

    /// Bounds-checked write into the persistent mapping.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        assert!(
            offset + bytes.len() as u64 <= self.capacity,
            "mapped write out of bounds: {}+{} > {}",
            offset,
            bytes.len(),
            self.capacity
        );
        // Safety: the mapping covers `capacity` bytes (the allocation is at
        // least as large as the buffer) and stays valid until release().
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mapping.add(offset as usize),
                bytes.len(),
            );
        }
    }

    pub fn mapped_bytes(&self) -> &[u8] {
        // Safety: same mapping contract as write().
        unsafe { std::slice::from_raw_parts(self.mapping, self.capacity as usize) }
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn release<D: DeviceBackend>(self, device: &mut D) {
        device.unmap_memory(self.memory);
        device.free_memory(self.memory);
        device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::BackingBuffer;
    use crate::gpu::MockDevice;
    use crate::StreamError;

    #[test]
    fn create_write_read_back() {
        let mut device = MockDevice::new();
        let mut buffer = BackingBuffer::new(&mut device, 512).unwrap();
        buffer.write(256, &[7u8; 16]);
        assert_eq!(&buffer.mapped_bytes()[256..272], &[7u8; 16]);
        assert_eq!(buffer.capacity(), 512);
        buffer.release(&mut device);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn write_past_capacity_panics() {
        let mut device = MockDevice::new();
        let mut buffer = BackingBuffer::new(&mut device, 64).unwrap();
        buffer.write(60, &[0u8; 8]);
    }

    #[test]
    fn grown_preserves_previous_content() {
        let mut device = MockDevice::new();
        let mut small = BackingBuffer::new(&mut device, 64).unwrap();
        small.write(0, &[0xAB; 64]);
        let grown = BackingBuffer::grown(&mut device, 256, &small).unwrap();
        assert_eq!(&grown.mapped_bytes()[..64], &[0xAB; 64]);
        assert_ne!(grown.handle(), small.handle());
        small.release(&mut device);
        grown.release(&mut device);
    }

    #[test]
    fn allocation_failure_destroys_the_buffer() {
        let mut device = MockDevice::new();
        device.fail_next_alloc = true;
        let result = BackingBuffer::new(&mut device, 64);
        assert!(matches!(result, Err(StreamError::Device(_))));
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn no_host_visible_memory_type() {
        let mut device = MockDevice::device_local_only();
        let result = BackingBuffer::new(&mut device, 64);
        assert!(matches!(result, Err(StreamError::NoSuitableMemoryType)));
        assert_eq!(device.live_buffers(), 0);
    }
}
