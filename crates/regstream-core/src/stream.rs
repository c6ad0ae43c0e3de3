use crate::gpu::{Align, BackingBuffer, BufferHandle, DeviceBackend, RetiredBuffers};
use crate::{RVec, RegisterFile, ShaderReflection, StreamError, UniformType};

/// What a draw call binds for one stage's uniforms: the backing buffer for
/// the stream's current frame slot, a fixed base offset (always 0), the
/// bump-allocated dynamic offset, and the byte length of this commit.
/// `buffer` is `None` when the stage has no shader or no uniforms.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformBinding {
    pub buffer: Option<BufferHandle>,
    pub offset: u64,
    pub dynamic_offset: u64,
    pub size: u64,
}

impl UniformBinding {
    pub fn null() -> Self {
        Self::default()
    }
}

/// Bump allocator streaming one shader's uniform data into GPU-visible
/// memory, duplicated across one backing buffer per frame in flight so a
/// frame's writes never land in a buffer an earlier in-flight frame may
/// still be reading.
///
/// Within a frame, successive commits advance a bump offset through the
/// current slot's buffer; the offset is only reset wholesale at the frame
/// boundary. When a commit would overrun the slot, the slot's buffer is
/// rebuilt at double capacity and the old one is retired — never freed in
/// place.
#[derive(Debug)]
pub struct UniformStream {
    slots: RVec<BackingBuffer>,
    current_slot: usize,
    dynamic_offset: u64,
    block_size: u64,
    touched: bool,
}

// Floor capacity for a fresh slot: room for a handful of aligned commits
// before the first growth event.
const INITIAL_SLOT_CAPACITY: u64 = 4096;

impl UniformStream {
    pub(crate) fn new<D: DeviceBackend>(
        device: &mut D,
        reflection: &ShaderReflection,
        frames_in_flight: usize,
    ) -> Result<Self, StreamError> {
        let limits = device.limits();
        let data_size = reflection.uniform_data_size();
        if data_size > limits.max_uniform_buffer_range {
            log::warn!(
                "uniform data size {data_size}b exceeds device range limit {}b",
                limits.max_uniform_buffer_range
            );
        }

        let capacity = data_size
            .align_up(limits.min_uniform_buffer_offset_alignment)
            .max(INITIAL_SLOT_CAPACITY);
        let mut slots = RVec::new();
        for _ in 0..frames_in_flight {
            match BackingBuffer::new(device, capacity) {
                Ok(buffer) => slots.push(buffer),
                Err(e) => {
                    // Partially created slots were never handed to the GPU.
                    for buffer in slots.drain(..) {
                        buffer.release(device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            slots,
            current_slot: 0,
            dynamic_offset: 0,
            block_size: 0,
            touched: false,
        })
    }

    /// Snapshots the register file into the current slot at the next bump
    /// offset and returns the binding parameters for the draw.
    ///
    /// The first commit of a frame reuses the offset left by the frame
    /// reset; later commits advance past the previous commit, rounded up to
    /// the device's uniform offset alignment. On failure (growth only) the
    /// stream keeps its previous buffer and offsets — the caller must skip
    /// the draw, but the stream stays valid.
    pub(crate) fn commit<D: DeviceBackend>(
        &mut self,
        device: &mut D,
        reflection: &ShaderReflection,
        registers: &RegisterFile,
        retired: &mut RetiredBuffers,
    ) -> Result<UniformBinding, StreamError> {
        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let size = reflection.uniform_data_size();

        let mut offset = if self.touched {
            self.dynamic_offset + self.block_size.align_up(alignment)
        } else {
            // Frame reset left this at 0; the first commit claims it as-is.
            self.dynamic_offset
        };

        if offset + size > self.slots[self.current_slot].capacity() {
            self.grow_current_slot(device, size, retired)?;
            offset = 0;
        }

        // Growth can no longer fail; commit the new stream state.
        self.touched = true;
        self.dynamic_offset = offset;

        let slot = &mut self.slots[self.current_slot];
        let mut cursor = offset;
        for uniform in &reflection.uniforms {
            let count = uniform.element_count();
            let bytes = match uniform.ty {
                UniformType::Float => registers.float_bytes(uniform.register, count),
                UniformType::Int => registers.int_bytes(uniform.register, count),
                UniformType::Bool => registers.bool_bytes(uniform.register, count),
            };
            slot.write(cursor, bytes);
            cursor += bytes.len() as u64;
        }
        self.block_size = cursor - offset;
        debug_assert_eq!(self.block_size, size);

        Ok(UniformBinding {
            buffer: Some(slot.handle()),
            offset: 0,
            dynamic_offset: offset,
            size: self.block_size,
        })
    }

    /// Rebuilds the current slot's buffer at at least double its capacity,
    /// carrying the old content forward, and retires the superseded buffer.
    /// Earlier same-frame draws keep their dynamic offsets into the retired
    /// buffer, which stays alive until the deferred-destruction flush.
    fn grow_current_slot<D: DeviceBackend>(
        &mut self,
        device: &mut D,
        required: u64,
        retired: &mut RetiredBuffers,
    ) -> Result<(), StreamError> {
        let slot = &mut self.slots[self.current_slot];
        let mut target = slot.capacity().max(1) * 2;
        while target < required {
            target *= 2;
        }

        let replacement = BackingBuffer::grown(device, target, slot)?;
        log::debug!(
            "grew stream slot {} from {}b to {}b",
            self.current_slot,
            slot.capacity(),
            target
        );
        let superseded = std::mem::replace(slot, replacement);
        retired.retire(superseded);
        Ok(())
    }

    /// Frame-boundary reset: rewind the bump cursor and rotate to the next
    /// frame slot.
    pub(crate) fn end_frame(&mut self, frames_in_flight: usize) {
        self.dynamic_offset = 0;
        self.block_size = 0;
        self.current_slot = (self.current_slot + 1) % frames_in_flight;
        self.touched = false;
    }

    /// Hands every slot to the retired queue; used at shader teardown when
    /// in-flight frames may still reference the buffers.
    pub(crate) fn retire_all(mut self, retired: &mut RetiredBuffers) {
        for buffer in self.slots.drain(..) {
            retired.retire(buffer);
        }
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn dynamic_offset(&self) -> u64 {
        self.dynamic_offset
    }

    pub fn slot_handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.slots.iter().map(BackingBuffer::handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::MockDevice;
    use crate::{ShaderStage, UniformDescriptor};

    fn float_array_shader(len: usize) -> ShaderReflection {
        ShaderReflection::new(
            ShaderStage::Vertex,
            vec![UniformDescriptor::new(UniformType::Float, 0, len)],
        )
    }

    fn commit(
        stream: &mut UniformStream,
        device: &mut MockDevice,
        reflection: &ShaderReflection,
        registers: &RegisterFile,
        retired: &mut RetiredBuffers,
    ) -> UniformBinding {
        stream
            .commit(device, reflection, registers, retired)
            .unwrap()
    }

    #[test]
    fn same_frame_commits_do_not_overlap() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let registers = RegisterFile::new();
        let reflection = float_array_shader(4);
        let mut stream = UniformStream::new(&mut device, &reflection, 2).unwrap();

        let first = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        assert_eq!(first.dynamic_offset, 0);
        assert_eq!(first.size, 64);
        assert_eq!(first.offset, 0);

        let second = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        // Second range starts at align(first.size, 256).
        assert_eq!(second.dynamic_offset, 256);
        assert!(second.dynamic_offset >= first.dynamic_offset + first.size);
    }

    #[test]
    fn overflow_grows_once_and_doubles() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let registers = RegisterFile::new();
        // 4096b commits fill the whole initial slot; the second one forces
        // exactly one replacement.
        let reflection = float_array_shader(256);
        let mut stream = UniformStream::new(&mut device, &reflection, 1).unwrap();
        let original = stream.slot_handles().next().unwrap();

        commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        let second = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        assert_eq!(second.dynamic_offset, 0);
        assert_eq!(retired.len(), 1);
        assert!(retired.contains(original));

        let replacement = stream.slot_handles().next().unwrap();
        assert_ne!(replacement, original);
        assert!(!retired.contains(replacement));
    }

    #[test]
    fn growth_preserves_prior_same_frame_commits() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let mut registers = RegisterFile::new();
        // 2048b commits: two fill the 4096b slot, the third overflows it.
        let reflection = float_array_shader(128);
        let mut stream = UniformStream::new(&mut device, &reflection, 1).unwrap();

        registers.set_float(0, &[[1.0; 4]; 128]);
        commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        registers.set_float(0, &[[2.0; 4]; 128]);
        let second = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        assert_eq!(second.dynamic_offset, 2048);

        registers.set_float(0, &[[3.0; 4]; 128]);
        let third = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        // Grew 4096 -> 8192 and restarted at 0, overwriting the first
        // commit's carried-over range but not the second's.
        assert_eq!(third.dynamic_offset, 0);
        assert_eq!(retired.len(), 1);

        let contents = device.buffer_contents(third.buffer.unwrap());
        let expected: &[u8] = bytemuck::cast_slice(&[[2.0f32; 4]; 128]);
        assert_eq!(&contents[2048..4096], expected);
    }

    #[test]
    fn growth_failure_leaves_stream_usable() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let registers = RegisterFile::new();
        let reflection = float_array_shader(256);
        let mut stream = UniformStream::new(&mut device, &reflection, 1).unwrap();
        let original = stream.slot_handles().next().unwrap();

        commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        let offset_before = stream.dynamic_offset();

        device.fail_next_alloc = true;
        let err = stream.commit(&mut device, &reflection, &registers, &mut retired);
        assert!(err.is_err());
        // Previous buffer still installed, offsets untouched, nothing retired.
        assert_eq!(stream.slot_handles().next().unwrap(), original);
        assert_eq!(stream.dynamic_offset(), offset_before);
        assert!(retired.is_empty());

        // And the stream recovers on the next attempt.
        let retry = commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        assert_eq!(retry.dynamic_offset, 0);
        assert_eq!(retired.len(), 1);
    }

    #[test]
    fn end_frame_rewinds_and_rotates() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let registers = RegisterFile::new();
        let reflection = float_array_shader(2);
        let mut stream = UniformStream::new(&mut device, &reflection, 3).unwrap();

        commit(&mut stream, &mut device, &reflection, &registers, &mut retired);
        assert!(stream.is_touched());

        for expected_slot in [1, 2, 0] {
            stream.end_frame(3);
            assert_eq!(stream.current_slot(), expected_slot);
            assert_eq!(stream.dynamic_offset(), 0);
            assert!(!stream.is_touched());
        }
    }

    #[test]
    fn creation_failure_releases_partial_slots() {
        let reflection = float_array_shader(4);

        // First slot succeeds, second slot's allocation fails: the first
        // slot must be unwound, since nothing was ever handed to the GPU.
        let mut failing = MockDevice::new();
        failing.allocs_until_fail = Some(1);
        assert!(UniformStream::new(&mut failing, &reflection, 2).is_err());
        assert_eq!(failing.live_buffers(), 0);
        assert_eq!(failing.live_allocations(), 0);

        // Happy path allocates one buffer per frame in flight.
        let mut device = MockDevice::new();
        let stream = UniformStream::new(&mut device, &reflection, 2).unwrap();
        assert_eq!(stream.slot_handles().count(), 2);
        assert_eq!(device.live_buffers(), 2);
    }
}
