use crate::gpu::{BackingBuffer, BufferHandle, DeviceBackend};

/// Buffers superseded by stream growth (or shader teardown) that may still
/// be referenced by in-flight GPU work.
///
/// Two-phase lifecycle: [`retire`](Self::retire) hands a buffer over now,
/// [`reclaim`](Self::reclaim) releases the device resources later. The
/// allocator has no visibility into GPU completion, so reclaiming is gated
/// on the caller's guarantee that every frame which could reference a queued
/// buffer has finished (e.g. after waiting on frame fences for at least
/// `frames_in_flight` frames).
#[derive(Debug, Default)]
pub struct RetiredBuffers {
    queue: Vec<BackingBuffer>,
}

impl RetiredBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retire(&mut self, buffer: BackingBuffer) {
        log::debug!(
            "retiring buffer {:?} ({}b), {} queued",
            buffer.handle(),
            buffer.capacity(),
            self.queue.len() + 1
        );
        self.queue.push(buffer);
    }

    /// Precondition: no in-flight GPU work references any queued buffer.
    pub fn reclaim<D: DeviceBackend>(&mut self, device: &mut D) {
        for buffer in self.queue.drain(..) {
            log::debug!("reclaiming buffer {:?}", buffer.handle());
            buffer.release(device);
        }
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.queue.iter().any(|buffer| buffer.handle() == handle)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::RetiredBuffers;
    use crate::gpu::{BackingBuffer, MockDevice};

    #[test]
    fn reclaim_releases_every_queued_buffer() {
        let mut device = MockDevice::new();
        let mut retired = RetiredBuffers::new();
        let a = BackingBuffer::new(&mut device, 64).unwrap();
        let b = BackingBuffer::new(&mut device, 128).unwrap();
        let (ha, hb) = (a.handle(), b.handle());

        retired.retire(a);
        retired.retire(b);
        assert_eq!(retired.len(), 2);
        assert!(retired.contains(ha));
        // Queued buffers are still live on the device until reclaim.
        assert_eq!(device.live_buffers(), 2);

        retired.reclaim(&mut device);
        assert!(retired.is_empty());
        assert_eq!(device.live_buffers(), 0);
        assert!(device.was_destroyed(ha));
        assert!(device.was_destroyed(hb));
    }
}
