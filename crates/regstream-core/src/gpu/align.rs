///Dynamic uniform buffer offsets must be a multiple of the device's
///`min_uniform_buffer_offset_alignment` (commonly 256, but a queried limit,
///not a constant). Offsets are rounded up with plain integer arithmetic so
///non-power-of-two alignments reported by a backend still work.
pub trait Align {
    fn align_padding(&self, alignment: u64) -> u64;
    fn align_up(&self, alignment: u64) -> u64;
}

impl Align for u64 {
    fn align_padding(&self, alignment: u64) -> u64 {
        let remainder = self % alignment;
        if remainder == 0 {
            0
        } else {
            alignment - remainder
        }
    }

    fn align_up(&self, alignment: u64) -> u64 {
        self + self.align_padding(alignment)
    }
}
