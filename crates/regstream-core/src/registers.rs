/// Max entries for each register file type.
pub const MAX_REG_FILE_F: usize = 8192;
pub const MAX_REG_FILE_I: usize = 2047;
pub const MAX_REG_FILE_B: usize = 2047;

/// Flat per-stage storage for the currently bound uniform values. The caller
/// writes registers before a draw; the allocator snapshots them into the
/// current backing buffer on commit and never writes back.
///
/// Out-of-range register indices are caller bugs and panic rather than
/// surfacing as runtime errors.
#[derive(Debug)]
pub struct RegisterFile {
    float: Vec<[f32; 4]>,
    int: Vec<[i32; 4]>,
    bool: Vec<u8>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            float: vec![[0.0; 4]; MAX_REG_FILE_F],
            int: vec![[0; 4]; MAX_REG_FILE_I],
            bool: vec![0; MAX_REG_FILE_B],
        }
    }

    pub fn set_float(&mut self, first_register: usize, values: &[[f32; 4]]) {
        self.float[first_register..first_register + values.len()].copy_from_slice(values);
    }

    pub fn set_int(&mut self, first_register: usize, values: &[[i32; 4]]) {
        self.int[first_register..first_register + values.len()].copy_from_slice(values);
    }

    pub fn set_bool(&mut self, first_register: usize, values: &[bool]) {
        for (slot, &value) in self.bool[first_register..first_register + values.len()]
            .iter_mut()
            .zip(values)
        {
            *slot = value as u8;
        }
    }

    pub(crate) fn float_bytes(&self, register: usize, count: usize) -> &[u8] {
        bytemuck::cast_slice(&self.float[register..register + count])
    }

    pub(crate) fn int_bytes(&self, register: usize, count: usize) -> &[u8] {
        bytemuck::cast_slice(&self.int[register..register + count])
    }

    pub(crate) fn bool_bytes(&self, register: usize, count: usize) -> &[u8] {
        &self.bool[register..register + count]
    }
}

#[cfg(test)]
mod tests {
    use super::RegisterFile;

    #[test]
    fn float_registers_round_trip_as_bytes() {
        let mut file = RegisterFile::new();
        file.set_float(2, &[[1.0, 2.0, 3.0, 4.0]]);
        let bytes = file.float_bytes(2, 1);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes, bytemuck::cast_slice::<[f32; 4], u8>(&[[1.0, 2.0, 3.0, 4.0]]));
    }

    #[test]
    fn bool_registers_are_single_bytes() {
        let mut file = RegisterFile::new();
        file.set_bool(0, &[true, false, true]);
        assert_eq!(file.bool_bytes(0, 3), &[1, 0, 1]);
    }

    #[test]
    #[should_panic]
    fn out_of_range_register_panics() {
        let mut file = RegisterFile::new();
        file.set_int(super::MAX_REG_FILE_I, &[[0; 4]]);
    }
}
