///Parsed shader metadata, as produced by the shader translator. The
///allocator only reads this; bytecode parsing happens upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Bool,
}

impl UniformType {
    ///Float and int uniforms are 4-component, 16-byte aligned vectors;
    ///bools are single bytes.
    pub fn element_size(&self) -> u64 {
        match self {
            UniformType::Float | UniformType::Int => 16,
            UniformType::Bool => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, derive_new::new)]
pub struct UniformDescriptor {
    pub ty: UniformType,
    ///Register index into the stage's register file.
    pub register: usize,
    ///0 means a single (non-array) element.
    pub array_len: usize,
}

impl UniformDescriptor {
    pub fn element_count(&self) -> usize {
        self.array_len.max(1)
    }

    pub fn byte_len(&self) -> u64 {
        self.element_count() as u64 * self.ty.element_size()
    }
}

#[derive(Clone, Debug)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub uniforms: Vec<UniformDescriptor>,
}

impl ShaderReflection {
    pub fn new(stage: ShaderStage, uniforms: Vec<UniformDescriptor>) -> Self {
        Self { stage, uniforms }
    }

    pub fn has_uniforms(&self) -> bool {
        !self.uniforms.is_empty()
    }

    /// Exact byte size of one commit of this shader's uniforms: the sum of
    /// per-uniform element counts times element size, in declaration order,
    /// with no padding between uniforms.
    pub fn uniform_data_size(&self) -> u64 {
        self.uniforms.iter().map(UniformDescriptor::byte_len).sum()
    }
}
