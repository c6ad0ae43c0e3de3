use crate::gpu::ShaderModuleHandle;
use crate::{ShaderReflection, UniformStream};

slotmap::new_key_type! {
    pub struct ShaderHandle;
}

/// A registered shader: its device module, reflection metadata, and — when
/// it declares any uniforms — the stream that feeds them. Reference counted
/// so callers can share one compiled shader across programs; the stream and
/// module are torn down with the last release.
#[derive(Debug)]
pub(crate) struct Shader {
    pub reflection: ShaderReflection,
    pub module: ShaderModuleHandle,
    pub refcount: u32,
    pub stream: Option<UniformStream>,
}
