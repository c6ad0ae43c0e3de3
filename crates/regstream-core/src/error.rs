use crate::gpu::DeviceError;
use crate::ShaderHandle;

#[derive(Clone, Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("failed to find suitable memory type for uniform buffer memory")]
    NoSuitableMemoryType,
    #[error("shader {0:?} is not registered with this context")]
    UnknownShader(ShaderHandle),
}
