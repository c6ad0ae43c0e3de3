use rustc_hash::FxHashSet;
use slotmap::SlotMap;

use crate::gpu::{DeviceBackend, RetiredBuffers, ShaderModuleHandle};
use crate::shader::Shader;
use crate::{
    RegisterFile, ShaderHandle, ShaderReflection, ShaderStage, StreamError, UniformBinding,
};
use crate::stream::UniformStream;

/// Per-draw uniform bindings for both stages of the bound program, as
/// returned by [`StreamContext::commit`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgramBindings {
    pub vertex: UniformBinding,
    pub fragment: UniformBinding,
}

/// Owner of the whole streaming state for one device: the registered
/// shaders and their uniform streams, both stages' register files, the
/// currently bound program, the per-frame touched set, and the retired
/// buffer queue.
///
/// Single rendering thread only; the caller serializes access. All
/// fallible operations return a `Result`, and additionally record the
/// failure in a last-error slot readable through
/// [`last_error`](Self::last_error) for callers that thread errors through
/// sentinel returns.
#[derive(Debug)]
pub struct StreamContext<D: DeviceBackend> {
    device: D,
    frames_in_flight: usize,
    current_frame: usize,
    shaders: SlotMap<ShaderHandle, Shader>,
    vertex_registers: RegisterFile,
    fragment_registers: RegisterFile,
    bound_vertex: Option<ShaderHandle>,
    bound_fragment: Option<ShaderHandle>,
    touched: FxHashSet<ShaderHandle>,
    retired: RetiredBuffers,
    last_error: Option<String>,
}

impl<D: DeviceBackend> StreamContext<D> {
    pub fn new(device: D, frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "need at least one frame in flight");
        Self {
            device,
            frames_in_flight,
            current_frame: 0,
            shaders: SlotMap::with_key(),
            vertex_registers: RegisterFile::new(),
            fragment_registers: RegisterFile::new(),
            bound_vertex: None,
            bound_fragment: None,
            touched: FxHashSet::default(),
            retired: RetiredBuffers::new(),
            last_error: None,
        }
    }

    /// Compiles the shader module on the device and, when the reflection
    /// declares uniforms, creates its stream with one backing buffer per
    /// frame in flight. The returned handle starts with a refcount of one.
    pub fn create_shader(
        &mut self,
        reflection: ShaderReflection,
        code: &[u32],
    ) -> Result<ShaderHandle, StreamError> {
        let module = match self.device.create_shader_module(code) {
            Ok(module) => module,
            Err(e) => return Err(self.record(e.into())),
        };

        let stream = if reflection.has_uniforms() {
            match UniformStream::new(&mut self.device, &reflection, self.frames_in_flight) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    self.device.destroy_shader_module(module);
                    return Err(self.record(e));
                }
            }
        } else {
            None
        };

        let handle = self.shaders.insert(Shader {
            reflection,
            module,
            refcount: 1,
            stream,
        });
        log::debug!("registered shader {handle:?} (module {module:?})");
        Ok(handle)
    }

    pub fn retain_shader(&mut self, handle: ShaderHandle) -> Result<(), StreamError> {
        if !self.shaders.contains_key(handle) {
            return Err(self.record(StreamError::UnknownShader(handle)));
        }
        self.shaders[handle].refcount += 1;
        Ok(())
    }

    /// Drops one reference. The last release unbinds the shader if bound,
    /// retires its stream buffers (in-flight frames may still read them)
    /// and destroys the device module.
    pub fn release_shader(&mut self, handle: ShaderHandle) -> Result<(), StreamError> {
        if !self.shaders.contains_key(handle) {
            return Err(self.record(StreamError::UnknownShader(handle)));
        }
        let shader = &mut self.shaders[handle];
        shader.refcount -= 1;
        if shader.refcount > 0 {
            return Ok(());
        }

        if let Some(shader) = self.shaders.remove(handle) {
            if let Some(stream) = shader.stream {
                stream.retire_all(&mut self.retired);
            }
            self.device.destroy_shader_module(shader.module);
        }
        if self.bound_vertex == Some(handle) {
            self.bound_vertex = None;
        }
        if self.bound_fragment == Some(handle) {
            self.bound_fragment = None;
        }
        self.touched.remove(&handle);
        log::debug!("destroyed shader {handle:?}");
        Ok(())
    }

    /// Binds the program for subsequent commits. `None` leaves that
    /// stage's current binding alone; a never-bound stage commits to a
    /// null binding. Bindings are only cleared when the bound shader's
    /// last reference is released.
    pub fn bind_shaders(&mut self, vertex: Option<ShaderHandle>, fragment: Option<ShaderHandle>) {
        if vertex.is_some() {
            self.bound_vertex = vertex;
        }
        if fragment.is_some() {
            self.bound_fragment = fragment;
        }
    }

    pub fn bound_shaders(&self) -> (Option<ShaderHandle>, Option<ShaderHandle>) {
        (self.bound_vertex, self.bound_fragment)
    }

    pub fn registers(&self, stage: ShaderStage) -> &RegisterFile {
        match stage {
            ShaderStage::Vertex => &self.vertex_registers,
            ShaderStage::Fragment => &self.fragment_registers,
        }
    }

    pub fn registers_mut(&mut self, stage: ShaderStage) -> &mut RegisterFile {
        match stage {
            ShaderStage::Vertex => &mut self.vertex_registers,
            ShaderStage::Fragment => &mut self.fragment_registers,
        }
    }

    /// Snapshots both stages' register files into their streams and
    /// returns the binding parameters for the draw. On error the draw must
    /// be skipped; the streams keep their previous buffers and offsets.
    pub fn commit(&mut self) -> Result<ProgramBindings, StreamError> {
        let vertex = self.commit_stage(self.bound_vertex)?;
        let fragment = self.commit_stage(self.bound_fragment)?;
        Ok(ProgramBindings { vertex, fragment })
    }

    fn commit_stage(
        &mut self,
        handle: Option<ShaderHandle>,
    ) -> Result<UniformBinding, StreamError> {
        let Some(handle) = handle else {
            return Ok(UniformBinding::null());
        };
        if !self.shaders.contains_key(handle) {
            return Err(self.record(StreamError::UnknownShader(handle)));
        }

        let Self {
            device,
            shaders,
            vertex_registers,
            fragment_registers,
            touched,
            retired,
            last_error,
            ..
        } = self;
        let shader = &mut shaders[handle];
        let Some(stream) = shader.stream.as_mut() else {
            return Ok(UniformBinding::null());
        };
        let registers = match shader.reflection.stage {
            ShaderStage::Vertex => &*vertex_registers,
            ShaderStage::Fragment => &*fragment_registers,
        };

        match stream.commit(device, &shader.reflection, registers, retired) {
            Ok(binding) => {
                touched.insert(handle);
                Ok(binding)
            }
            Err(e) => {
                *last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Frame boundary: rewinds and rotates every stream touched this
    /// frame, then advances the frame-in-flight index. Untouched streams
    /// are left alone.
    pub fn end_frame(&mut self) {
        for handle in self.touched.drain() {
            if let Some(shader) = self.shaders.get_mut(handle) {
                if let Some(stream) = shader.stream.as_mut() {
                    stream.end_frame(self.frames_in_flight);
                }
            }
        }
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
    }

    /// Releases every retired buffer's device resources.
    ///
    /// Precondition: the caller guarantees the GPU has finished all work
    /// that could reference a retired buffer, typically by having waited
    /// on frame fences for at least `frames_in_flight` frames.
    pub fn flush_deferred_destructions(&mut self) {
        self.retired.reclaim(&mut self.device);
    }

    /// Tears the context down, destroying every shader and buffer, and
    /// hands the device back.
    /// Same precondition as [`flush_deferred_destructions`](Self::flush_deferred_destructions):
    /// the device must be idle.
    pub fn destroy(self) -> D {
        let Self {
            mut device,
            mut shaders,
            mut retired,
            ..
        } = self;
        for (_, shader) in shaders.drain() {
            if let Some(stream) = shader.stream {
                stream.retire_all(&mut retired);
            }
            device.destroy_shader_module(shader.module);
        }
        retired.reclaim(&mut device);
        device
    }

    fn record(&mut self, e: StreamError) -> StreamError {
        self.last_error = Some(e.to_string());
        e
    }

    /// Human-readable description of the most recent failure, in the
    /// style of a last-error slot: overwritten by each new failure, never
    /// cleared by successes.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn shader_module(&self, handle: ShaderHandle) -> Option<ShaderModuleHandle> {
        self.shaders.get(handle).map(|shader| shader.module)
    }

    pub fn shader_reflection(&self, handle: ShaderHandle) -> Option<&ShaderReflection> {
        self.shaders.get(handle).map(|shader| &shader.reflection)
    }

    pub fn uniform_stream(&self, handle: ShaderHandle) -> Option<&UniformStream> {
        self.shaders.get(handle).and_then(|shader| shader.stream.as_ref())
    }
}
