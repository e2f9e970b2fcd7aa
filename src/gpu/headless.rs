use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::{debug, warn};

use crate::error::{FrameError, SetupError};
use crate::gpu::reflect::{self, ProgramReflection, StageReflection};
use crate::gpu::uniforms::UniformStaging;
use crate::gpu::{
    BufferHandle, BufferKind, GraphicsContext, ImageData, ProgramHandle, ShaderHandle,
    ShaderStage, TextureHandle, UniformLocation, UniformSlot, UniformValue, VertexArrayHandle,
    VertexLayout,
};

/// A single call made against the context, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CompileShader {
        shader: ShaderHandle,
        stage: ShaderStage,
    },
    DeleteShader(ShaderHandle),
    LinkProgram {
        program: ProgramHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    },
    DeleteProgram(ProgramHandle),
    UseProgram(Option<ProgramHandle>),
    SetUniform {
        program: ProgramHandle,
        slot: UniformSlot,
        value: UniformValue,
    },
    CreateBuffer {
        buffer: BufferHandle,
        kind: BufferKind,
        len: usize,
    },
    DeleteBuffer(BufferHandle),
    CreateVertexArray(VertexArrayHandle),
    DeleteVertexArray(VertexArrayHandle),
    BindVertexArray(Option<VertexArrayHandle>),
    CreateTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
        levels: usize,
    },
    DeleteTexture(TextureHandle),
    BindTexture {
        unit: u32,
        texture: Option<TextureHandle>,
    },
    DrawIndexed {
        index_count: u32,
    },
    EnableDepthTest,
    SetViewport {
        width: u32,
        height: u32,
    },
    Clear([f32; 4]),
    Present,
}

/// State captured at the moment a draw was issued.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub vertex_array: VertexArrayHandle,
    pub index_count: u32,
    pub texture: Option<TextureHandle>,
    pub depth_test: bool,
    pub frame: u64,
    reflection: Rc<ProgramReflection>,
    uniforms: UniformStaging,
}

impl DrawRecord {
    /// Reads a uniform by its flattened name as it was when the draw was issued.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        let slot = self.reflection.slot(name)?;
        self.uniforms.read(slot)
    }
}

/// Number of GPU objects currently alive, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub shaders: usize,
    pub programs: usize,
    pub buffers: usize,
    pub vertex_arrays: usize,
    pub textures: usize,
}

struct ProgramRecord {
    reflection: Rc<ProgramReflection>,
    staging: UniformStaging,
}

struct VertexArrayRecord {
    index_count: u32,
}

struct TextureRecord {
    image: ImageData,
}

#[derive(Default)]
struct State {
    next_id: u32,
    shaders: HashMap<ShaderHandle, StageReflection>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    buffers: HashMap<BufferHandle, BufferKind>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArrayRecord>,
    textures: HashMap<TextureHandle, TextureRecord>,
    active_program: Option<ProgramHandle>,
    bound_vertex_array: Option<VertexArrayHandle>,
    bound_textures: BTreeMap<u32, TextureHandle>,
    depth_test: bool,
    viewport: (u32, u32),
    commands: Vec<Command>,
    draws: Vec<DrawRecord>,
    /// Index into `commands` where the frame being recorded starts.
    frame_start: usize,
    frames_presented: u64,
}

impl State {
    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// A backend without a GPU: validates and records every call.
///
/// Shader stages go through the same reflection as on the GPU path, so a
/// shader that links here exposes the same uniform names everywhere.
///
/// The log is bounded: `present` drops everything recorded before the frame
/// it finishes, so after a present the log holds exactly that frame.
#[derive(Default)]
pub struct HeadlessContext {
    state: RefCell<State>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.borrow().commands.clone()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    /// Forgets recorded commands and draws, keeping every live object.
    pub fn reset_log(&self) {
        let mut state = self.state.borrow_mut();
        state.commands.clear();
        state.draws.clear();
        state.frame_start = 0;
    }

    pub fn frames_presented(&self) -> u64 {
        self.state.borrow().frames_presented
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state.borrow();
        LiveObjects {
            shaders: state.shaders.len(),
            programs: state.programs.len(),
            buffers: state.buffers.len(),
            vertex_arrays: state.vertex_arrays.len(),
            textures: state.textures.len(),
        }
    }

    pub fn texture_pixels(&self, texture: TextureHandle) -> Option<ImageData> {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .map(|record| record.image.clone())
    }

    /// Reads the value currently staged for `name` in `program`.
    pub fn staged_uniform(&self, program: ProgramHandle, name: &str) -> Option<UniformValue> {
        let state = self.state.borrow();
        let record = state.programs.get(&program)?;
        record.staging.read(record.reflection.slot(name)?)
    }

    pub fn active_program(&self) -> Option<ProgramHandle> {
        self.state.borrow().active_program
    }

    pub fn depth_test_enabled(&self) -> bool {
        self.state.borrow().depth_test
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.state.borrow().viewport
    }
}

impl GraphicsContext for HeadlessContext {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, SetupError> {
        let reflection = reflect::reflect_stage(stage, source).map_err(|err| {
            SetupError::Compile {
                stage,
                log: err.to_string(),
            }
        })?;
        let mut state = self.state.borrow_mut();
        let shader = ShaderHandle(state.allocate());
        state.shaders.insert(shader, reflection);
        state.commands.push(Command::CompileShader { shader, stage });
        debug!("compiled {stage} shader #{}", shader.id());
        Ok(shader)
    }

    fn delete_shader(&self, shader: ShaderHandle) {
        let mut state = self.state.borrow_mut();
        if state.shaders.remove(&shader).is_none() {
            warn!("delete of unknown shader #{}", shader.id());
            return;
        }
        state.commands.push(Command::DeleteShader(shader));
    }

    fn link_program(
        &self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, SetupError> {
        let mut state = self.state.borrow_mut();
        let lookup = |handle: ShaderHandle, expected: ShaderStage| {
            let stage = state.shaders.get(&handle).ok_or(SetupError::UnknownHandle {
                kind: "shader",
                id: handle.id(),
            })?;
            if stage.stage != expected {
                return Err(SetupError::Link(format!(
                    "shader #{} is a {} stage, expected {expected}",
                    handle.id(),
                    stage.stage
                )));
            }
            Ok(stage)
        };
        let reflection = reflect::link(
            lookup(vertex, ShaderStage::Vertex)?,
            lookup(fragment, ShaderStage::Fragment)?,
        )
        .map_err(|err| SetupError::Link(err.to_string()))?;

        let staging = UniformStaging::for_program(&reflection);
        let program = ProgramHandle(state.allocate());
        state.programs.insert(
            program,
            ProgramRecord {
                reflection: Rc::new(reflection),
                staging,
            },
        );
        state.commands.push(Command::LinkProgram {
            program,
            vertex,
            fragment,
        });
        debug!("linked program #{}", program.id());
        Ok(program)
    }

    fn delete_program(&self, program: ProgramHandle) {
        let mut state = self.state.borrow_mut();
        if state.programs.remove(&program).is_none() {
            warn!("delete of unknown program #{}", program.id());
            return;
        }
        if state.active_program == Some(program) {
            state.active_program = None;
        }
        state.commands.push(Command::DeleteProgram(program));
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let state = self.state.borrow();
        let slot = state.programs.get(&program)?.reflection.slot(name)?;
        Some(UniformLocation { program, slot })
    }

    fn use_program(&self, program: Option<ProgramHandle>) {
        let mut state = self.state.borrow_mut();
        if let Some(handle) = program {
            if !state.programs.contains_key(&handle) {
                warn!("use of unknown program #{}", handle.id());
                return;
            }
        }
        state.active_program = program;
        state.commands.push(Command::UseProgram(program));
    }

    fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
        let mut state = self.state.borrow_mut();
        if state.active_program != Some(location.program) {
            warn!(
                "ignoring uniform upload for program #{} while it is not active",
                location.program.id()
            );
            return;
        }
        let Some(record) = state.programs.get_mut(&location.program) else {
            return;
        };
        if !record.staging.write(location.slot, &value) {
            warn!(
                "ignoring {:?} upload into a {:?} uniform",
                value.kind(),
                location.slot.kind
            );
            return;
        }
        state.commands.push(Command::SetUniform {
            program: location.program,
            slot: location.slot,
            value,
        });
    }

    fn create_buffer(&self, kind: BufferKind, contents: &[u8]) -> Result<BufferHandle, SetupError> {
        if contents.is_empty() {
            return Err(SetupError::Geometry("buffers cannot be empty".into()));
        }
        let mut state = self.state.borrow_mut();
        let buffer = BufferHandle(state.allocate());
        state.buffers.insert(buffer, kind);
        state.commands.push(Command::CreateBuffer {
            buffer,
            kind,
            len: contents.len(),
        });
        Ok(buffer)
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.borrow_mut();
        if state.buffers.remove(&buffer).is_none() {
            warn!("delete of unknown buffer #{}", buffer.id());
            return;
        }
        state.commands.push(Command::DeleteBuffer(buffer));
    }

    fn create_vertex_array(
        &self,
        layout: &VertexLayout,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_count: u32,
    ) -> Result<VertexArrayHandle, SetupError> {
        let mut state = self.state.borrow_mut();
        for (buffer, expected) in [
            (vertex_buffer, BufferKind::Vertex),
            (index_buffer, BufferKind::Index),
        ] {
            match state.buffers.get(&buffer) {
                None => {
                    return Err(SetupError::UnknownHandle {
                        kind: "buffer",
                        id: buffer.id(),
                    })
                }
                Some(kind) if *kind != expected => {
                    return Err(SetupError::Geometry(format!(
                        "buffer #{} is a {kind:?} buffer, expected {expected:?}",
                        buffer.id()
                    )))
                }
                Some(_) => {}
            }
        }
        if layout.attributes().is_empty() {
            return Err(SetupError::Geometry("vertex layout has no attributes".into()));
        }
        let vertex_array = VertexArrayHandle(state.allocate());
        state
            .vertex_arrays
            .insert(vertex_array, VertexArrayRecord { index_count });
        state.commands.push(Command::CreateVertexArray(vertex_array));
        Ok(vertex_array)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayHandle) {
        let mut state = self.state.borrow_mut();
        if state.vertex_arrays.remove(&vertex_array).is_none() {
            warn!("delete of unknown vertex array #{}", vertex_array.id());
            return;
        }
        if state.bound_vertex_array == Some(vertex_array) {
            state.bound_vertex_array = None;
        }
        state.commands.push(Command::DeleteVertexArray(vertex_array));
    }

    fn bind_vertex_array(&self, vertex_array: Option<VertexArrayHandle>) {
        let mut state = self.state.borrow_mut();
        state.bound_vertex_array = vertex_array;
        state.commands.push(Command::BindVertexArray(vertex_array));
    }

    fn draw_indexed(&self, index_count: u32) {
        let mut state = self.state.borrow_mut();
        let (Some(program), Some(vertex_array)) = (state.active_program, state.bound_vertex_array)
        else {
            warn!("draw issued without an active program and vertex array");
            return;
        };
        let available = state
            .vertex_arrays
            .get(&vertex_array)
            .map(|record| record.index_count)
            .unwrap_or(0);
        if index_count > available {
            warn!("draw of {index_count} indices exceeds the {available} available");
            return;
        }
        let Some(record) = state.programs.get(&program) else {
            return;
        };
        let draw = DrawRecord {
            program,
            vertex_array,
            index_count,
            texture: state.bound_textures.get(&0).copied(),
            depth_test: state.depth_test,
            frame: state.frames_presented,
            reflection: Rc::clone(&record.reflection),
            uniforms: record.staging.clone(),
        };
        state.draws.push(draw);
        state.commands.push(Command::DrawIndexed { index_count });
    }

    fn create_texture(&self, image: &ImageData) -> Result<TextureHandle, SetupError> {
        image.validate()?;
        let levels = image.mip_chain().len();
        let mut state = self.state.borrow_mut();
        let texture = TextureHandle(state.allocate());
        state.textures.insert(
            texture,
            TextureRecord {
                image: image.clone(),
            },
        );
        state.commands.push(Command::CreateTexture {
            texture,
            width: image.width,
            height: image.height,
            levels,
        });
        debug!(
            "created {}x{} texture #{} with {levels} mip levels",
            image.width,
            image.height,
            texture.id()
        );
        Ok(texture)
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        if state.textures.remove(&texture).is_none() {
            warn!("delete of unknown texture #{}", texture.id());
            return;
        }
        state.bound_textures.retain(|_, bound| *bound != texture);
        state.commands.push(Command::DeleteTexture(texture));
    }

    fn bind_texture(&self, unit: u32, texture: Option<TextureHandle>) {
        let mut state = self.state.borrow_mut();
        match texture {
            Some(handle) if !state.textures.contains_key(&handle) => {
                warn!("bind of unknown texture #{}", handle.id());
                return;
            }
            Some(handle) => {
                state.bound_textures.insert(unit, handle);
            }
            None => {
                state.bound_textures.remove(&unit);
            }
        }
        state.commands.push(Command::BindTexture { unit, texture });
    }

    fn enable_depth_test(&self) {
        let mut state = self.state.borrow_mut();
        state.depth_test = true;
        state.commands.push(Command::EnableDepthTest);
    }

    fn set_viewport(&self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.viewport = (width, height);
        state.commands.push(Command::SetViewport { width, height });
    }

    fn clear(&self, color: [f32; 4]) {
        let mut state = self.state.borrow_mut();
        state.frame_start = state.commands.len();
        state.commands.push(Command::Clear(color));
    }

    fn present(&self) -> Result<(), FrameError> {
        let mut state = self.state.borrow_mut();
        let start = state.frame_start;
        state.commands.drain(..start);
        let frame = state.frames_presented;
        state.draws.retain(|draw| draw.frame == frame);

        state.commands.push(Command::Present);
        state.frame_start = state.commands.len();
        state.frames_presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    const VERTEX: &str = r#"
        @group(0) @binding(0) var<uniform> tint: vec3<f32>;
        @vertex fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(position * tint, 1.0);
        }
    "#;
    const FRAGMENT: &str = "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";

    fn program(ctx: &HeadlessContext) -> ProgramHandle {
        let vs = ctx.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = ctx.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        ctx.link_program(vs, fs).unwrap()
    }

    fn triangle(ctx: &HeadlessContext) -> VertexArrayHandle {
        let layout = VertexLayout::position_only();
        let vertices = [0.0f32; 9];
        let vbo = ctx
            .create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&vertices))
            .unwrap();
        let ibo = ctx
            .create_buffer(BufferKind::Index, bytemuck::cast_slice(&[0u32, 1, 2]))
            .unwrap();
        ctx.create_vertex_array(&layout, vbo, ibo, 3).unwrap()
    }

    #[test]
    fn uploads_for_inactive_programs_are_ignored() {
        let ctx = HeadlessContext::new();
        let program = program(&ctx);
        let tint = ctx.uniform_location(program, "tint").unwrap();

        ctx.set_uniform(tint, UniformValue::Vec3(Vec3::ONE));
        assert!(!ctx
            .commands()
            .iter()
            .any(|c| matches!(c, Command::SetUniform { .. })));

        ctx.use_program(Some(program));
        ctx.set_uniform(tint, UniformValue::Float(2.0));
        ctx.set_uniform(tint, UniformValue::Vec3(Vec3::X));
        let uploads = ctx
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::SetUniform { .. }))
            .count();
        assert_eq!(uploads, 1);
    }

    #[test]
    fn draws_snapshot_uniforms_at_issue_time() {
        let ctx = HeadlessContext::new();
        let program = program(&ctx);
        let vao = triangle(&ctx);
        let tint = ctx.uniform_location(program, "tint").unwrap();

        ctx.use_program(Some(program));
        ctx.bind_vertex_array(Some(vao));
        ctx.set_uniform(tint, UniformValue::Vec3(Vec3::X));
        ctx.draw_indexed(3);
        ctx.set_uniform(tint, UniformValue::Vec3(Vec3::Y));
        ctx.draw_indexed(3);

        let draws = ctx.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].uniform("tint"), Some(UniformValue::Vec3(Vec3::X)));
        assert_eq!(draws[1].uniform("tint"), Some(UniformValue::Vec3(Vec3::Y)));
    }

    #[test]
    fn draws_without_state_or_past_the_index_count_are_dropped() {
        let ctx = HeadlessContext::new();
        let program = program(&ctx);
        let vao = triangle(&ctx);
        ctx.draw_indexed(3);
        ctx.use_program(Some(program));
        ctx.bind_vertex_array(Some(vao));
        ctx.draw_indexed(6);
        assert!(ctx.draws().is_empty());
    }

    #[test]
    fn presenting_keeps_only_the_last_frame() {
        let ctx = HeadlessContext::new();
        let program = program(&ctx);
        let vao = triangle(&ctx);
        let tint = ctx.uniform_location(program, "tint").unwrap();

        for frame in 0..50 {
            ctx.clear([0.0, 0.0, 0.0, 1.0]);
            ctx.use_program(Some(program));
            ctx.bind_vertex_array(Some(vao));
            ctx.set_uniform(tint, UniformValue::Vec3(Vec3::splat(frame as f32)));
            ctx.draw_indexed(3);
            ctx.draw_indexed(3);
            ctx.present().unwrap();
        }

        let commands = ctx.commands();
        assert_eq!(commands.len(), 7);
        assert_eq!(commands.first(), Some(&Command::Clear([0.0, 0.0, 0.0, 1.0])));
        assert_eq!(commands.last(), Some(&Command::Present));
        let draws = ctx.draws();
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|draw| draw.frame == 49));
        assert_eq!(
            draws[0].uniform("tint"),
            Some(UniformValue::Vec3(Vec3::splat(49.0)))
        );
        assert_eq!(ctx.frames_presented(), 50);
    }

    #[test]
    fn double_deletes_are_not_recorded() {
        let ctx = HeadlessContext::new();
        let vbo = ctx.create_buffer(BufferKind::Vertex, &[0; 12]).unwrap();
        ctx.delete_buffer(vbo);
        ctx.delete_buffer(vbo);
        let deletes = ctx
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::DeleteBuffer(_)))
            .count();
        assert_eq!(deletes, 1);
        assert_eq!(ctx.live_objects(), LiveObjects::default());
    }

    #[test]
    fn linking_rejects_swapped_stages() {
        let ctx = HeadlessContext::new();
        let vs = ctx.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = ctx.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        assert!(matches!(ctx.link_program(fs, vs), Err(SetupError::Link(_))));
    }

    #[test]
    fn textures_keep_their_pixels() {
        let ctx = HeadlessContext::new();
        let image = ImageData::solid(2, 2, [1, 2, 3, 4]);
        let texture = ctx.create_texture(&image).unwrap();
        assert_eq!(ctx.texture_pixels(texture), Some(image));
        assert!(ctx
            .commands()
            .contains(&Command::CreateTexture {
                texture,
                width: 2,
                height: 2,
                levels: 2
            }));
    }
}
