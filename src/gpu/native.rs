use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, error, info, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use crate::error::{FrameError, SetupError};
use crate::gpu::reflect::{self, ProgramReflection, StageReflection};
use crate::gpu::uniforms::UniformStaging;
use crate::gpu::{
    BufferHandle, BufferKind, GraphicsContext, ImageData, ProgramHandle, ShaderHandle,
    ShaderStage, TextureHandle, UniformLocation, UniformValue, VertexArrayHandle, VertexLayout,
};

/// wgpu implementation of the graphics capability, bound to one window.
///
/// Commands are recorded between `clear` and `present`; `present` encodes the
/// whole frame into a single render pass with one uniform bind group per draw.
pub struct WgpuContext {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: RefCell<wgpu::SurfaceConfiguration>,
    depth: RefCell<DepthBuffer>,
    sampler: wgpu::Sampler,
    state: RefCell<State>,
}

struct CompiledStage {
    module: Rc<wgpu::ShaderModule>,
    reflection: StageReflection,
}

struct Program {
    vertex: Rc<wgpu::ShaderModule>,
    fragment: Rc<wgpu::ShaderModule>,
    reflection: Rc<ProgramReflection>,
    staging: UniformStaging,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(VertexLayout, bool), Rc<wgpu::RenderPipeline>>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    kind: BufferKind,
}

struct VertexArray {
    layout: VertexLayout,
    vertex: BufferHandle,
    index: BufferHandle,
    index_count: u32,
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct PendingDraw {
    program: ProgramHandle,
    vertex_array: VertexArrayHandle,
    index_count: u32,
    texture: Option<TextureHandle>,
    depth_test: bool,
    uniforms: UniformStaging,
}

struct PreparedDraw {
    pipeline: Rc<wgpu::RenderPipeline>,
    uniforms: wgpu::BindGroup,
    texture: Option<wgpu::BindGroup>,
    vertex: BufferHandle,
    index: BufferHandle,
    index_count: u32,
}

#[derive(Default)]
struct State {
    next_id: u32,
    shaders: HashMap<ShaderHandle, CompiledStage>,
    programs: HashMap<ProgramHandle, Program>,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArray>,
    textures: HashMap<TextureHandle, GpuTexture>,
    active_program: Option<ProgramHandle>,
    bound_vertex_array: Option<VertexArrayHandle>,
    bound_textures: BTreeMap<u32, TextureHandle>,
    depth_test: bool,
    viewport: Option<(u32, u32)>,
    clear_color: [f32; 4],
    pending: Vec<PendingDraw>,
}

impl State {
    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl WgpuContext {
    /// Acquires an adapter and device for the window and configures its surface.
    pub async fn new(window: Arc<Window>) -> Result<Self, SetupError> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(SetupError::Capability("window has zero area".into()));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| SetupError::Capability(format!("failed to create surface: {err}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SetupError::Capability("no compatible GPU adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("prism-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|err| SetupError::Capability(format!("failed to create device: {err}")))?;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| error!("wgpu: {err}")));

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| SetupError::Capability("surface reports no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let depth = DepthBuffer::create(&device, config.width, config.height);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("albedo-sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        info!(
            "using {} ({:?}) with surface format {format:?}",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config: RefCell::new(config),
            depth: RefCell::new(depth),
            sampler,
            state: RefCell::new(State {
                clear_color: [0.0, 0.0, 0.0, 1.0],
                ..State::default()
            }),
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        let config = self.config.borrow();
        PhysicalSize::new(config.width, config.height)
    }

    /// Reconfigures the surface and depth buffer for the new size.
    pub fn resize(&self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        let mut config = self.config.borrow_mut();
        config.width = new_size.width;
        config.height = new_size.height;
        self.surface.configure(&self.device, &config);
        *self.depth.borrow_mut() =
            DepthBuffer::create(&self.device, new_size.width, new_size.height);
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config.borrow());
    }

    fn scoped<T>(&self, create: impl FnOnce() -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    fn pipeline(
        &self,
        program: &mut Program,
        layout: &VertexLayout,
        depth_test: bool,
    ) -> Option<Rc<wgpu::RenderPipeline>> {
        let key = (layout.clone(), depth_test);
        if let Some(pipeline) = program.pipelines.get(&key) {
            return Some(Rc::clone(pipeline));
        }

        let attributes: Vec<wgpu::VertexAttribute> = layout
            .attributes()
            .iter()
            .map(|attribute| wgpu::VertexAttribute {
                format: match attribute.components {
                    1 => wgpu::VertexFormat::Float32,
                    2 => wgpu::VertexFormat::Float32x2,
                    3 => wgpu::VertexFormat::Float32x3,
                    _ => wgpu::VertexFormat::Float32x4,
                },
                offset: attribute.offset as u64,
                shader_location: attribute.location,
            })
            .collect();
        let format = self.config.borrow().format;

        let created = self.scoped(|| {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("program-pipeline"),
                    layout: Some(&program.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &program.vertex,
                        entry_point: &program.reflection.vertex_entry,
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: layout.stride() as u64,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &attributes,
                        }],
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DepthBuffer::FORMAT,
                        depth_write_enabled: depth_test,
                        depth_compare: if depth_test {
                            wgpu::CompareFunction::Less
                        } else {
                            wgpu::CompareFunction::Always
                        },
                        stencil: Default::default(),
                        bias: Default::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &program.fragment,
                        entry_point: &program.reflection.fragment_entry,
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    multiview: None,
                })
        });

        match created {
            Ok(pipeline) => {
                let pipeline = Rc::new(pipeline);
                program.pipelines.insert(key, Rc::clone(&pipeline));
                debug!("created pipeline for stride {} depth={depth_test}", layout.stride());
                Some(pipeline)
            }
            Err(err) => {
                error!("failed to create render pipeline: {err}");
                None
            }
        }
    }

    fn prepare(&self, state: &mut State, draw: &PendingDraw) -> Option<PreparedDraw> {
        let Some(vertex_array) = state.vertex_arrays.get(&draw.vertex_array) else {
            warn!("skipping draw: vertex array #{} was deleted", draw.vertex_array.id());
            return None;
        };
        let (layout, vertex, index) = (
            vertex_array.layout.clone(),
            vertex_array.vertex,
            vertex_array.index,
        );
        if !state.buffers.contains_key(&vertex) || !state.buffers.contains_key(&index) {
            warn!("skipping draw: its buffers were deleted");
            return None;
        }
        let texture_view = draw
            .texture
            .and_then(|texture| state.textures.get(&texture))
            .map(|texture| &texture.view);

        let Some(program) = state.programs.get_mut(&draw.program) else {
            warn!("skipping draw: program #{} was deleted", draw.program.id());
            return None;
        };
        let pipeline = self.pipeline(program, &layout, draw.depth_test)?;

        let buffers: Vec<(u32, wgpu::Buffer)> = draw
            .uniforms
            .buffers()
            .map(|(binding, bytes)| {
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("draw-uniforms"),
                        contents: bytes,
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                (binding, buffer)
            })
            .collect();
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniforms = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw-uniform-group"),
            layout: &program.uniform_layout,
            entries: &entries,
        });

        let texture = match (&program.texture_layout, program.reflection.texture()) {
            (Some(texture_layout), Some(binding)) => {
                let Some(view) = texture_view else {
                    warn!("skipping draw: program samples a texture but none is bound");
                    return None;
                };
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("draw-texture-group"),
                    layout: texture_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: binding.texture,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: binding.sampler,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                }))
            }
            _ => None,
        };

        Some(PreparedDraw {
            pipeline,
            uniforms,
            texture,
            vertex,
            index,
            index_count: draw.index_count,
        })
    }
}

impl GraphicsContext for WgpuContext {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, SetupError> {
        let compile_error = |log: String| SetupError::Compile { stage, log };
        let reflection =
            reflect::reflect_stage(stage, source).map_err(|err| compile_error(err.to_string()))?;
        let module = self
            .scoped(|| {
                self.device
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(match stage {
                            ShaderStage::Vertex => "vertex-stage",
                            ShaderStage::Fragment => "fragment-stage",
                        }),
                        source: wgpu::ShaderSource::Wgsl(source.into()),
                    })
            })
            .map_err(compile_error)?;

        let mut state = self.state.borrow_mut();
        let shader = ShaderHandle(state.allocate());
        state.shaders.insert(
            shader,
            CompiledStage {
                module: Rc::new(module),
                reflection,
            },
        );
        debug!("compiled {stage} shader #{}", shader.id());
        Ok(shader)
    }

    fn delete_shader(&self, shader: ShaderHandle) {
        if self.state.borrow_mut().shaders.remove(&shader).is_none() {
            warn!("delete of unknown shader #{}", shader.id());
        }
    }

    fn link_program(
        &self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, SetupError> {
        let mut state = self.state.borrow_mut();
        let lookup = |handle: ShaderHandle, expected: ShaderStage| {
            let compiled = state.shaders.get(&handle).ok_or(SetupError::UnknownHandle {
                kind: "shader",
                id: handle.id(),
            })?;
            if compiled.reflection.stage != expected {
                return Err(SetupError::Link(format!(
                    "shader #{} is a {} stage, expected {expected}",
                    handle.id(),
                    compiled.reflection.stage
                )));
            }
            Ok(compiled)
        };
        let vertex_stage = lookup(vertex, ShaderStage::Vertex)?;
        let fragment_stage = lookup(fragment, ShaderStage::Fragment)?;
        let reflection = reflect::link(&vertex_stage.reflection, &fragment_stage.reflection)
            .map_err(|err| SetupError::Link(err.to_string()))?;
        let (vertex_module, fragment_module) = (
            Rc::clone(&vertex_stage.module),
            Rc::clone(&fragment_stage.module),
        );

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
            .blocks()
            .iter()
            .map(|block| wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(block.size as u64),
                },
                count: None,
            })
            .collect();

        let layouts = self
            .scoped(|| {
                let uniform_layout =
                    self.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some("program-uniform-layout"),
                            entries: &uniform_entries,
                        });
                let texture_layout = reflection.texture().map(|binding| {
                    self.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some("program-texture-layout"),
                            entries: &[
                                wgpu::BindGroupLayoutEntry {
                                    binding: binding.texture,
                                    visibility: wgpu::ShaderStages::FRAGMENT,
                                    ty: wgpu::BindingType::Texture {
                                        sample_type: wgpu::TextureSampleType::Float {
                                            filterable: true,
                                        },
                                        view_dimension: wgpu::TextureViewDimension::D2,
                                        multisampled: false,
                                    },
                                    count: None,
                                },
                                wgpu::BindGroupLayoutEntry {
                                    binding: binding.sampler,
                                    visibility: wgpu::ShaderStages::FRAGMENT,
                                    ty: wgpu::BindingType::Sampler(
                                        wgpu::SamplerBindingType::Filtering,
                                    ),
                                    count: None,
                                },
                            ],
                        })
                });
                let pipeline_layout = {
                    let mut groups = vec![&uniform_layout];
                    if let Some(texture_layout) = texture_layout.as_ref() {
                        groups.push(texture_layout);
                    }
                    self.device
                        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                            label: Some("program-pipeline-layout"),
                            bind_group_layouts: &groups,
                            push_constant_ranges: &[],
                        })
                };
                (uniform_layout, texture_layout, pipeline_layout)
            })
            .map_err(SetupError::Link)?;
        let (uniform_layout, texture_layout, pipeline_layout) = layouts;

        let program = ProgramHandle(state.allocate());
        state.programs.insert(
            program,
            Program {
                vertex: vertex_module,
                fragment: fragment_module,
                staging: UniformStaging::for_program(&reflection),
                reflection: Rc::new(reflection),
                uniform_layout,
                texture_layout,
                pipeline_layout,
                pipelines: HashMap::new(),
            },
        );
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
        if let Some(program) = state.programs.get_mut(&location.program) {
            if !program.staging.write(location.slot, &value) {
                warn!(
                    "ignoring {:?} upload into a {:?} uniform",
                    value.kind(),
                    location.slot.kind
                );
            }
        }
    }

    fn create_buffer(&self, kind: BufferKind, contents: &[u8]) -> Result<BufferHandle, SetupError> {
        if contents.is_empty() {
            return Err(SetupError::Geometry("buffers cannot be empty".into()));
        }
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(match kind {
                    BufferKind::Vertex => "mesh-vertices",
                    BufferKind::Index => "mesh-indices",
                }),
                contents,
                usage,
            });
        let mut state = self.state.borrow_mut();
        let handle = BufferHandle(state.allocate());
        state.buffers.insert(handle, GpuBuffer { buffer, kind });
        Ok(handle)
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        match self.state.borrow_mut().buffers.remove(&buffer) {
            Some(gpu) => gpu.buffer.destroy(),
            None => warn!("delete of unknown buffer #{}", buffer.id()),
        }
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
                Some(gpu) if gpu.kind != expected => {
                    return Err(SetupError::Geometry(format!(
                        "buffer #{} is a {:?} buffer, expected {expected:?}",
                        buffer.id(),
                        gpu.kind
                    )))
                }
                Some(_) => {}
            }
        }
        if layout.attributes().is_empty() {
            return Err(SetupError::Geometry("vertex layout has no attributes".into()));
        }
        let handle = VertexArrayHandle(state.allocate());
        state.vertex_arrays.insert(
            handle,
            VertexArray {
                layout: layout.clone(),
                vertex: vertex_buffer,
                index: index_buffer,
                index_count,
            },
        );
        Ok(handle)
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
    }

    fn bind_vertex_array(&self, vertex_array: Option<VertexArrayHandle>) {
        self.state.borrow_mut().bound_vertex_array = vertex_array;
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
        let Some(uniforms) = state
            .programs
            .get(&program)
            .map(|record| record.staging.clone())
        else {
            return;
        };
        let draw = PendingDraw {
            program,
            vertex_array,
            index_count,
            texture: state.bound_textures.get(&0).copied(),
            depth_test: state.depth_test,
            uniforms,
        };
        state.pending.push(draw);
    }

    fn create_texture(&self, image: &ImageData) -> Result<TextureHandle, SetupError> {
        image.validate()?;
        let levels = image.mip_chain();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("albedo-texture"),
            size: wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (level, data) in levels.iter().enumerate() {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data.pixels,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * data.width),
                    rows_per_image: Some(data.height),
                },
                wgpu::Extent3d {
                    width: data.width,
                    height: data.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.state.borrow_mut();
        let handle = TextureHandle(state.allocate());
        state.textures.insert(
            handle,
            GpuTexture {
                _texture: texture,
                view,
            },
        );
        debug!(
            "uploaded {}x{} texture #{} with {} mip levels",
            image.width,
            image.height,
            handle.id(),
            levels.len()
        );
        Ok(handle)
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        if state.textures.remove(&texture).is_none() {
            warn!("delete of unknown texture #{}", texture.id());
            return;
        }
        state.bound_textures.retain(|_, bound| *bound != texture);
    }

    fn bind_texture(&self, unit: u32, texture: Option<TextureHandle>) {
        let mut state = self.state.borrow_mut();
        match texture {
            Some(handle) if !state.textures.contains_key(&handle) => {
                warn!("bind of unknown texture #{}", handle.id());
            }
            Some(handle) => {
                state.bound_textures.insert(unit, handle);
            }
            None => {
                state.bound_textures.remove(&unit);
            }
        }
    }

    fn enable_depth_test(&self) {
        self.state.borrow_mut().depth_test = true;
    }

    fn set_viewport(&self, width: u32, height: u32) {
        self.state.borrow_mut().viewport = Some((width, height));
    }

    fn clear(&self, color: [f32; 4]) {
        let mut state = self.state.borrow_mut();
        state.clear_color = color;
        state.pending.clear();
    }

    fn present(&self) -> Result<(), FrameError> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                self.state.borrow_mut().pending.clear();
                return Err(match err {
                    wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                        self.reconfigure();
                        FrameError::SurfaceLost
                    }
                    wgpu::SurfaceError::Timeout => FrameError::Timeout,
                    wgpu::SurfaceError::OutOfMemory => FrameError::OutOfMemory,
                });
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        let prepared: Vec<PreparedDraw> = pending
            .iter()
            .filter_map(|draw| self.prepare(&mut state, draw))
            .collect();
        let state = &*state;

        let (width, height) = {
            let config = self.config.borrow();
            (config.width, config.height)
        };
        let depth = self.depth.borrow();
        let [r, g, b, a] = state.clear_color.map(f64::from);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("frame-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some((w, h)) = state.viewport {
            pass.set_viewport(
                0.0,
                0.0,
                w.min(width) as f32,
                h.min(height) as f32,
                0.0,
                1.0,
            );
        }

        for draw in &prepared {
            let (Some(vertex), Some(index)) =
                (state.buffers.get(&draw.vertex), state.buffers.get(&draw.index))
            else {
                continue;
            };
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &draw.uniforms, &[]);
            if let Some(texture) = draw.texture.as_ref() {
                pass.set_bind_group(1, texture, &[]);
            }
            pass.set_vertex_buffer(0, vertex.buffer.slice(..));
            pass.set_index_buffer(index.buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..draw.index_count, 0, 0..1);
        }

        drop(pass);
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}
