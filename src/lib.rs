//! Real-time rendering of textured, lit meshes under a free-fly camera.
//!
//! The scene components in [`render`] talk to the GPU only through the
//! [`gpu::GraphicsContext`] capability, so the same code drives the wgpu
//! backend in a window and the recording [`gpu::headless::HeadlessContext`]
//! used by tests and window-less runs.

pub mod app;
pub mod assets;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod input;
pub mod render;
pub mod scene;

pub use config::DemoConfig;
pub use error::{FrameError, LoadError, SetupError};
pub use gpu::GraphicsContext;
pub use input::{InputHandler, KeyCode, KeyEvent, KeyState, NamedKey, PointerPosition};
pub use render::{
    AmbientLight, BaseLight, Camera, CameraSettings, DirectionalLight, FrameUniforms, Light,
    Material, Mesh, Model, PointLight, Projection, RenderNode, Shader, Texture,
};
pub use scene::{Scene, SceneModel};
