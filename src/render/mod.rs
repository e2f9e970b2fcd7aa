//! Scene components: transforms, camera, geometry, textures, lighting and
//! the programs that consume them.

pub mod camera;
pub mod light;
pub mod material;
pub mod mesh;
pub mod model;
pub mod render_node;
pub mod shader;
pub mod texture;

pub use camera::{Camera, CameraSettings, MovementKeys, Projection};
pub use light::{AmbientLight, BaseLight, DirectionalLight, Light, PointLight};
pub use material::Material;
pub use mesh::Mesh;
pub use model::{FrameUniforms, Model};
pub use render_node::RenderNode;
pub use shader::{
    Shader, LIT_FRAGMENT_SOURCE, LIT_VERTEX_SOURCE, MAX_POINT_LIGHTS, UNLIT_FRAGMENT_SOURCE,
    UNLIT_VERTEX_SOURCE,
};
pub use texture::{Texture, PLACEHOLDER_RGBA};
