use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::error::SetupError;
use crate::gpu::GraphicsContext;
use crate::render::light::Light;
use crate::render::material::Material;
use crate::render::mesh::Mesh;
use crate::render::render_node::RenderNode;
use crate::render::shader::Shader;
use crate::render::texture::Texture;

/// Per-frame values every model shares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub eye_position: Vec3,
}

/// A drawable: shared mesh, shader and albedo, plus its own transform and material.
pub struct Model<'a> {
    ctx: &'a dyn GraphicsContext,
    mesh: Rc<Mesh<'a>>,
    shader: Rc<Shader<'a>>,
    albedo: Rc<Texture<'a>>,
    material: Option<Material>,
    node: RenderNode,
}

impl<'a> Model<'a> {
    /// Creates a model at the origin textured with the placeholder.
    pub fn new(
        ctx: &'a dyn GraphicsContext,
        mesh: Rc<Mesh<'a>>,
        shader: Rc<Shader<'a>>,
    ) -> Result<Self, SetupError> {
        let albedo = Rc::new(Texture::placeholder(ctx)?);
        Ok(Self {
            ctx,
            mesh,
            shader,
            albedo,
            material: None,
            node: RenderNode::default(),
        })
    }

    pub fn set_albedo(&mut self, texture: Rc<Texture<'a>>) {
        self.albedo = texture;
    }

    pub fn albedo(&self) -> &Rc<Texture<'a>> {
        &self.albedo
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = Some(material);
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn shader(&self) -> &Rc<Shader<'a>> {
        &self.shader
    }

    pub fn mesh(&self) -> &Rc<Mesh<'a>> {
        &self.mesh
    }

    pub fn node(&self) -> &RenderNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut RenderNode {
        &mut self.node
    }

    /// Uploads this model's uniforms and issues its draw. Lights and material
    /// are skipped for unlit shaders.
    pub fn render(&self, frame: &FrameUniforms, lights: &[Light]) {
        let shader = &self.shader;
        shader.activate();
        shader.set_transforms(self.node.model_matrix(), frame.projection, frame.view);
        if shader.is_lit() {
            shader.set_eye_position(frame.eye_position);
            shader.apply_lights(lights);
            shader.set_material(&self.material.unwrap_or_default());
        }
        self.albedo.bind(0);
        self.mesh.render();
        self.albedo.unbind(0);
        self.ctx.use_program(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{Command, HeadlessContext};
    use crate::gpu::{ImageData, UniformValue, VertexLayout};
    use crate::render::light::{BaseLight, DirectionalLight, PointLight};
    use crate::render::shader::{LIT_FRAGMENT_SOURCE, LIT_VERTEX_SOURCE};

    const QUAD: [f32; 32] = [
        -1.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
        1.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, //
        1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, //
        -1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0,
    ];

    fn frame() -> FrameUniforms {
        FrameUniforms {
            projection: Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0),
            view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y),
            eye_position: Vec3::new(0.0, 0.0, 3.0),
        }
    }

    fn parts(ctx: &HeadlessContext) -> (Rc<Mesh<'_>>, Rc<Shader<'_>>) {
        let mesh = Mesh::new(ctx, &QUAD, &[0, 1, 2, 2, 3, 0], VertexLayout::lit()).unwrap();
        let shader = Shader::lit(ctx, LIT_VERTEX_SOURCE, LIT_FRAGMENT_SOURCE).unwrap();
        (Rc::new(mesh), Rc::new(shader))
    }

    #[test]
    fn new_models_use_the_placeholder() {
        let ctx = HeadlessContext::new();
        let (mesh, shader) = parts(&ctx);
        let model = Model::new(&ctx, mesh, shader).unwrap();
        assert!(model.albedo().is_placeholder());
        assert_eq!(model.node().translation(), Vec3::ZERO);
        assert!(model.material().is_none());
    }

    #[test]
    fn render_binds_uploads_draws_and_unbinds() {
        let ctx = HeadlessContext::new();
        let (mesh, shader) = parts(&ctx);
        let model = Model::new(&ctx, mesh, shader).unwrap();
        ctx.reset_log();
        model.render(&frame(), &[]);

        let commands = ctx.commands();
        assert!(matches!(commands.first(), Some(Command::UseProgram(Some(_)))));
        let draw_at = commands
            .iter()
            .position(|c| matches!(c, Command::DrawIndexed { index_count: 6 }))
            .unwrap();
        let texture_at = commands
            .iter()
            .position(|c| matches!(c, Command::BindTexture { unit: 0, texture: Some(_) }))
            .unwrap();
        assert!(texture_at < draw_at);
        assert!(commands[..draw_at]
            .iter()
            .any(|c| matches!(c, Command::SetUniform { .. })));
        assert_eq!(commands.last(), Some(&Command::UseProgram(None)));
        assert_eq!(ctx.active_program(), None);
    }

    #[test]
    fn each_draw_sees_its_own_transform_and_material() {
        let ctx = HeadlessContext::new();
        let (mesh, shader) = parts(&ctx);
        let mut left = Model::new(&ctx, Rc::clone(&mesh), Rc::clone(&shader)).unwrap();
        let mut right = Model::new(&ctx, mesh, shader).unwrap();
        left.node_mut().set_translation(-1.0, 0.0, 0.0);
        left.set_material(Material::new(4.0, 256.0));
        right.node_mut().set_translation(1.0, 0.0, 0.0);
        right.set_material(Material::new(0.3, 4.0));

        let lights = [
            DirectionalLight::new(BaseLight::new(Vec3::ONE, 0.2), 0.6, Vec3::NEG_Z).into(),
            PointLight::new(BaseLight::new(Vec3::X, 0.1), 1.0, Vec3::Y).into(),
        ];
        left.render(&frame(), &lights);
        right.render(&frame(), &lights);

        let draws = ctx.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(
            draws[0].uniform("model"),
            Some(UniformValue::Mat4(Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0))))
        );
        assert_eq!(
            draws[1].uniform("material.shininess"),
            Some(UniformValue::Float(4.0))
        );
        assert_eq!(
            draws[0].uniform("material.shininess"),
            Some(UniformValue::Float(256.0))
        );
        assert_eq!(draws[1].uniform("pointLightCount"), Some(UniformValue::Int(1)));
        assert_eq!(
            draws[1].uniform("eyePos"),
            Some(UniformValue::Vec3(Vec3::new(0.0, 0.0, 3.0)))
        );
    }

    #[test]
    fn shared_textures_are_drawn_with_each_model() {
        let ctx = HeadlessContext::new();
        let (mesh, shader) = parts(&ctx);
        let texture = Rc::new(
            Texture::from_image(&ctx, &ImageData::solid(2, 2, [10, 20, 30, 255])).unwrap(),
        );
        let mut model = Model::new(&ctx, mesh, shader).unwrap();
        model.set_albedo(Rc::clone(&texture));
        model.render(&frame(), &[]);
        assert_eq!(ctx.draws()[0].texture, texture.handle());
    }
}
