use glam::Vec3;
use log::debug;

use crate::error::FrameError;
use crate::gpu::GraphicsContext;
use crate::input::InputHandler;
use crate::render::{Camera, FrameUniforms, Light, Model, Projection};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// A named model with an optional constant spin.
pub struct SceneModel<'a> {
    pub name: String,
    pub model: Model<'a>,
    /// Degrees per second about each axis.
    pub spin: Vec3,
}

/// Everything a frame needs: camera, projection, lights and models.
pub struct Scene<'a> {
    ctx: &'a dyn GraphicsContext,
    camera: Option<Camera>,
    projection: Projection,
    lights: Vec<Light>,
    models: Vec<SceneModel<'a>>,
    frames: u64,
}

impl<'a> Scene<'a> {
    /// Creates an empty scene and turns on depth testing.
    pub fn new(ctx: &'a dyn GraphicsContext, projection: Projection) -> Self {
        ctx.enable_depth_test();
        Self {
            ctx,
            camera: None,
            projection,
            lights: Vec::new(),
            models: Vec::new(),
            frames: 0,
        }
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn add_light(&mut self, light: impl Into<Light>) {
        self.lights.push(light.into());
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut [Light] {
        &mut self.lights
    }

    pub fn add_model(&mut self, name: impl Into<String>, model: Model<'a>) -> &mut SceneModel<'a> {
        let index = self.models.len();
        self.models.push(SceneModel {
            name: name.into(),
            model,
            spin: Vec3::ZERO,
        });
        &mut self.models[index]
    }

    pub fn models(&self) -> &[SceneModel<'a>] {
        &self.models
    }

    pub fn model_mut(&mut self, name: &str) -> Option<&mut SceneModel<'a>> {
        self.models.iter_mut().find(|entry| entry.name == name)
    }

    /// Frames successfully presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Polls input once, drives the camera, then advances every spin.
    pub fn update(&mut self, delta_time: f32, input: &mut InputHandler) {
        let pointer = input.poll_pointer_delta();
        let keys = input.poll_key_events();
        if let Some(camera) = self.camera.as_mut() {
            camera.mouse_control(pointer, delta_time);
            camera.key_control(&keys, delta_time);
        }
        for entry in &mut self.models {
            if entry.spin != Vec3::ZERO {
                let step = entry.spin * delta_time;
                entry.model.node_mut().rotate_by(step.x, step.y, step.z);
            }
        }
    }

    /// Clears, draws every model and presents. Without a camera nothing is issued.
    pub fn render(&mut self) -> Result<(), FrameError> {
        let camera = self.camera.as_ref().ok_or(FrameError::MissingCamera)?;
        let frame = FrameUniforms {
            projection: self.projection.matrix(),
            view: camera.view_matrix(),
            eye_position: camera.position(),
        };
        self.ctx.clear(CLEAR_COLOR);
        for entry in &self.models {
            entry.model.render(&frame, &self.lights);
        }
        self.ctx.present()?;
        self.frames += 1;
        Ok(())
    }

    /// Updates the projection aspect and the viewport after a resize.
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("ignoring {width}x{height} resize");
            return;
        }
        self.projection.set_aspect(width, height);
        self.ctx.set_viewport(width, height);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::geometry;
    use crate::gpu::headless::{Command, HeadlessContext};
    use crate::input::{KeyCode, KeyEvent};
    use crate::render::{
        BaseLight, CameraSettings, DirectionalLight, Mesh, Shader, LIT_FRAGMENT_SOURCE,
        LIT_VERTEX_SOURCE,
    };

    fn scene(ctx: &HeadlessContext) -> Scene<'_> {
        let pyramid = geometry::pyramid();
        let mesh = Rc::new(
            Mesh::new(ctx, &pyramid.vertices, &pyramid.indices, pyramid.layout).unwrap(),
        );
        let shader = Rc::new(Shader::lit(ctx, LIT_VERTEX_SOURCE, LIT_FRAGMENT_SOURCE).unwrap());
        let mut scene = Scene::new(ctx, Projection::new(45.0, 1.25, 0.1, 100.0));
        scene.add_light(DirectionalLight::new(BaseLight::default(), 0.5, Vec3::NEG_Y));
        let model = Model::new(ctx, mesh, shader).unwrap();
        scene.add_model("pyramid", model).spin = Vec3::new(0.0, 80.0, 0.0);
        scene
    }

    #[test]
    fn missing_camera_skips_the_frame() {
        let ctx = HeadlessContext::new();
        let mut scene = scene(&ctx);
        ctx.reset_log();
        assert!(matches!(scene.render(), Err(FrameError::MissingCamera)));
        assert!(ctx.commands().is_empty());
        assert_eq!(scene.frames(), 0);
    }

    #[test]
    fn render_clears_draws_and_presents() {
        let ctx = HeadlessContext::new();
        let mut scene = scene(&ctx);
        scene.set_camera(Camera::new(CameraSettings {
            position: Vec3::new(0.0, 0.0, 2.5),
            ..CameraSettings::default()
        }));
        ctx.reset_log();
        scene.render().unwrap();

        let commands = ctx.commands();
        assert_eq!(commands.first(), Some(&Command::Clear(CLEAR_COLOR)));
        assert_eq!(commands.last(), Some(&Command::Present));
        let draws = ctx.draws();
        assert_eq!(draws.len(), 1);
        assert!(draws[0].depth_test);
        assert_eq!(scene.frames(), 1);
        assert_eq!(ctx.frames_presented(), 1);
    }

    #[test]
    fn update_drives_camera_and_spins() {
        let ctx = HeadlessContext::new();
        let mut scene = scene(&ctx);
        scene.set_camera(Camera::new(CameraSettings::default()));
        let mut input = InputHandler::new();
        input.begin_capture();
        input.handle_key(KeyEvent::pressed(KeyCode::Character('W')));

        scene.update(0.5, &mut input);
        let camera = scene.camera().unwrap();
        assert!((camera.position() - Vec3::new(0.0, 0.0, -2.5)).length() < 1e-4);
        let rotation = scene.models()[0].model.node().rotation();
        assert!((rotation.y - 40.0).abs() < 1e-4);

        // events are consumed by the first update
        scene.update(0.5, &mut input);
        let camera = scene.camera().unwrap();
        assert!((camera.position() - Vec3::new(0.0, 0.0, -2.5)).length() < 1e-4);
    }

    #[test]
    fn resize_updates_projection_and_viewport() {
        let ctx = HeadlessContext::new();
        let mut scene = scene(&ctx);
        scene.set_aspect(1000, 800);
        assert_eq!(scene.projection().aspect, 1.25);
        assert_eq!(ctx.viewport(), (1000, 800));
        scene.set_aspect(0, 800);
        assert_eq!(ctx.viewport(), (1000, 800));
    }
}
