use std::rc::Rc;

use anyhow::{Context, Result};
use glam::Vec3;
use log::{error, info};

use crate::assets::LoadedAssets;
use crate::config::DemoConfig;
use crate::geometry;
use crate::gpu::GraphicsContext;
use crate::render::{
    BaseLight, Camera, CameraSettings, DirectionalLight, Material, Mesh, Model, PointLight,
    Projection, Shader, Texture, LIT_FRAGMENT_SOURCE, LIT_VERTEX_SOURCE, UNLIT_FRAGMENT_SOURCE,
    UNLIT_VERTEX_SOURCE,
};
use crate::scene::Scene;

pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 100.0;
/// Spin of both pyramids about Y, in degrees per second.
pub const SPIN_SPEED: f32 = 80.0;
pub const CAMERA_START: Vec3 = Vec3::new(0.0, 0.0, 2.5);
/// Longest frame delta fed to the simulation, in seconds.
pub const MAX_FRAME_DELTA: f32 = 0.1;
/// Fixed step used when rendering without a window.
pub const HEADLESS_FRAME_DELTA: f32 = 1.0 / 60.0;

struct PyramidSpec {
    name: &'static str,
    translation: Vec3,
    rotation: Vec3,
    material: Material,
}

fn pyramids() -> [PyramidSpec; 2] {
    [
        PyramidSpec {
            name: "pyramid-0",
            translation: Vec3::new(0.0, -0.5, 0.0),
            rotation: Vec3::new(180.0, 0.0, 0.0),
            material: Material::new(4.0, 256.0),
        },
        PyramidSpec {
            name: "pyramid-1",
            translation: Vec3::new(0.0, 0.5, 0.0),
            rotation: Vec3::ZERO,
            material: Material::new(0.3, 4.0),
        },
    ]
}

/// Builds the demo: two spinning pyramids sharing one mesh and one program,
/// a directional light and two coloured point lights.
///
/// Pyramid `i` is textured with the `i`-th loaded texture; missing or failed
/// textures leave the placeholder in place.
pub fn build_demo_scene<'a>(
    ctx: &'a dyn GraphicsContext,
    config: &DemoConfig,
    assets: LoadedAssets,
) -> Result<Scene<'a>> {
    let vertex_source = assets.vertex_shader.and_then(|loaded| loaded.ok_or_log());
    let fragment_source = assets.fragment_shader.and_then(|loaded| loaded.ok_or_log());
    let (shader, geometry) = if config.unlit {
        let shader = Shader::unlit(
            ctx,
            vertex_source.as_deref().unwrap_or(UNLIT_VERTEX_SOURCE),
            fragment_source.as_deref().unwrap_or(UNLIT_FRAGMENT_SOURCE),
        );
        (shader, geometry::pyramid_positions())
    } else {
        let shader = Shader::lit(
            ctx,
            vertex_source.as_deref().unwrap_or(LIT_VERTEX_SOURCE),
            fragment_source.as_deref().unwrap_or(LIT_FRAGMENT_SOURCE),
        );
        (shader, geometry::pyramid())
    };
    let shader = Rc::new(shader.context("failed to build the shader program")?);
    let mesh = Rc::new(
        Mesh::new(ctx, &geometry.vertices, &geometry.indices, geometry.layout)
            .context("failed to upload the pyramid mesh")?,
    );

    let mut textures = Vec::new();
    for loaded in assets.textures {
        let path = loaded.path.clone();
        let texture = loaded
            .ok_or_log()
            .and_then(|image| match Texture::from_image(ctx, &image) {
                Ok(texture) => Some(Rc::new(texture)),
                Err(err) => {
                    error!("{}: {err}; keeping the placeholder", path.display());
                    None
                }
            });
        textures.push(texture);
    }

    let projection = Projection::new(config.fov, config.aspect(), NEAR_PLANE, FAR_PLANE);
    let mut scene = Scene::new(ctx, projection);
    scene.set_camera(Camera::new(CameraSettings {
        position: CAMERA_START,
        ..config.camera_settings()
    }));

    scene.add_light(DirectionalLight::new(
        BaseLight::new(Vec3::ONE, 0.2),
        0.6,
        Vec3::new(2.0, -1.0, -2.0),
    ));
    let blue = BaseLight::new(Vec3::new(0.0, 0.0, 1.0), 0.0);
    scene.add_light(
        PointLight::new(blue, 1.0, Vec3::new(1.5, 0.0, 0.0)).with_attenuation(0.3, 0.2, 0.1),
    );
    let green = BaseLight::new(Vec3::new(0.0, 1.0, 0.0), 0.0);
    scene.add_light(
        PointLight::new(green, 1.0, Vec3::new(-1.5, 1.0, 0.0)).with_attenuation(0.3, 0.1, 0.1),
    );

    for (index, spec) in pyramids().into_iter().enumerate() {
        let mut model = Model::new(ctx, Rc::clone(&mesh), Rc::clone(&shader))
            .with_context(|| format!("failed to create {}", spec.name))?;
        if let Some(Some(texture)) = textures.get(index) {
            model.set_albedo(Rc::clone(texture));
        }
        model.set_material(spec.material);
        let node = model.node_mut();
        node.set_translation(spec.translation.x, spec.translation.y, spec.translation.z);
        node.set_scale(0.45, 0.45, 0.45);
        node.set_rotation(spec.rotation.x, spec.rotation.y, spec.rotation.z);
        scene.add_model(spec.name, model).spin = Vec3::new(0.0, SPIN_SPEED, 0.0);
    }

    info!(
        "demo scene ready on the {} backend ({} models, {} lights)",
        ctx.backend_name(),
        scene.models().len(),
        scene.lights().len()
    );
    Ok(scene)
}

/// Average frame time and rate over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSummary {
    pub average_frame_time: f32,
    pub fps: f32,
}

/// Accumulates frame deltas and reports them every `interval` seconds.
#[derive(Debug, Clone)]
pub struct FrameStats {
    interval: f32,
    elapsed: f32,
    total: f32,
    frames: u32,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl FrameStats {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            elapsed: 0.0,
            total: 0.0,
            frames: 0,
        }
    }

    /// Records one frame. Once the window has elapsed the summary is logged,
    /// returned and the window restarts.
    pub fn record(&mut self, delta_time: f32) -> Option<FrameSummary> {
        self.elapsed += delta_time;
        self.total += delta_time;
        self.frames += 1;
        if self.elapsed < self.interval {
            return None;
        }
        let average_frame_time = self.total / self.frames as f32;
        let fps = if average_frame_time > 0.0 {
            1.0 / average_frame_time
        } else {
            0.0
        };
        self.elapsed = 0.0;
        self.total = 0.0;
        self.frames = 0;
        info!("{fps:05.2} FPS, {:.3} ms", average_frame_time * 1000.0);
        Some(FrameSummary {
            average_frame_time,
            fps,
        })
    }
}

/// One line per model plus the camera, as printed on exit.
pub fn final_state_lines(scene: &Scene<'_>) -> Vec<String> {
    let mut lines = vec!["Final model states:".to_string()];
    for entry in scene.models() {
        let node = entry.model.node();
        let (t, r, s) = (node.translation(), node.rotation(), node.scale());
        let albedo = entry.model.albedo();
        let texture = if albedo.is_placeholder() {
            "placeholder".to_string()
        } else {
            format!("{}x{}", albedo.width(), albedo.height())
        };
        lines.push(format!(
            " - {} pos=({:.2}, {:.2}, {:.2}) rot=({:.2}, {:.2}, {:.2}) scale=({:.2}, {:.2}, {:.2}) texture={texture}",
            entry.name, t.x, t.y, t.z, r.x, r.y, r.z, s.x, s.y, s.z
        ));
    }
    if let Some(camera) = scene.camera() {
        let p = camera.position();
        lines.push(format!(
            " - camera pos=({:.2}, {:.2}, {:.2}) yaw={:.2} pitch={:.2}",
            p.x,
            p.y,
            p.z,
            camera.yaw(),
            camera.pitch()
        ));
    }
    lines
}

pub fn print_final_state(scene: &Scene<'_>) {
    for line in final_state_lines(scene) {
        println!("{line}");
    }
}
