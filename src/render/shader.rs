use glam::{Mat4, Vec3};
use log::{debug, warn};

use crate::error::SetupError;
use crate::gpu::{GraphicsContext, ProgramHandle, ShaderStage, UniformLocation, UniformValue};
use crate::render::light::{AmbientLight, DirectionalLight, Light, PointLight};
use crate::render::material::Material;

/// Number of point-light slots in the lit program.
pub const MAX_POINT_LIGHTS: usize = 3;

pub const LIT_VERTEX_SOURCE: &str = include_str!("../shaders/lit.vert.wgsl");
pub const LIT_FRAGMENT_SOURCE: &str = include_str!("../shaders/lit.frag.wgsl");
pub const UNLIT_VERTEX_SOURCE: &str = include_str!("../shaders/unlit.vert.wgsl");
pub const UNLIT_FRAGMENT_SOURCE: &str = include_str!("../shaders/unlit.frag.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSlots {
    pub model: UniformLocation,
    pub projection: UniformLocation,
    pub view: UniformLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseLightSlots {
    pub color: UniformLocation,
    pub intensity: UniformLocation,
    pub diffuse_intensity: UniformLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionalLightSlots {
    pub base: BaseLightSlots,
    pub direction: UniformLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointLightSlots {
    pub base: BaseLightSlots,
    pub position: UniformLocation,
    pub constant: UniformLocation,
    pub linear: UniformLocation,
    pub exponent: UniformLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialSlots {
    pub specular_intensity: UniformLocation,
    pub shininess: UniformLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingSlots {
    pub eye_position: UniformLocation,
    pub directional: DirectionalLightSlots,
    pub point_lights: Vec<PointLightSlots>,
    pub point_light_count: UniformLocation,
    pub material: MaterialSlots,
}

/// A linked GPU program plus every uniform slot the renderer writes to.
pub struct Shader<'a> {
    ctx: &'a dyn GraphicsContext,
    program: Option<ProgramHandle>,
    transforms: TransformSlots,
    lighting: Option<LightingSlots>,
}

impl<'a> Shader<'a> {
    /// Builds the lit program: transforms, eye position, one directional light,
    /// [`MAX_POINT_LIGHTS`] point lights and a material.
    pub fn lit(
        ctx: &'a dyn GraphicsContext,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, SetupError> {
        let program = build_program(ctx, vertex_source, fragment_source)?;
        let slots = SlotResolver { ctx, program };
        let resolved = slots.transforms().and_then(|transforms| {
            let lighting = slots.lighting()?;
            Ok((transforms, lighting))
        });
        match resolved {
            Ok((transforms, lighting)) => Ok(Self {
                ctx,
                program: Some(program),
                transforms,
                lighting: Some(lighting),
            }),
            Err(err) => {
                ctx.delete_program(program);
                Err(err)
            }
        }
    }

    /// Builds a program that only needs the `model`, `projection` and `view` transforms.
    pub fn unlit(
        ctx: &'a dyn GraphicsContext,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, SetupError> {
        let program = build_program(ctx, vertex_source, fragment_source)?;
        match (SlotResolver { ctx, program }).transforms() {
            Ok(transforms) => Ok(Self {
                ctx,
                program: Some(program),
                transforms,
                lighting: None,
            }),
            Err(err) => {
                ctx.delete_program(program);
                Err(err)
            }
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lighting.is_some()
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn transform_slots(&self) -> &TransformSlots {
        &self.transforms
    }

    pub fn lighting_slots(&self) -> Option<&LightingSlots> {
        self.lighting.as_ref()
    }

    /// Makes this program the target of subsequent uniform uploads and draws.
    pub fn activate(&self) {
        if let Some(program) = self.program {
            self.ctx.use_program(Some(program));
        }
    }

    pub fn set_transforms(&self, model: Mat4, projection: Mat4, view: Mat4) {
        self.ctx
            .set_uniform(self.transforms.model, UniformValue::Mat4(model));
        self.ctx
            .set_uniform(self.transforms.projection, UniformValue::Mat4(projection));
        self.ctx
            .set_uniform(self.transforms.view, UniformValue::Mat4(view));
    }

    pub fn set_eye_position(&self, eye: Vec3) {
        if let Some(lighting) = &self.lighting {
            self.ctx
                .set_uniform(lighting.eye_position, UniformValue::Vec3(eye));
        }
    }

    pub fn set_material(&self, material: &Material) {
        if let Some(lighting) = &self.lighting {
            material.apply(self.ctx, &lighting.material);
        }
    }

    pub fn set_ambient_light(&self, light: &AmbientLight) {
        if let Some(lighting) = &self.lighting {
            light.apply(self.ctx, &lighting.directional);
        }
    }

    pub fn set_directional_light(&self, light: &DirectionalLight) {
        if let Some(lighting) = &self.lighting {
            light.apply(self.ctx, &lighting.directional);
        }
    }

    /// Uploads up to [`MAX_POINT_LIGHTS`] lights and the resulting `pointLightCount`.
    pub fn set_point_lights(&self, lights: &[PointLight]) {
        let Some(lighting) = &self.lighting else {
            return;
        };
        if lights.len() > MAX_POINT_LIGHTS {
            warn!(
                "{} point lights supplied, only the first {MAX_POINT_LIGHTS} are used",
                lights.len()
            );
        }
        let used = lights.len().min(MAX_POINT_LIGHTS);
        for (light, slots) in lights.iter().zip(&lighting.point_lights) {
            light.apply(self.ctx, slots);
        }
        self.ctx.set_uniform(
            lighting.point_light_count,
            UniformValue::Int(used as i32),
        );
    }

    /// Uploads a mixed light list.
    ///
    /// Ambient and directional lights share the directional slots. A
    /// directional light takes them over regardless of list order; an ambient
    /// light is only uploaded when the list has no directional light.
    pub fn apply_lights(&self, lights: &[Light]) {
        if self.lighting.is_none() {
            return;
        }
        let mut ambient = None;
        let mut directional = None;
        let mut points = Vec::new();
        for light in lights {
            match light {
                Light::Ambient(light) => ambient = Some(light),
                Light::Directional(light) => {
                    if directional.replace(light).is_some() {
                        warn!("only one directional light is supported, using the last one");
                    }
                }
                Light::Point(point) => points.push(*point),
            }
        }
        match (directional, ambient) {
            (Some(directional), ambient) => {
                if ambient.is_some() {
                    warn!(
                        "ambient light ignored: the directional light already supplies the ambient term"
                    );
                }
                self.set_directional_light(directional);
            }
            (None, Some(ambient)) => self.set_ambient_light(ambient),
            (None, None) => {}
        }
        self.set_point_lights(&points);
    }

    pub fn clear(&mut self) {
        if let Some(program) = self.program.take() {
            self.ctx.delete_program(program);
        }
    }
}

impl Drop for Shader<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn build_program(
    ctx: &dyn GraphicsContext,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<ProgramHandle, SetupError> {
    let vertex = ctx.compile_shader(ShaderStage::Vertex, vertex_source)?;
    let fragment = match ctx.compile_shader(ShaderStage::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(err) => {
            ctx.delete_shader(vertex);
            return Err(err);
        }
    };
    let linked = ctx.link_program(vertex, fragment);
    ctx.delete_shader(vertex);
    ctx.delete_shader(fragment);
    let program = linked?;
    debug!("shader program #{} linked", program.id());
    Ok(program)
}

struct SlotResolver<'c> {
    ctx: &'c dyn GraphicsContext,
    program: ProgramHandle,
}

impl SlotResolver<'_> {
    fn get(&self, name: &str) -> Result<UniformLocation, SetupError> {
        self.ctx
            .uniform_location(self.program, name)
            .ok_or_else(|| SetupError::MissingUniform {
                name: name.to_string(),
            })
    }

    fn transforms(&self) -> Result<TransformSlots, SetupError> {
        Ok(TransformSlots {
            model: self.get("model")?,
            projection: self.get("projection")?,
            view: self.get("view")?,
        })
    }

    fn base_light(&self, prefix: &str) -> Result<BaseLightSlots, SetupError> {
        Ok(BaseLightSlots {
            color: self.get(&format!("{prefix}.base.color"))?,
            intensity: self.get(&format!("{prefix}.base.intensity"))?,
            diffuse_intensity: self.get(&format!("{prefix}.base.diffuseIntensity"))?,
        })
    }

    fn lighting(&self) -> Result<LightingSlots, SetupError> {
        let directional = DirectionalLightSlots {
            base: self.base_light("directionalLight")?,
            direction: self.get("directionalLight.direction")?,
        };
        let point_lights = (0..MAX_POINT_LIGHTS)
            .map(|index| {
                let prefix = format!("pointLights[{index}]");
                Ok(PointLightSlots {
                    base: self.base_light(&prefix)?,
                    position: self.get(&format!("{prefix}.position"))?,
                    constant: self.get(&format!("{prefix}.constant"))?,
                    linear: self.get(&format!("{prefix}.linear"))?,
                    exponent: self.get(&format!("{prefix}.exponent"))?,
                })
            })
            .collect::<Result<Vec<_>, SetupError>>()?;
        Ok(LightingSlots {
            eye_position: self.get("eyePos")?,
            directional,
            point_lights,
            point_light_count: self.get("pointLightCount")?,
            material: MaterialSlots {
                specular_intensity: self.get("material.specularIntensity")?,
                shininess: self.get("material.shininess")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessContext, LiveObjects};
    use crate::render::light::BaseLight;

    fn lit(ctx: &HeadlessContext) -> Shader<'_> {
        Shader::lit(ctx, LIT_VERTEX_SOURCE, LIT_FRAGMENT_SOURCE).unwrap()
    }

    #[test]
    fn lit_shader_resolves_every_slot() {
        let ctx = HeadlessContext::new();
        let shader = lit(&ctx);
        let lighting = shader.lighting_slots().unwrap();
        assert_eq!(lighting.point_lights.len(), MAX_POINT_LIGHTS);
        assert_eq!(lighting.point_lights[2].position.slot.offset, 2 * 64 + 32);
        // stage objects are released once the program is linked
        assert_eq!(ctx.live_objects().shaders, 0);
        assert_eq!(ctx.live_objects().programs, 1);
    }

    #[test]
    fn missing_uniform_is_a_setup_failure() {
        let ctx = HeadlessContext::new();
        let fragment = LIT_FRAGMENT_SOURCE.replace("shininess", "glossiness");
        match Shader::lit(&ctx, LIT_VERTEX_SOURCE, &fragment) {
            Err(SetupError::MissingUniform { name }) => assert_eq!(name, "material.shininess"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("shader built without material.shininess"),
        }
        assert_eq!(ctx.live_objects(), LiveObjects::default());
    }

    #[test]
    fn broken_sources_fail_to_compile() {
        let ctx = HeadlessContext::new();
        let broken = LIT_FRAGMENT_SOURCE.replace("struct Material {", "struct Material");
        assert!(matches!(
            Shader::lit(&ctx, LIT_VERTEX_SOURCE, &broken),
            Err(SetupError::Compile {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
        let no_entry = LIT_VERTEX_SOURCE.replace("@vertex", "");
        assert!(matches!(
            Shader::lit(&ctx, &no_entry, LIT_FRAGMENT_SOURCE),
            Err(SetupError::Compile {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
        assert_eq!(ctx.live_objects(), LiveObjects::default());
    }

    #[test]
    fn unlit_shader_needs_only_transforms() {
        let ctx = HeadlessContext::new();
        let shader = Shader::unlit(&ctx, UNLIT_VERTEX_SOURCE, UNLIT_FRAGMENT_SOURCE).unwrap();
        assert!(!shader.is_lit());
        assert!(Shader::lit(&ctx, UNLIT_VERTEX_SOURCE, UNLIT_FRAGMENT_SOURCE).is_err());
    }

    #[test]
    fn extra_point_lights_are_truncated() {
        let ctx = HeadlessContext::new();
        let shader = lit(&ctx);
        let lights: Vec<PointLight> = (0..5)
            .map(|i| PointLight::new(BaseLight::default(), 1.0, Vec3::splat(i as f32)))
            .collect();
        shader.activate();
        shader.set_point_lights(&lights);

        let lighting = shader.lighting_slots().unwrap();
        let uploads: Vec<_> = ctx
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                crate::gpu::headless::Command::SetUniform { slot, value, .. } => {
                    Some((slot, value))
                }
                _ => None,
            })
            .collect();
        assert!(uploads.contains(&(
            lighting.point_light_count.slot,
            UniformValue::Int(MAX_POINT_LIGHTS as i32)
        )));
        assert!(uploads.contains(&(
            lighting.point_lights[2].position.slot,
            UniformValue::Vec3(Vec3::splat(2.0))
        )));
        assert!(!uploads.contains(&(
            lighting.point_lights[2].position.slot,
            UniformValue::Vec3(Vec3::splat(3.0))
        )));
    }

    #[test]
    fn dropping_releases_the_program() {
        let ctx = HeadlessContext::new();
        let mut shader = lit(&ctx);
        shader.clear();
        shader.clear();
        drop(shader);
        assert_eq!(ctx.live_objects().programs, 0);
    }

    #[test]
    fn directional_light_wins_over_ambient_in_any_order() {
        let ctx = HeadlessContext::new();
        let shader = lit(&ctx);
        let program = shader.program().unwrap();
        let directional = DirectionalLight::new(BaseLight::default(), 0.6, Vec3::NEG_Z);
        let ambient = AmbientLight::new(Vec3::new(0.1, 0.1, 0.1), 0.3);
        shader.activate();

        shader.apply_lights(&[directional.into(), ambient.into()]);
        assert_eq!(
            ctx.staged_uniform(program, "directionalLight.base.diffuseIntensity"),
            Some(UniformValue::Float(0.6))
        );
        assert_eq!(
            ctx.staged_uniform(program, "directionalLight.base.color"),
            Some(UniformValue::Vec3(Vec3::ONE))
        );

        shader.apply_lights(&[ambient.into()]);
        assert_eq!(
            ctx.staged_uniform(program, "directionalLight.base.diffuseIntensity"),
            Some(UniformValue::Float(0.0))
        );
        assert_eq!(
            ctx.staged_uniform(program, "directionalLight.base.intensity"),
            Some(UniformValue::Float(0.3))
        );
        assert_eq!(
            ctx.staged_uniform(program, "pointLightCount"),
            Some(UniformValue::Int(0))
        );
    }
}
