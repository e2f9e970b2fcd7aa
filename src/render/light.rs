use glam::Vec3;

use crate::gpu::{GraphicsContext, UniformValue};
use crate::render::shader::{BaseLightSlots, DirectionalLightSlots, PointLightSlots};

/// Colour and intensity shared by every light variant.
///
/// Colour channels are clamped to `[0, 1]`; intensity is an open-range scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseLight {
    color: Vec3,
    intensity: f32,
}

impl Default for BaseLight {
    fn default() -> Self {
        Self::new(Vec3::ONE, 1.0)
    }
}

impl BaseLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color: color.clamp(Vec3::ZERO, Vec3::ONE),
            intensity,
        }
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn set_color(&mut self, r: f32, g: f32, b: f32) {
        self.color = Vec3::new(r, g, b).clamp(Vec3::ZERO, Vec3::ONE);
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
    }

    fn apply(&self, ctx: &dyn GraphicsContext, slots: &BaseLightSlots, diffuse_intensity: f32) {
        ctx.set_uniform(slots.color, UniformValue::Vec3(self.color));
        ctx.set_uniform(slots.intensity, UniformValue::Float(self.intensity));
        ctx.set_uniform(slots.diffuse_intensity, UniformValue::Float(diffuse_intensity));
    }
}

/// Uniform light with no direction. Shares the directional light's slots with
/// a zero diffuse term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmbientLight {
    pub base: BaseLight,
}

impl AmbientLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            base: BaseLight::new(color, intensity),
        }
    }

    pub fn apply(&self, ctx: &dyn GraphicsContext, slots: &DirectionalLightSlots) {
        self.base.apply(ctx, &slots.base, 0.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub base: BaseLight,
    pub diffuse_intensity: f32,
    pub direction: Vec3,
}

impl DirectionalLight {
    pub fn new(base: BaseLight, diffuse_intensity: f32, direction: Vec3) -> Self {
        Self {
            base,
            diffuse_intensity,
            direction,
        }
    }

    pub fn apply(&self, ctx: &dyn GraphicsContext, slots: &DirectionalLightSlots) {
        self.base.apply(ctx, &slots.base, self.diffuse_intensity);
        ctx.set_uniform(slots.direction, UniformValue::Vec3(self.direction));
    }
}

/// Positional light with `1 / (exponent*d^2 + linear*d + constant)` falloff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub base: BaseLight,
    pub diffuse_intensity: f32,
    pub position: Vec3,
    pub constant: f32,
    pub linear: f32,
    pub exponent: f32,
}

impl PointLight {
    /// A light without distance falloff (`constant = 1`, `linear = exponent = 0`).
    pub fn new(base: BaseLight, diffuse_intensity: f32, position: Vec3) -> Self {
        Self {
            base,
            diffuse_intensity,
            position,
            constant: 1.0,
            linear: 0.0,
            exponent: 0.0,
        }
    }

    pub fn with_attenuation(mut self, constant: f32, linear: f32, exponent: f32) -> Self {
        self.constant = constant;
        self.linear = linear;
        self.exponent = exponent;
        self
    }

    pub fn apply(&self, ctx: &dyn GraphicsContext, slots: &PointLightSlots) {
        self.base.apply(ctx, &slots.base, self.diffuse_intensity);
        ctx.set_uniform(slots.position, UniformValue::Vec3(self.position));
        ctx.set_uniform(slots.constant, UniformValue::Float(self.constant));
        ctx.set_uniform(slots.linear, UniformValue::Float(self.linear));
        ctx.set_uniform(slots.exponent, UniformValue::Float(self.exponent));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Ambient(AmbientLight),
    Directional(DirectionalLight),
    Point(PointLight),
}

impl Light {
    pub fn base(&self) -> &BaseLight {
        match self {
            Self::Ambient(light) => &light.base,
            Self::Directional(light) => &light.base,
            Self::Point(light) => &light.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseLight {
        match self {
            Self::Ambient(light) => &mut light.base,
            Self::Directional(light) => &mut light.base,
            Self::Point(light) => &mut light.base,
        }
    }

    pub fn color(&self) -> Vec3 {
        self.base().color()
    }

    pub fn set_color(&mut self, r: f32, g: f32, b: f32) {
        self.base_mut().set_color(r, g, b);
    }

    pub fn intensity(&self) -> f32 {
        self.base().intensity()
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.base_mut().set_intensity(intensity);
    }
}

impl From<AmbientLight> for Light {
    fn from(light: AmbientLight) -> Self {
        Self::Ambient(light)
    }
}

impl From<DirectionalLight> for Light {
    fn from(light: DirectionalLight) -> Self {
        Self::Directional(light)
    }
}

impl From<PointLight> for Light {
    fn from(light: PointLight) -> Self {
        Self::Point(light)
    }
}
