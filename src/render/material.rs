use crate::gpu::{GraphicsContext, UniformValue};
use crate::render::shader::MaterialSlots;

/// Specular response of a surface. Both values are floored at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Material {
    specular_intensity: f32,
    shininess: f32,
}

impl Material {
    pub fn new(specular_intensity: f32, shininess: f32) -> Self {
        Self {
            specular_intensity: specular_intensity.max(0.0),
            shininess: shininess.max(0.0),
        }
    }

    pub fn specular_intensity(&self) -> f32 {
        self.specular_intensity
    }

    pub fn shininess(&self) -> f32 {
        self.shininess
    }

    pub fn apply(&self, ctx: &dyn GraphicsContext, slots: &MaterialSlots) {
        ctx.set_uniform(
            slots.specular_intensity,
            UniformValue::Float(self.specular_intensity),
        );
        ctx.set_uniform(slots.shininess, UniformValue::Float(self.shininess));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_values_are_floored() {
        let material = Material::new(-1.0, -32.0);
        assert_eq!(material.specular_intensity(), 0.0);
        assert_eq!(material.shininess(), 0.0);
        assert_eq!(Material::new(4.0, 256.0).shininess(), 256.0);
    }
}
