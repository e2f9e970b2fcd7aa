use glam::{Mat4, Vec3};

/// Scale, translation and Euler rotation (degrees) of a drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderNode {
    scale: Vec3,
    translation: Vec3,
    rotation: Vec3,
}

impl Default for RenderNode {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }
}

impl RenderNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Per-axis rotation in degrees, always within `[0, 360)`.
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn set_scale(&mut self, x: f32, y: f32, z: f32) {
        self.scale = Vec3::new(x, y, z);
    }

    pub fn set_translation(&mut self, x: f32, y: f32, z: f32) {
        self.translation = Vec3::new(x, y, z);
    }

    pub fn set_rotation(&mut self, x: f32, y: f32, z: f32) {
        self.rotation = wrap_degrees(Vec3::new(x, y, z));
    }

    pub fn scale_by(&mut self, x: f32, y: f32, z: f32) {
        self.scale += Vec3::new(x, y, z);
    }

    pub fn translate_by(&mut self, x: f32, y: f32, z: f32) {
        self.translation += Vec3::new(x, y, z);
    }

    pub fn rotate_by(&mut self, x: f32, y: f32, z: f32) {
        self.rotation = wrap_degrees(self.rotation + Vec3::new(x, y, z));
    }

    /// `T * Rx * Ry * Rz * S`: scale first, then rotate about Z, Y, X, then translate.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians())
            * Mat4::from_scale(self.scale)
    }
}

fn wrap_degrees(degrees: Vec3) -> Vec3 {
    let wrap = |value: f32| {
        let wrapped = value.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        if wrapped >= 360.0 {
            0.0
        } else {
            wrapped
        }
    };
    Vec3::new(wrap(degrees.x), wrap(degrees.y), wrap(degrees.z))
}
