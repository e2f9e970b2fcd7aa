use std::collections::BTreeMap;

use crate::gpu::reflect::{ProgramReflection, UniformSlot};
use crate::gpu::UniformValue;

/// CPU copy of every uniform buffer a program binds, keyed by binding.
///
/// Backends write loose uniform uploads into the staging area of the active
/// program and snapshot it when a draw is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformStaging {
    buffers: BTreeMap<u32, Vec<u8>>,
}

impl UniformStaging {
    /// Zero-initialised buffers sized for each of the program's uniform blocks.
    pub fn for_program(reflection: &ProgramReflection) -> Self {
        let buffers = reflection
            .blocks()
            .iter()
            .map(|block| (block.binding, vec![0u8; block.size as usize]))
            .collect();
        Self { buffers }
    }

    /// Writes `value` at the slot. Returns `false` when the value kind does not
    /// match the slot or the slot does not belong to this staging area.
    pub fn write(&mut self, slot: UniformSlot, value: &UniformValue) -> bool {
        if value.kind() != slot.kind {
            return false;
        }
        let Some(buffer) = self.buffers.get_mut(&slot.binding) else {
            return false;
        };
        let bytes = value.to_bytes();
        let start = slot.offset as usize;
        let Some(target) = buffer.get_mut(start..start + bytes.len()) else {
            return false;
        };
        target.copy_from_slice(&bytes);
        true
    }

    pub fn read(&self, slot: UniformSlot) -> Option<UniformValue> {
        let buffer = self.buffers.get(&slot.binding)?;
        let start = slot.offset as usize;
        let bytes = buffer.get(start..start + slot.kind.byte_len())?;
        UniformValue::from_bytes(slot.kind, bytes)
    }

    pub fn buffer(&self, binding: u32) -> Option<&[u8]> {
        self.buffers.get(&binding).map(Vec::as_slice)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.buffers
            .iter()
            .map(|(binding, bytes)| (*binding, bytes.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};

    use super::*;
    use crate::gpu::reflect::{link, reflect_stage};
    use crate::gpu::{ShaderStage, UniformKind};

    fn program() -> ProgramReflection {
        let vertex = reflect_stage(
            ShaderStage::Vertex,
            r#"
            @group(0) @binding(0) var<uniform> model: mat4x4<f32>;
            @group(0) @binding(3) var<uniform> eyePos: vec3<f32>;
            @vertex fn vs_main() {}
            "#,
        )
        .unwrap();
        let fragment = reflect_stage(ShaderStage::Fragment, "@fragment fn fs_main() {}").unwrap();
        link(&vertex, &fragment).unwrap()
    }

    #[test]
    fn writes_land_at_slot_offsets() {
        let reflection = program();
        let mut staging = UniformStaging::for_program(&reflection);
        let eye = reflection.slot("eyePos").unwrap();
        let model = reflection.slot("model").unwrap();

        assert!(staging.write(eye, &UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        assert!(staging.write(model, &UniformValue::Mat4(Mat4::from_scale(Vec3::splat(2.0)))));

        assert_eq!(
            staging.read(eye),
            Some(UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(staging.buffer(3).map(<[u8]>::len), Some(16));
        assert_eq!(staging.buffer(0).map(<[u8]>::len), Some(64));
    }

    #[test]
    fn mismatched_kinds_are_rejected() {
        let reflection = program();
        let mut staging = UniformStaging::for_program(&reflection);
        let eye = reflection.slot("eyePos").unwrap();
        assert_eq!(eye.kind, UniformKind::Vec3);
        assert!(!staging.write(eye, &UniformValue::Float(1.0)));
        assert_eq!(staging.read(eye), Some(UniformValue::Vec3(Vec3::ZERO)));
    }
}
