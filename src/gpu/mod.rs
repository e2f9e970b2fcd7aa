//! The graphics capability consumed by the scene components.
//!
//! Components never talk to a GPU API directly. They hold a borrowed
//! [`GraphicsContext`] and issue GL-style commands through it: compile and
//! link programs, resolve uniform slots by name, upload uniform values, create
//! buffers and textures, and draw indexed triangles. Two backends implement
//! the trait: [`headless::HeadlessContext`] records everything for tests and
//! window-less runs, [`native::WgpuContext`] drives wgpu.

pub mod headless;
pub mod native;
pub mod reflect;
pub mod uniforms;

use std::fmt;
use std::path::Path;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use image::imageops::FilterType;
use image::RgbaImage;

use crate::error::{FrameError, LoadError, SetupError};

pub use reflect::UniformSlot;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn id(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// A compiled but unlinked shader stage.
    ShaderHandle
);
handle!(
    /// A linked program made of a vertex and a fragment stage.
    ProgramHandle
);
handle!(
    /// A vertex or index buffer.
    BufferHandle
);
handle!(
    /// Vertex attribute state bound to a vertex and an index buffer.
    VertexArrayHandle
);
handle!(
    /// A sampled 2D texture with its mip chain.
    TextureHandle
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// One float attribute inside an interleaved vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u32,
    pub offset: u32,
}

/// Interleaved `f32` vertex layout shared by a mesh and the pipelines drawing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Builds a tightly packed layout from per-attribute component counts.
    /// Locations are assigned in order starting at zero.
    pub fn packed(components: &[u32]) -> Self {
        let mut offset = 0;
        let attributes = components
            .iter()
            .enumerate()
            .map(|(location, &components)| {
                let attribute = VertexAttribute {
                    location: location as u32,
                    components,
                    offset,
                };
                offset += components * std::mem::size_of::<f32>() as u32;
                attribute
            })
            .collect();
        Self { attributes }
    }

    /// Position (3), texture coordinate (2), normal (3).
    pub fn lit() -> Self {
        Self::packed(&[3, 2, 3])
    }

    /// Position (3) only.
    pub fn position_only() -> Self {
        Self::packed(&[3])
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn floats_per_vertex(&self) -> usize {
        self.attributes.iter().map(|a| a.components as usize).sum()
    }

    pub fn stride(&self) -> u32 {
        (self.floats_per_vertex() * std::mem::size_of::<f32>()) as u32
    }
}

/// Shape of a single uniform slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl UniformKind {
    /// Number of bytes a value of this kind occupies in a uniform block.
    pub fn byte_len(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::UInt => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Int(_) => UniformKind::Int,
            Self::UInt(_) => UniformKind::UInt,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat3(_) => UniformKind::Mat3,
            Self::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Encodes the value with uniform address space padding (mat3 columns take 16 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Float(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Int(v) => bytemuck::bytes_of(v).to_vec(),
            Self::UInt(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Mat3(m) => bytemuck::cast_slice(&mat3_to_3x4(*m)).to_vec(),
            Self::Mat4(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
        }
    }

    /// Decodes a value previously written by [`UniformValue::to_bytes`].
    pub fn from_bytes(kind: UniformKind, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < kind.byte_len() {
            return None;
        }
        let floats = |count: usize| -> Vec<f32> {
            bytes[..count * 4]
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()
        };
        Some(match kind {
            UniformKind::Float => Self::Float(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformKind::Int => Self::Int(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformKind::UInt => Self::UInt(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformKind::Vec2 => Self::Vec2(Vec2::from_slice(&floats(2))),
            UniformKind::Vec3 => Self::Vec3(Vec3::from_slice(&floats(3))),
            UniformKind::Vec4 => Self::Vec4(Vec4::from_slice(&floats(4))),
            UniformKind::Mat3 => {
                let f = floats(12);
                Self::Mat3(Mat3::from_cols(
                    Vec3::from_slice(&f[0..3]),
                    Vec3::from_slice(&f[4..7]),
                    Vec3::from_slice(&f[8..11]),
                ))
            }
            UniformKind::Mat4 => Self::Mat4(Mat4::from_cols_slice(&floats(16))),
        })
    }
}

fn mat3_to_3x4(matrix: Mat3) -> [[f32; 4]; 3] {
    let cols = matrix.to_cols_array();
    [
        [cols[0], cols[1], cols[2], 0.0],
        [cols[3], cols[4], cols[5], 0.0],
        [cols[6], cols[7], cols[8], 0.0],
    ]
}

/// A resolved uniform slot. Only valid for the program it was resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    pub program: ProgramHandle,
    pub slot: UniformSlot,
}

/// Decoded RGBA8 image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// A single-colour image.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decodes PNG or JPEG bytes into RGBA8.
    pub fn decode(path: &Path, bytes: &[u8]) -> Result<Self, LoadError> {
        let image = image::load_from_memory(bytes).map_err(|source| LoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = image.to_rgba8();
        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }

    /// Reads and decodes an image file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(path, &bytes)
    }

    /// Checks that the pixel buffer matches the dimensions.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.width == 0 || self.height == 0 {
            return Err(SetupError::Texture("image has zero area".into()));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(SetupError::Texture(format!(
                "expected {expected} bytes of RGBA data for {}x{}, got {}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }

    /// Returns the full mip chain, level 0 first, halving down to 1x1.
    pub fn mip_chain(&self) -> Vec<ImageData> {
        let mut levels = vec![self.clone()];
        let Some(base) = RgbaImage::from_raw(self.width, self.height, self.pixels.clone()) else {
            return levels;
        };
        let (mut width, mut height) = (self.width, self.height);
        while width > 1 || height > 1 {
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            let level = image::imageops::resize(&base, width, height, FilterType::Triangle);
            levels.push(ImageData {
                width,
                height,
                pixels: level.into_raw(),
            });
        }
        levels
    }
}

/// GL-style command surface over a GPU device.
///
/// All methods take `&self`: backends keep their state behind interior
/// mutability so that every component can hold the same shared borrow.
pub trait GraphicsContext {
    fn backend_name(&self) -> &'static str;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, SetupError>;
    fn delete_shader(&self, shader: ShaderHandle);
    fn link_program(
        &self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, SetupError>;
    fn delete_program(&self, program: ProgramHandle);
    /// Looks up a uniform by its flattened name, e.g. `pointLights[0].base.color`.
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn use_program(&self, program: Option<ProgramHandle>);
    /// Uploads to the active program. Uploads for any other program are ignored.
    fn set_uniform(&self, location: UniformLocation, value: UniformValue);

    fn create_buffer(&self, kind: BufferKind, contents: &[u8]) -> Result<BufferHandle, SetupError>;
    fn delete_buffer(&self, buffer: BufferHandle);
    fn create_vertex_array(
        &self,
        layout: &VertexLayout,
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_count: u32,
    ) -> Result<VertexArrayHandle, SetupError>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayHandle);
    fn bind_vertex_array(&self, vertex_array: Option<VertexArrayHandle>);
    /// Draws `index_count` indices of the bound vertex array as triangles.
    fn draw_indexed(&self, index_count: u32);

    /// Uploads the image and its generated mip chain.
    fn create_texture(&self, image: &ImageData) -> Result<TextureHandle, SetupError>;
    fn delete_texture(&self, texture: TextureHandle);
    fn bind_texture(&self, unit: u32, texture: Option<TextureHandle>);

    fn enable_depth_test(&self);
    fn set_viewport(&self, width: u32, height: u32);
    fn clear(&self, color: [f32; 4]);
    /// Submits the frame's draws.
    fn present(&self) -> Result<(), FrameError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lit_layout_matches_interleaved_contract() {
        let layout = VertexLayout::lit();
        assert_eq!(layout.floats_per_vertex(), 8);
        assert_eq!(layout.stride(), 32);
        let offsets: Vec<u32> = layout.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        assert_eq!(VertexLayout::position_only().stride(), 12);
    }

    #[test]
    fn mat3_values_are_padded_per_column() {
        let value = UniformValue::Mat3(Mat3::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0,
        ]));
        let bytes = value.to_bytes();
        assert_eq!(bytes.len(), UniformKind::Mat3.byte_len());
        assert_eq!(UniformValue::from_bytes(UniformKind::Mat3, &bytes), Some(value));
    }

    #[test]
    fn mip_chain_halves_to_one_pixel() {
        let image = ImageData::solid(4, 2, [10, 20, 30, 255]);
        let sizes: Vec<(u32, u32)> = image
            .mip_chain()
            .iter()
            .map(|level| (level.width, level.height))
            .collect();
        assert_eq!(sizes, vec![(4, 2), (2, 1), (1, 1)]);
    }

    #[test]
    fn validate_rejects_short_pixel_buffers() {
        let image = ImageData {
            width: 2,
            height: 2,
            pixels: vec![0; 4],
        };
        assert!(image.validate().is_err());
    }
}
