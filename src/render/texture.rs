use log::debug;

use crate::error::SetupError;
use crate::gpu::{GraphicsContext, ImageData, TextureHandle};

/// The "missing texture" colour.
pub const PLACEHOLDER_RGBA: [u8; 4] = [255, 0, 255, 255];

/// A sampled 2D texture (repeat wrap, linear filtering, mipmapped).
pub struct Texture<'a> {
    ctx: &'a dyn GraphicsContext,
    handle: Option<TextureHandle>,
    width: u32,
    height: u32,
    placeholder: bool,
}

impl<'a> Texture<'a> {
    /// A 1x1 opaque magenta texture.
    pub fn placeholder(ctx: &'a dyn GraphicsContext) -> Result<Self, SetupError> {
        let mut texture = Self::from_image(ctx, &ImageData::solid(1, 1, PLACEHOLDER_RGBA))?;
        texture.placeholder = true;
        Ok(texture)
    }

    pub fn from_image(ctx: &'a dyn GraphicsContext, image: &ImageData) -> Result<Self, SetupError> {
        let handle = ctx.create_texture(image)?;
        debug!("texture #{} ready ({}x{})", handle.id(), image.width, image.height);
        Ok(Self {
            ctx,
            handle: Some(handle),
            width: image.width,
            height: image.height,
            placeholder: false,
        })
    }

    pub fn bind(&self, unit: u32) {
        if let Some(handle) = self.handle {
            self.ctx.bind_texture(unit, Some(handle));
        }
    }

    pub fn unbind(&self, unit: u32) {
        self.ctx.bind_texture(unit, None);
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.ctx.delete_texture(handle);
        }
    }
}

impl Drop for Texture<'_> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessContext;

    #[test]
    fn placeholder_is_one_magenta_pixel() {
        let ctx = HeadlessContext::new();
        let texture = Texture::placeholder(&ctx).unwrap();
        assert!(texture.is_placeholder());
        assert_eq!((texture.width(), texture.height()), (1, 1));
        let pixels = ctx.texture_pixels(texture.handle().unwrap()).unwrap();
        assert_eq!(pixels.pixels, PLACEHOLDER_RGBA.to_vec());
    }

    #[test]
    fn images_keep_their_dimensions() {
        let ctx = HeadlessContext::new();
        let texture = Texture::from_image(&ctx, &ImageData::solid(4, 2, [0, 0, 255, 255])).unwrap();
        assert!(!texture.is_placeholder());
        assert_eq!((texture.width(), texture.height()), (4, 2));
    }

    #[test]
    fn clear_is_idempotent() {
        let ctx = HeadlessContext::new();
        let mut texture = Texture::placeholder(&ctx).unwrap();
        texture.clear();
        texture.clear();
        drop(texture);
        assert_eq!(ctx.live_objects().textures, 0);
    }

    #[test]
    fn malformed_images_are_rejected() {
        let ctx = HeadlessContext::new();
        let image = ImageData {
            width: 3,
            height: 3,
            pixels: vec![0; 4],
        };
        assert!(matches!(
            Texture::from_image(&ctx, &image),
            Err(SetupError::Texture(_))
        ));
    }
}
