use std::path::PathBuf;

use clap::Parser;

use crate::input::KeyCode;
use crate::render::{CameraSettings, MovementKeys};

/// Frames rendered by a headless run when `--frames` is not given.
pub const DEFAULT_HEADLESS_FRAMES: u64 = 60;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "prism-render",
    version,
    about = "Two textured, lit pyramids under a free-fly camera"
)]
pub struct DemoConfig {
    /// Window width in physical pixels
    #[arg(long, default_value_t = 1000)]
    pub width: u32,

    /// Window height in physical pixels
    #[arg(long, default_value_t = 800)]
    pub height: u32,

    /// Vertical field of view in degrees
    #[arg(long, default_value_t = 45.0)]
    pub fov: f32,

    /// Albedo texture (PNG or JPEG); repeat once per pyramid
    #[arg(long = "texture", value_name = "PATH")]
    pub textures: Vec<PathBuf>,

    /// WGSL vertex stage replacing the built-in one
    #[arg(long, value_name = "PATH")]
    pub vertex_shader: Option<PathBuf>,

    /// WGSL fragment stage replacing the built-in one
    #[arg(long, value_name = "PATH")]
    pub fragment_shader: Option<PathBuf>,

    /// Camera speed in world units per second
    #[arg(long, default_value_t = 5.0)]
    pub move_speed: f32,

    /// Camera turn rate in degrees per pointer unit per second
    #[arg(long, default_value_t = 100.0)]
    pub turn_speed: f32,

    #[arg(long, default_value = "W", value_parser = parse_key)]
    pub forward: KeyCode,

    #[arg(long, default_value = "S", value_parser = parse_key)]
    pub back: KeyCode,

    #[arg(long, default_value = "A", value_parser = parse_key)]
    pub left: KeyCode,

    #[arg(long, default_value = "D", value_parser = parse_key)]
    pub right: KeyCode,

    /// Use the position-only shader without lighting or textures
    #[arg(long)]
    pub unlit: bool,

    /// Render without a window
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many frames (headless runs default to 60)
    #[arg(long)]
    pub frames: Option<u64>,
}

impl DemoConfig {
    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    pub fn movement_keys(&self) -> MovementKeys {
        MovementKeys {
            forward: self.forward,
            back: self.back,
            left: self.left,
            right: self.right,
        }
    }

    /// Camera defaults with the configured speeds and bindings applied.
    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            movement_speed: self.move_speed,
            turn_speed: self.turn_speed,
            keys: self.movement_keys(),
            ..CameraSettings::default()
        }
    }

    pub fn headless_frames(&self) -> u64 {
        self.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES)
    }
}

fn parse_key(name: &str) -> Result<KeyCode, String> {
    KeyCode::from_name(name).ok_or_else(|| format!("unknown key name '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::NamedKey;

    #[test]
    fn defaults_match_the_demo() {
        let config = DemoConfig::parse_from(["prism-render"]);
        assert_eq!((config.width, config.height), (1000, 800));
        assert_eq!(config.fov, 45.0);
        assert_eq!(config.aspect(), 1.25);
        assert_eq!(config.movement_keys(), MovementKeys::default());
        assert!(config.textures.is_empty());
        assert_eq!(config.headless_frames(), DEFAULT_HEADLESS_FRAMES);
    }

    #[test]
    fn parses_bindings_and_repeated_textures() {
        let config = DemoConfig::parse_from([
            "prism-render",
            "--forward",
            "ArrowUp",
            "--left",
            "KeyQ",
            "--texture",
            "a.png",
            "--texture",
            "b.jpg",
            "--headless",
            "--frames",
            "3",
        ]);
        assert_eq!(config.forward, KeyCode::Named(NamedKey::Up));
        assert_eq!(config.left, KeyCode::Character('Q'));
        assert_eq!(config.textures.len(), 2);
        assert!(config.headless);
        assert_eq!(config.headless_frames(), 3);
        assert_eq!(config.camera_settings().keys.forward, config.forward);
    }

    #[test]
    fn rejects_unknown_key_names() {
        assert!(DemoConfig::try_parse_from(["prism-render", "--back", "Hyper"]).is_err());
    }
}
