use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::ShaderStage;

/// Fatal failures while building GPU resources. Startup aborts on any of these.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("graphics capability unavailable: {0}")]
    Capability(String),
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("shader program failed to link: {0}")]
    Link(String),
    #[error("failed to get uniform location for '{name}'")]
    MissingUniform { name: String },
    #[error("invalid geometry: {0}")]
    Geometry(String),
    #[error("invalid texture: {0}")]
    Texture(String),
    #[error("unknown {kind} handle #{id}")]
    UnknownHandle { kind: &'static str, id: u32 },
}

/// Asset fetch or decode failures. These are recovered by falling back to defaults.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("loader for {} panicked", path.display())]
    Panicked { path: PathBuf },
}

/// Per-frame failures. The frame is skipped and the loop keeps running.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no camera has been attached to the scene")]
    MissingCamera,
    #[error("surface lost or outdated")]
    SurfaceLost,
    #[error("surface acquisition timed out")]
    Timeout,
    #[error("GPU is out of memory")]
    OutOfMemory,
}
