//! Two-phase asset loading.
//!
//! Every file is read and decoded on its own thread while the GPU is being set
//! up; [`PendingAssets::join`] is the barrier after which all results are
//! visible at once. Uploading to the GPU stays on the render thread.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::error::LoadError;
use crate::gpu::ImageData;

/// Files to load before the first frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRequest {
    pub textures: Vec<PathBuf>,
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

impl AssetRequest {
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.vertex_shader.is_none() && self.fragment_shader.is_none()
    }
}

/// Outcome of one asset load.
#[derive(Debug)]
pub struct Loaded<T> {
    pub path: PathBuf,
    pub result: Result<T, LoadError>,
}

impl<T> Loaded<T> {
    /// Returns the value, logging the failure and yielding `None` otherwise.
    pub fn ok_or_log(self) -> Option<T> {
        match self.result {
            Ok(value) => Some(value),
            Err(err) => {
                error!("{err}; falling back to the default");
                None
            }
        }
    }
}

#[derive(Debug)]
pub struct LoadedAssets {
    pub textures: Vec<Loaded<ImageData>>,
    pub vertex_shader: Option<Loaded<String>>,
    pub fragment_shader: Option<Loaded<String>>,
}

enum Task<T> {
    Running(JoinHandle<Result<T, LoadError>>),
    NotStarted(std::io::Error),
}

struct PendingLoad<T> {
    path: PathBuf,
    task: Task<T>,
}

impl<T: Send + 'static> PendingLoad<T> {
    fn start(path: PathBuf, load: fn(&Path) -> Result<T, LoadError>) -> Self {
        let thread_path = path.clone();
        let task = thread::Builder::new()
            .name(format!("asset:{}", path.display()))
            .spawn(move || load(&thread_path));
        Self {
            path,
            task: match task {
                Ok(handle) => Task::Running(handle),
                Err(err) => Task::NotStarted(err),
            },
        }
    }

    fn join(self) -> Loaded<T> {
        let result = match self.task {
            Task::Running(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(LoadError::Panicked {
                    path: self.path.clone(),
                }),
            },
            Task::NotStarted(source) => Err(LoadError::Io {
                path: self.path.clone(),
                source,
            }),
        };
        if result.is_ok() {
            debug!("loaded {}", self.path.display());
        }
        Loaded {
            path: self.path,
            result,
        }
    }
}

/// Loads in flight. Nothing is observable until [`PendingAssets::join`].
pub struct PendingAssets {
    textures: Vec<PendingLoad<ImageData>>,
    vertex_shader: Option<PendingLoad<String>>,
    fragment_shader: Option<PendingLoad<String>>,
}

/// Starts one loader thread per requested file.
pub fn spawn(request: AssetRequest) -> PendingAssets {
    PendingAssets {
        textures: request
            .textures
            .into_iter()
            .map(|path| PendingLoad::start(path, ImageData::load))
            .collect(),
        vertex_shader: request
            .vertex_shader
            .map(|path| PendingLoad::start(path, read_source)),
        fragment_shader: request
            .fragment_shader
            .map(|path| PendingLoad::start(path, read_source)),
    }
}

impl PendingAssets {
    /// Waits for every loader. Results keep the request order.
    pub fn join(self) -> LoadedAssets {
        LoadedAssets {
            textures: self.textures.into_iter().map(PendingLoad::join).collect(),
            vertex_shader: self.vertex_shader.map(PendingLoad::join),
            fragment_shader: self.fragment_shader.map(PendingLoad::join),
        }
    }
}

fn read_source(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn results_keep_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_png(dir.path(), "first.png", 4, 2);
        let second = write_png(dir.path(), "second.png", 1, 1);
        let loaded = spawn(AssetRequest {
            textures: vec![first.clone(), second.clone()],
            ..AssetRequest::default()
        })
        .join();

        assert_eq!(loaded.textures[0].path, first);
        assert_eq!(loaded.textures[1].path, second);
        let image = loaded.textures[0].result.as_ref().unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(&image.pixels[..4], &[200, 100, 50, 255]);
    }

    #[test]
    fn failures_are_reported_per_asset() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.png");
        std::fs::File::create(&corrupt)
            .unwrap()
            .write_all(b"definitely not a png")
            .unwrap();
        let good = write_png(dir.path(), "good.png", 2, 2);
        let loaded = spawn(AssetRequest {
            textures: vec![corrupt, dir.path().join("missing.png"), good],
            ..AssetRequest::default()
        })
        .join();

        assert!(matches!(
            loaded.textures[0].result,
            Err(LoadError::Decode { .. })
        ));
        assert!(matches!(loaded.textures[1].result, Err(LoadError::Io { .. })));
        assert!(loaded.textures[2].result.is_ok());
    }

    #[test]
    fn shader_sources_are_read_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.frag.wgsl");
        std::fs::write(&path, "@fragment fn fs_main() {}").unwrap();
        let loaded = spawn(AssetRequest {
            fragment_shader: Some(path),
            ..AssetRequest::default()
        })
        .join();

        assert!(loaded.vertex_shader.is_none());
        let source = loaded.fragment_shader.and_then(Loaded::ok_or_log);
        assert_eq!(source.as_deref(), Some("@fragment fn fs_main() {}"));
    }

    #[test]
    fn panicking_loaders_become_errors() {
        fn explode(_: &Path) -> Result<String, LoadError> {
            panic!("loader exploded");
        }
        let loaded = PendingLoad::start(PathBuf::from("boom.txt"), explode).join();
        assert!(matches!(loaded.result, Err(LoadError::Panicked { .. })));
    }
}
