//! Frame sources feeding the analysis pipeline

use crate::{frame::VideoFrame, CameraError, SourceConfig, SourceKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extensions recognised as still frames
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A pull-based sequence of raw frames
pub trait FrameSource {
    /// Next frame, `None` once the source is exhausted.
    /// A per-frame error does not end the sequence.
    fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>>;

    /// Total number of frames, when known up front
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
        (**self).next_frame()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

/// Open the source selected by `config`
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>, CameraError> {
    match config.kind {
        SourceKind::Images => Ok(Box::new(ImageSequenceSource::open(&config.input_dir, config.fps)?)),
        SourceKind::Video => {
            let path = config
                .video_path
                .as_deref()
                .ok_or_else(|| CameraError::Open("video_path is not configured".into()))?;
            Ok(Box::new(crate::video::VideoFileSource::open(path)?))
        }
        #[cfg(feature = "camera")]
        SourceKind::Camera => Ok(Box::new(crate::camera::CameraSource::open(config.camera_index)?)),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => Err(CameraError::Open(
            "built without the `camera` feature".into(),
        )),
    }
}

/// Reads a directory of still images in file-name order
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    frame_interval_ns: u64,
}

impl ImageSequenceSource {
    /// List the image files of `dir`; frames are timestamped at `fps`
    pub fn open<P: AsRef<Path>>(dir: P, fps: u32) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CameraError::Open(format!("{}: {}", dir.display(), e)))?
                .path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        info!("Opened image sequence {} ({} frames)", dir.display(), paths.len());
        Ok(Self::from_paths(paths, fps))
    }

    /// Build a source over an explicit list of files
    pub fn from_paths(paths: Vec<PathBuf>, fps: u32) -> Self {
        let frame_interval_ns = 1_000_000_000 / u64::from(fps.max(1));
        Self {
            paths,
            cursor: 0,
            frame_interval_ns,
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
        let path = self.paths.get(self.cursor)?;
        let sequence = self.cursor as u32;
        let timestamp_ns = self.cursor as u64 * self.frame_interval_ns;
        self.cursor += 1;

        debug!("Decoding frame {} from {}", sequence, path.display());
        Some(
            image::open(path)
                .map(|img| VideoFrame::from_dynamic(img, timestamp_ns, sequence))
                .map_err(|source| CameraError::Decode {
                    path: path.clone(),
                    source,
                }),
        )
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}
