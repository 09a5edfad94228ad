//! Annotated frame export (PNG sequence or video) and the JSON-lines event log

use crate::SessionError;
use chrono::{DateTime, Utc};
use dms::ProcessedFrame;
use image::RgbImage;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{VideoWriter, VideoWriterTrait, VideoWriterTraitConst},
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes annotated frames as numbered PNG files
#[derive(Debug)]
pub struct FrameExporter {
    dir: PathBuf,
    written: u64,
}

impl FrameExporter {
    pub fn create(dir: &Path) -> Result<Self, SessionError> {
        fs::create_dir_all(dir).map_err(|source| SessionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        info!("Exporting annotated frames to {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
        })
    }

    /// `frame_000042.png` for index 42
    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }

    pub fn write(&mut self, index: u64, frame: &RgbImage) -> Result<PathBuf, SessionError> {
        let path = self.path_for(index);
        frame.save(&path).map_err(|source| SessionError::Export {
            path: path.clone(),
            source,
        })?;
        self.written += 1;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Encodes annotated frames into a video file
pub struct VideoExporter {
    writer: VideoWriter,
    path: PathBuf,
    size: (u32, u32),
}

impl VideoExporter {
    /// `.avi` files are written as MJPG, everything else as mp4v
    pub fn create(path: &Path, fps: f64, size: (u32, u32)) -> Result<Self, SessionError> {
        let video_err = |message: String| SessionError::Video {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let name = path
            .to_str()
            .ok_or_else(|| video_err("non UTF-8 path".into()))?;

        let is_avi = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"));
        let fourcc = if is_avi {
            VideoWriter::fourcc('M', 'J', 'P', 'G')
        } else {
            VideoWriter::fourcc('m', 'p', '4', 'v')
        }
        .map_err(|e| video_err(e.to_string()))?;

        let frame_size = core::Size::new(size.0 as i32, size.1 as i32);
        let writer = VideoWriter::new(name, fourcc, fps, frame_size, true).map_err(|e| video_err(e.to_string()))?;
        if !writer.is_opened().map_err(|e| video_err(e.to_string()))? {
            return Err(video_err("no encoder accepted the file".into()));
        }

        info!("Writing annotated video to {}", path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<(), SessionError> {
        if frame.dimensions() != self.size {
            return Err(SessionError::Video {
                path: self.path.clone(),
                message: format!("frame is {:?}, video is {:?}", frame.dimensions(), self.size),
            });
        }
        self.encode(frame).map_err(|e| SessionError::Video {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn encode(&mut self, frame: &RgbImage) -> opencv::Result<()> {
        // Frame data is RGB, OpenCV needs BGR
        let mat = Mat::from_slice(frame.as_raw())?;
        let mat = mat.reshape(3, frame.height() as i32)?;
        let mut bgr = Mat::default();
        imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
        self.writer.write(&bgr)
    }

    /// Flush and close the container
    pub fn finish(mut self) -> Result<(), SessionError> {
        self.writer.release().map_err(|e| SessionError::Video {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub frame: u64,
    pub timestamp: DateTime<Utc>,
    pub faces: usize,
    pub eyes_closed: bool,
    pub yawning: bool,
    pub head_tilt: Option<f64>,
}

impl EventRecord {
    pub fn from_processed(frame: u64, processed: &ProcessedFrame) -> Self {
        Self {
            frame,
            timestamp: Utc::now(),
            faces: processed.face_count(),
            eyes_closed: processed.events.eyes_closed,
            yawning: processed.events.yawning,
            head_tilt: processed.events.head_tilt_degrees,
        }
    }
}

/// Appends one JSON object per processed frame
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLog {
    pub fn create(path: &Path) -> Result<Self, SessionError> {
        let io_err = |source: std::io::Error| SessionError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        info!("Writing event log to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, record: &EventRecord) -> Result<(), SessionError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n").map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn flush(&mut self) -> Result<(), SessionError> {
        self.writer.flush().map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("session-export-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_frames_are_numbered() {
        let dir = scratch_dir("frames");
        let mut exporter = FrameExporter::create(&dir).unwrap();
        assert_eq!(exporter.path_for(7), dir.join("frame_000007.png"));

        let path = exporter.write(12, &RgbImage::new(4, 3)).unwrap();
        assert_eq!(path.file_name().unwrap(), "frame_000012.png");
        assert_eq!(image::open(&path).unwrap().width(), 4);
        assert_eq!(exporter.written(), 1);
    }

    #[test]
    fn test_event_log_writes_json_lines() {
        let dir = scratch_dir("events");
        let path = dir.join("nested").join("events.jsonl");
        let mut log = EventLog::create(&path).unwrap();

        for frame in 0..3 {
            log.append(&EventRecord {
                frame,
                timestamp: Utc::now(),
                faces: 1,
                eyes_closed: frame == 2,
                yawning: false,
                head_tilt: Some(1.5),
            })
            .unwrap();
        }
        log.flush().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let records: Vec<EventRecord> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert!(records[2].eyes_closed);
        assert_eq!(records[0].head_tilt, Some(1.5));

        let raw: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        for key in ["frame", "timestamp", "faces", "eyes_closed", "yawning", "head_tilt"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_video_export_round_trips_frame_count() {
        let dir = scratch_dir("video");
        let path = dir.join("annotated.avi");
        let mut video = VideoExporter::create(&path, 10.0, (64, 48)).unwrap();
        for _ in 0..4 {
            video.write(&RgbImage::from_pixel(64, 48, image::Rgb([0, 200, 0]))).unwrap();
        }
        assert!(matches!(video.write(&RgbImage::new(8, 8)), Err(SessionError::Video { .. })));
        video.finish().unwrap();

        let mut source = camera_capture::VideoFileSource::open(&path).unwrap();
        let mut frames = 0;
        while let Some(frame) = camera_capture::FrameSource::next_frame(&mut source) {
            let frame = frame.unwrap();
            assert_eq!((frame.width, frame.height), (64, 48));
            frames += 1;
        }
        assert_eq!(frames, 4);
    }
}
