//! Video file source

use crate::{
    frame::{PixelData, VideoFrame},
    source::FrameSource,
    CameraError,
};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Decodes a video file frame by frame
pub struct VideoFileSource {
    cap: VideoCapture,
    path: PathBuf,
    fps: f64,
    total_frames: Option<usize>,
    current_frame: u32,
    finished: bool,
}

impl VideoFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();
        info!("Opening video: {}", path.display());
        let name = path
            .to_str()
            .ok_or_else(|| CameraError::Open(format!("non UTF-8 path {}", path.display())))?;

        let open_err = |e: opencv::Error| CameraError::Open(format!("{}: {}", path.display(), e));
        let cap = VideoCapture::from_file(name, videoio::CAP_ANY).map_err(open_err)?;
        if !cap.is_opened().map_err(open_err)? {
            return Err(CameraError::Open(format!("{}: cannot open video", path.display())));
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS).map_err(open_err)?;
        let frame_count = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT).map_err(open_err)?;
        let total_frames = (frame_count >= 1.0).then_some(frame_count as usize);
        debug!("{}: {:.1} fps, {:?} frames", path.display(), fps, total_frames);

        Ok(Self {
            cap,
            path: path.to_path_buf(),
            fps: if fps > 0.0 { fps } else { 30.0 },
            total_frames,
            current_frame: 0,
            finished: false,
        })
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
        if self.finished {
            return None;
        }

        let mut mat = Mat::default();
        match VideoCaptureTrait::read(&mut self.cap, &mut mat) {
            Ok(true) if !mat.empty() => {}
            Ok(_) => {
                debug!("End of {}", self.path.display());
                self.finished = true;
                return None;
            }
            Err(e) => {
                warn!("Read failed on {}: {}", self.path.display(), e);
                self.finished = true;
                return Some(Err(e.into()));
            }
        }

        let sequence = self.current_frame;
        self.current_frame += 1;
        let timestamp_ns = (f64::from(sequence) / self.fps * 1e9) as u64;
        Some(frame_from_mat(&mat, timestamp_ns, sequence))
    }

    fn len_hint(&self) -> Option<usize> {
        self.total_frames
    }
}

/// Convert an 8-bit OpenCV image (gray, BGR or BGRA) into an RGB(A) frame
fn frame_from_mat(mat: &Mat, timestamp_ns: u64, sequence: u32) -> Result<VideoFrame, CameraError> {
    if mat.depth() != core::CV_8U {
        return Err(CameraError::Format(format!("unsupported mat depth {}", mat.depth())));
    }
    let code = match mat.channels() {
        1 => None,
        3 => Some(imgproc::COLOR_BGR2RGB),
        4 => Some(imgproc::COLOR_BGRA2RGBA),
        n => return Err(CameraError::Format(format!("unsupported channel count {n}"))),
    };

    let converted = match code {
        Some(code) => {
            let mut out = Mat::default();
            imgproc::cvt_color(mat, &mut out, code, 0)?;
            out
        }
        None => mat.try_clone()?,
    };
    let data = converted.data_bytes()?.to_vec();

    Ok(VideoFrame::with_pixels(
        PixelData::U8(data),
        mat.cols() as u32,
        mat.rows() as u32,
        mat.channels() as u8,
        timestamp_ns,
        sequence,
    ))
}
