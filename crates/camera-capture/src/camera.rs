//! Live camera source

use crate::{frame::VideoFrame, source::FrameSource, CameraError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::time::Instant;
use tracing::{debug, info};

/// Streams RGB frames from a camera device; never exhausts
pub struct CameraSource {
    camera: Camera,
    started: Instant,
    sequence: u32,
}

impl CameraSource {
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| CameraError::Open(format!("camera {index}: {e}")))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::Open(format!("camera {index}: {e}")))?;

        info!("Opened camera {}: {}", index, camera.info().human_name());
        Ok(Self {
            camera,
            started: Instant::now(),
            sequence: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Option<Result<VideoFrame, CameraError>> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let timestamp_ns = self.started.elapsed().as_nanos() as u64;

        let frame = self
            .camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map(|img| {
                let (width, height) = img.dimensions();
                (img.into_raw(), width, height)
            })
            .map(|(data, width, height)| VideoFrame::new(data, width, height, timestamp_ns, sequence))
            .map_err(|e| CameraError::Capture(e.to_string()));

        if let Err(e) = &frame {
            debug!("Camera frame {} failed: {}", sequence, e);
        }
        Some(frame)
    }
}
