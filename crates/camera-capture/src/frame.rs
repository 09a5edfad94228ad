//! Video frame types and normalization

use crate::CameraError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

/// Sample depth of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    U8,
    U16,
    F32,
}

/// Interleaved sample storage
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelData {
    /// Number of samples (not pixels)
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> PixelDepth {
        match self {
            PixelData::U8(_) => PixelDepth::U8,
            PixelData::U16(_) => PixelDepth::U16,
            PixelData::F32(_) => PixelDepth::F32,
        }
    }

    /// Convert to 8-bit samples. Wider types are min-max scaled onto 0..=255.
    fn to_u8(&self) -> Result<Vec<u8>, CameraError> {
        match self {
            PixelData::U8(v) => Ok(v.clone()),
            PixelData::U16(v) => Ok(min_max_scale(v.iter().map(|&s| f64::from(s)))),
            PixelData::F32(v) => {
                if v.iter().any(|s| !s.is_finite()) {
                    return Err(CameraError::Format("non-finite sample in float frame".into()));
                }
                Ok(min_max_scale(v.iter().map(|&s| f64::from(s))))
            }
        }
    }
}

/// Scale samples linearly so the minimum maps to 0 and the maximum to 255.
/// A constant input maps to all zeros.
fn min_max_scale<I>(samples: I) -> Vec<u8>
where
    I: Iterator<Item = f64> + Clone,
{
    let (min, max) = samples
        .clone()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s), hi.max(s)));
    let range = max - min;
    if !(range > 0.0) {
        return samples.map(|_| 0).collect();
    }
    samples
        .map(|s| ((s - min) * 255.0 / range).round().clamp(0.0, 255.0) as u8)
        .collect()
}

/// Decoded video frame with interleaved channels in RGB(A) order
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Pixel samples (width * height * channels)
    pub data: PixelData,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Samples per pixel: 1 (gray), 3 (RGB) or 4 (RGBA)
    pub channels: u8,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw 8-bit RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self::with_pixels(PixelData::U8(data), width, height, 3, timestamp_ns, sequence)
    }

    /// Create a frame with an arbitrary channel count and sample depth
    pub fn with_pixels(
        data: PixelData,
        width: u32,
        height: u32,
        channels: u8,
        timestamp_ns: u64,
        sequence: u32,
    ) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            timestamp_ns,
            sequence,
        }
    }

    /// Wrap a decoded image, keeping its native channel count and depth
    pub fn from_dynamic(img: DynamicImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = (img.width(), img.height());
        let (data, channels) = match img {
            DynamicImage::ImageLuma8(buf) => (PixelData::U8(buf.into_raw()), 1),
            DynamicImage::ImageLumaA8(_) => (PixelData::U8(img.to_luma8().into_raw()), 1),
            DynamicImage::ImageRgb8(buf) => (PixelData::U8(buf.into_raw()), 3),
            DynamicImage::ImageRgba8(buf) => (PixelData::U8(buf.into_raw()), 4),
            DynamicImage::ImageLuma16(buf) => (PixelData::U16(buf.into_raw()), 1),
            DynamicImage::ImageLumaA16(_) => (PixelData::U16(img.to_luma16().into_raw()), 1),
            DynamicImage::ImageRgb16(buf) => (PixelData::U16(buf.into_raw()), 3),
            DynamicImage::ImageRgba16(buf) => (PixelData::U16(buf.into_raw()), 4),
            DynamicImage::ImageRgb32F(buf) => (PixelData::F32(buf.into_raw()), 3),
            DynamicImage::ImageRgba32F(buf) => (PixelData::F32(buf.into_raw()), 4),
            other => (PixelData::U8(other.to_rgb8().into_raw()), 3),
        };
        Self::with_pixels(data, width, height, channels, timestamp_ns, sequence)
    }

    /// Wrap an 8-bit RGB image
    pub fn from_rgb_image(img: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Whether the frame already is 8-bit RGB at the given size
    pub fn is_canonical(&self, width: u32, height: u32) -> bool {
        self.channels == 3
            && self.data.depth() == PixelDepth::U8
            && self.width == width
            && self.height == height
    }

    /// Normalize to an 8-bit, 3-channel raster of the given size.
    ///
    /// Grayscale samples are replicated, alpha is dropped and 16-bit or
    /// float samples are min-max scaled. A frame that is already canonical
    /// comes back bit-identical.
    pub fn normalize(&self, width: u32, height: u32) -> Result<RgbImage, CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::Format(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }

        let channels = usize::from(self.channels);
        let expected = self.width as usize * self.height as usize * channels;
        if self.data.len() != expected {
            return Err(CameraError::Format(format!(
                "buffer holds {} samples, expected {} for {}x{}x{}",
                self.data.len(),
                expected,
                self.width,
                self.height,
                channels
            )));
        }

        if self.is_canonical(width, height) {
            if let PixelData::U8(data) = &self.data {
                return RgbImage::from_raw(width, height, data.clone())
                    .ok_or_else(|| CameraError::Format("failed to create image buffer".into()));
            }
        }

        let samples = self.data.to_u8()?;
        let rgb = match channels {
            3 => samples,
            1 => samples.iter().flat_map(|&v| [v, v, v]).collect(),
            4 => samples
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            n => {
                return Err(CameraError::Format(format!("unsupported channel count {n}")));
            }
        };

        let image = RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| CameraError::Format("failed to create image buffer".into()))?;

        if image.dimensions() == (width, height) {
            return Ok(image);
        }
        Ok(imageops::resize(&image, width, height, FilterType::Triangle))
    }
}
