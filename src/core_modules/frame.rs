// THEORY:
// The `Frame` is the rawest unit the engine sees: one raster from the camera plus the moment it
// was captured. It is a "dumb" container: it validates its own
// shape on construction and knows how to reduce itself to a single intensity plane. It knows
// nothing about other frames; comparing against the past is the background model's job.
//
// Frames are ephemeral. The live loop owns one for the duration of a tick and drops it once
// detection has run.

use crate::error::{VisionError, VisionResult};
use chrono::NaiveDateTime;
use image::DynamicImage;

/// A single captured raster with its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Interleaved channels per pixel: 1 (luma), 3 (RGB) or 4 (RGBA).
    channels: u8,
    data: Vec<u8>,
    timestamp: NaiveDateTime,
}

impl Frame {
    /// Builds a frame from an interleaved byte buffer, rejecting inconsistent shapes.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
        timestamp: NaiveDateTime,
    ) -> VisionResult<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidFrame(format!(
                "empty raster {width}x{height}"
            )));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(VisionError::InvalidFrame(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(VisionError::InvalidFrame(format!(
                "buffer holds {} bytes, {width}x{height}x{channels} needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
            timestamp,
        })
    }

    /// Convenience constructor for single-channel (grayscale / IR) frames.
    pub fn from_luma(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp: NaiveDateTime,
    ) -> VisionResult<Self> {
        Self::new(width, height, 1, data, timestamp)
    }

    /// Wraps a decoded image, keeping its channel layout where it is one we understand.
    pub fn from_image(image: DynamicImage, timestamp: NaiveDateTime) -> VisionResult<Self> {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image {
            DynamicImage::ImageLuma8(buffer) => (1, buffer.into_raw()),
            DynamicImage::ImageRgb8(buffer) => (3, buffer.into_raw()),
            other => (4, other.to_rgba8().into_raw()),
        };
        Self::new(width, height, channels, data, timestamp)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Reduces the frame to one intensity value per pixel (Rec. 601 luma for color frames).
    pub fn luminance_plane(&self) -> Vec<f32> {
        match self.channels {
            1 => self.data.iter().map(|&v| v as f32).collect(),
            n => self
                .data
                .chunks_exact(n as usize)
                .map(|px| luminance(px[0], px[1], px[2]))
                .collect(),
        }
    }
}

/// Rec. 601 luma on 0..255 channels. Alpha never contributes.
#[inline]
fn luminance(red: u8, green: u8, blue: u8) -> f32 {
    0.299 * red as f32 + 0.587 * green as f32 + 0.114 * blue as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 3)
            .and_then(|d| d.and_hms_opt(23, 0, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn rejects_buffer_of_wrong_length() {
        let err = Frame::new(4, 4, 3, vec![0; 10], ts()).expect_err("short buffer");
        assert!(matches!(err, VisionError::InvalidFrame(_)));
    }

    #[test]
    fn rejects_unsupported_channel_count() {
        assert!(Frame::new(2, 2, 2, vec![0; 8], ts()).is_err());
    }

    #[test]
    fn gray_rgb_pixels_keep_their_intensity() {
        let frame = Frame::new(2, 1, 4, vec![200, 200, 200, 0, 10, 10, 10, 255], ts())
            .expect("valid frame");
        let plane = frame.luminance_plane();
        assert!((plane[0] - 200.0).abs() < 1e-3);
        assert!((plane[1] - 10.0).abs() < 1e-3);
    }

    #[test]
    fn luma_frame_passes_through() {
        let frame = Frame::from_luma(3, 1, vec![0, 128, 255], ts()).expect("valid frame");
        assert_eq!(frame.luminance_plane(), vec![0.0, 128.0, 255.0]);
        assert_eq!(frame.pixel_count(), 3);
    }

    #[test]
    fn from_image_keeps_luma_layout() {
        let image = DynamicImage::ImageLuma8(image::GrayImage::new(8, 6));
        let frame = Frame::from_image(image, ts()).expect("valid frame");
        assert_eq!((frame.width(), frame.height(), frame.channels()), (8, 6, 1));
    }
}
