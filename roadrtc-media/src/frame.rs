//! Raw video frames exchanged with the media transport

use crate::error::{MediaError, MediaResult};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Bytes per pixel of packed BGR24
pub const BYTES_PER_PIXEL: usize = 3;

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
}

impl VideoResolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const HD: Self = Self::new(1280, 720);

    /// Square resolution, as used for detector input
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One decoded video frame as packed BGR24
///
/// Transports hand frames to the pipeline by value; the pipeline hands back
/// a frame of the same resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed BGR24 rows, `width * height * 3` bytes
    pub data: Vec<u8>,
    /// Timestamp in milliseconds
    pub timestamp: u64,
}

impl VideoFrame {
    /// Wrap raw BGR24 data, checking its length
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp: u64) -> MediaResult<Self> {
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidDimensions { width, height });
        }
        let expected = VideoResolution::new(width, height).pixel_count() * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp,
        })
    }

    /// Frame filled with a single BGR colour
    pub fn filled(width: u32, height: u32, bgr: [u8; 3], timestamp: u64) -> MediaResult<Self> {
        let pixels = VideoResolution::new(width, height).pixel_count();
        let data = bgr.iter().copied().cycle().take(pixels * BYTES_PER_PIXEL).collect();
        Self::new(width, height, data, timestamp)
    }

    pub fn resolution(&self) -> VideoResolution {
        VideoResolution::new(self.width, self.height)
    }

    /// BGR value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }

    /// Overwrite the pixel at (x, y); out-of-bounds writes are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&bgr);
    }

    /// Direct (non-letterboxed) resize to `target`.
    ///
    /// Returns a clone when the frame already has the target resolution.
    pub fn resized(&self, target: VideoResolution) -> MediaResult<VideoFrame> {
        if target.width == 0 || target.height == 0 {
            return Err(MediaError::InvalidDimensions {
                width: target.width,
                height: target.height,
            });
        }
        if target == self.resolution() {
            return Ok(self.clone());
        }

        // Channel order is irrelevant to resampling, so BGR goes through as "RGB".
        let view: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()).ok_or_else(
                || MediaError::Video {
                    message: format!(
                        "buffer of {} bytes does not hold a {}x{} frame",
                        self.data.len(),
                        self.width,
                        self.height
                    ),
                },
            )?;
        let resized = imageops::resize(&view, target.width, target.height, FilterType::Triangle);

        Ok(VideoFrame {
            width: target.width,
            height: target.height,
            data: resized.into_raw(),
            timestamp: self.timestamp,
        })
    }
}
