//! H.264 coding for frames crossing a browser media connection
//!
//! Browsers deliver camera video as H.264 access units; the pipeline works
//! on packed BGR. This module converts between the two: BT.601 colour
//! conversion to and from I420, and thin wrappers around the openh264
//! decoder and encoder.

use crate::error::{MediaError, MediaResult};
use crate::frame::{VideoFrame, VideoResolution};

#[cfg(feature = "h264")]
use openh264::{
    decoder::Decoder,
    encoder::Encoder,
    formats::{YUVBuffer, YUVSource},
};

/// Borrowed I420 planes with their row strides
#[derive(Debug, Clone, Copy)]
pub struct I420Planes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Pack an even-sized BGR frame as contiguous I420 (Y, then U, then V)
pub fn bgr_to_i420(frame: &VideoFrame) -> MediaResult<Vec<u8>> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    if width % 2 != 0 || height % 2 != 0 {
        return Err(MediaError::Codec {
            message: format!("I420 needs even dimensions, got {}x{}", width, height),
        });
    }

    let chroma_width = width / 2;
    let luma_len = width * height;
    let chroma_len = chroma_width * (height / 2);
    let mut out = vec![0u8; luma_len + 2 * chroma_len];
    let (luma, chroma) = out.split_at_mut(luma_len);
    let (u_plane, v_plane) = chroma.split_at_mut(chroma_len);

    for (i, px) in frame.data.chunks_exact(3).enumerate() {
        let (b, g, r) = (px[0] as i32, px[1] as i32, px[2] as i32);
        luma[i] = clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
    }

    for cy in 0..height / 2 {
        for cx in 0..chroma_width {
            let (mut r, mut g, mut b) = (0i32, 0i32, 0i32);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let offset = ((cy * 2 + dy) * width + cx * 2 + dx) * 3;
                b += frame.data[offset] as i32;
                g += frame.data[offset + 1] as i32;
                r += frame.data[offset + 2] as i32;
            }
            let (r, g, b) = (r / 4, g / 4, b / 4);
            let index = cy * chroma_width + cx;
            u_plane[index] = clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
            v_plane[index] = clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
        }
    }

    Ok(out)
}

/// Unpack I420 planes into a BGR frame
pub fn i420_to_bgr(
    planes: &I420Planes<'_>,
    width: u32,
    height: u32,
    timestamp: u64,
) -> MediaResult<VideoFrame> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Err(MediaError::InvalidDimensions { width, height });
    }
    let chroma_rows = (h + 1) / 2;
    let short = planes.y.len() < planes.y_stride * (h - 1) + w
        || planes.u.len() < planes.u_stride * (chroma_rows - 1) + (w + 1) / 2
        || planes.v.len() < planes.v_stride * (chroma_rows - 1) + (w + 1) / 2;
    if short {
        return Err(MediaError::Codec {
            message: format!("decoded planes do not cover a {}x{} picture", width, height),
        });
    }

    let mut data = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let c = planes.y[row * planes.y_stride + col] as i32 - 16;
            let d = planes.u[(row / 2) * planes.u_stride + col / 2] as i32 - 128;
            let e = planes.v[(row / 2) * planes.v_stride + col / 2] as i32 - 128;
            data.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
            data.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            data.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
        }
    }
    VideoFrame::new(width, height, data, timestamp)
}

/// Stateful H.264 decoder for one inbound stream
#[cfg(feature = "h264")]
pub struct H264Decoder {
    inner: Decoder,
}

#[cfg(feature = "h264")]
impl H264Decoder {
    pub fn new() -> MediaResult<Self> {
        let inner = Decoder::new().map_err(|e| MediaError::Codec {
            message: format!("failed to create H.264 decoder: {}", e),
        })?;
        Ok(Self { inner })
    }

    /// Decode one Annex-B access unit.
    ///
    /// `Ok(None)` while the decoder has no picture to show yet.
    pub fn decode(&mut self, access_unit: &[u8], timestamp: u64) -> MediaResult<Option<VideoFrame>> {
        let decoded = self.inner.decode(access_unit).map_err(|e| MediaError::Codec {
            message: format!("H.264 decoding failed: {}", e),
        })?;
        let Some(yuv) = decoded else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let planes = I420Planes {
            y: yuv.y(),
            u: yuv.u(),
            v: yuv.v(),
            y_stride,
            u_stride,
            v_stride,
        };
        i420_to_bgr(&planes, width as u32, height as u32, timestamp).map(Some)
    }
}

/// H.264 encoder for one outbound stream
#[cfg(feature = "h264")]
pub struct H264Encoder {
    inner: Encoder,
}

#[cfg(feature = "h264")]
impl H264Encoder {
    pub fn new() -> MediaResult<Self> {
        let inner = Encoder::new().map_err(|e| MediaError::Codec {
            message: format!("failed to create H.264 encoder: {}", e),
        })?;
        Ok(Self { inner })
    }

    /// Encode one frame into an Annex-B access unit.
    ///
    /// Odd-sized frames are scaled down to the nearest even size first.
    pub fn encode(&mut self, frame: &VideoFrame) -> MediaResult<Vec<u8>> {
        let even = VideoResolution::new(frame.width & !1, frame.height & !1);
        let scaled;
        let frame = if even == frame.resolution() {
            frame
        } else {
            scaled = frame.resized(even)?;
            &scaled
        };

        let planes = bgr_to_i420(frame)?;
        let buffer = YUVBuffer::from_vec(planes, frame.width as usize, frame.height as usize);
        let bitstream = self.inner.encode(&buffer).map_err(|e| MediaError::Codec {
            message: format!("H.264 encoding failed: {}", e),
        })?;
        Ok(bitstream.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planes_of(packed: &[u8], width: usize, height: usize) -> I420Planes<'_> {
        let luma = width * height;
        let chroma = luma / 4;
        I420Planes {
            y: &packed[..luma],
            u: &packed[luma..luma + chroma],
            v: &packed[luma + chroma..],
            y_stride: width,
            u_stride: width / 2,
            v_stride: width / 2,
        }
    }

    #[test]
    fn test_colour_survives_i420() {
        for bgr in [[0, 0, 0], [255, 255, 255], [30, 90, 200], [200, 40, 10]] {
            let frame = VideoFrame::filled(8, 6, bgr, 5).unwrap();
            let packed = bgr_to_i420(&frame).unwrap();
            assert_eq!(packed.len(), 8 * 6 * 3 / 2);

            let back = i420_to_bgr(&planes_of(&packed, 8, 6), 8, 6, 5).unwrap();
            assert_eq!(back.timestamp, 5);
            for (got, want) in back.pixel(3, 3).unwrap().iter().zip(bgr) {
                assert!((*got as i32 - want as i32).abs() <= 3, "{:?} vs {:?}", bgr, back.pixel(3, 3));
            }
        }
    }

    #[test]
    fn test_odd_frames_rejected_for_i420() {
        let frame = VideoFrame::filled(7, 6, [0, 0, 0], 0).unwrap();
        assert!(matches!(bgr_to_i420(&frame), Err(MediaError::Codec { .. })));
    }

    #[test]
    fn test_short_planes_rejected() {
        let packed = vec![128u8; 8 * 6 * 3 / 2];
        let planes = planes_of(&packed, 8, 6);
        assert!(i420_to_bgr(&planes, 16, 12, 0).is_err());
    }

    #[cfg(feature = "h264")]
    #[test]
    fn test_h264_encode_then_decode() {
        let mut encoder = H264Encoder::new().unwrap();
        let mut decoder = H264Decoder::new().unwrap();
        let frame = VideoFrame::filled(64, 48, [60, 120, 180], 33).unwrap();

        let access_unit = encoder.encode(&frame).unwrap();
        assert!(!access_unit.is_empty());

        let decoded = decoder.decode(&access_unit, 33).unwrap().unwrap();
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert_eq!(decoded.timestamp, 33);
        for (got, want) in decoded.pixel(32, 24).unwrap().iter().zip([60u8, 120, 180]) {
            assert!((*got as i32 - want as i32).abs() <= 12);
        }
    }
}
