//! Decoded video frames.
//!
//! - `DecodedPicture`: what a decoder hands back (may carry row padding).
//! - `Frame`: an owned, immutable, tightly packed picture with a capture sequence.
//!
//! Frames are shared as `Arc<Frame>`. Replacing the current frame in the
//! channel drops the channel's reference; readers holding a clone keep theirs.

use std::time::Instant;

use crate::PilotError;

/// Pixel layout of decoded data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A picture as returned by a stream decoder.
///
/// `stride` is the number of bytes per row in `data`, which may be larger
/// than `width * bytes_per_pixel` when the decoder pads rows.
#[derive(Clone, Debug)]
pub struct DecodedPicture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
}

/// Owned decoded frame. Never mutated after creation.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic capture order assigned by the receive loop.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from a decoder picture, dropping any row padding.
    pub fn from_decoded(picture: &DecodedPicture, sequence: u64) -> Result<Self, PilotError> {
        let row_bytes = picture.width as usize * picture.format.bytes_per_pixel();
        let height = picture.height as usize;
        if picture.stride < row_bytes {
            return Err(PilotError::Decode(format!(
                "stride {} shorter than row of {} bytes",
                picture.stride, row_bytes
            )));
        }

        if picture.stride == row_bytes {
            let data = picture
                .data
                .get(..row_bytes * height)
                .ok_or_else(|| PilotError::Decode("picture buffer is truncated".to_string()))?;
            return Ok(Self::new(
                data.to_vec(),
                picture.width,
                picture.height,
                picture.format,
                sequence,
            ));
        }

        let mut pixels = Vec::with_capacity(row_bytes * height);
        for row in 0..height {
            let start = row * picture.stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                picture
                    .data
                    .get(start..end)
                    .ok_or_else(|| PilotError::Decode("picture row is out of bounds".to_string()))?,
            );
        }

        Ok(Self::new(
            pixels,
            picture.width,
            picture.height,
            picture.format,
            sequence,
        ))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_decoded_crops_row_padding() {
        // 2x2 RGB picture with 2 bytes of padding per row.
        let picture = DecodedPicture {
            data: vec![
                1, 2, 3, 4, 5, 6, 0, 0, //
                7, 8, 9, 10, 11, 12, 0, 0,
            ],
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgb24,
        };
        let frame = Frame::from_decoded(&picture, 7).unwrap();
        assert_eq!(frame.pixels(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.byte_len(), 12);
    }

    #[test]
    fn from_decoded_keeps_packed_rows() {
        let picture = DecodedPicture {
            data: vec![9; 6],
            width: 3,
            height: 2,
            stride: 3,
            format: PixelFormat::Gray8,
        };
        let frame = Frame::from_decoded(&picture, 1).unwrap();
        assert_eq!(frame.pixels().len(), 6);
        assert_eq!(frame.format, PixelFormat::Gray8);
    }

    #[test]
    fn from_decoded_rejects_truncated_buffer() {
        let picture = DecodedPicture {
            data: vec![0; 10],
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgb24,
        };
        assert!(matches!(
            Frame::from_decoded(&picture, 0),
            Err(PilotError::Decode(_))
        ));
    }

    #[test]
    fn from_decoded_rejects_short_stride() {
        let picture = DecodedPicture {
            data: vec![0; 12],
            width: 2,
            height: 2,
            stride: 4,
            format: PixelFormat::Rgb24,
        };
        assert!(Frame::from_decoded(&picture, 0).is_err());
    }
}
