//! H.264 decoding via ffmpeg.
//!
//! The drone streams raw Annex B H.264. Each reassembled buffer is sent as
//! one packet; every picture the decoder yields is scaled to RGB24.
//! The ffmpeg contexts are not `Send`, so the decoder is created on the
//! receive loop thread through `open_decoder`'s factory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::decoder::StreamDecoder;
use crate::frame::{DecodedPicture, PixelFormat};
use crate::PilotError;

pub struct H264Decoder {
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ScalerState>,
}

struct ScalerState {
    context: ffmpeg::software::scaling::Context,
    width: u32,
    height: u32,
}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let codec = ffmpeg::codec::decoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| anyhow!("ffmpeg build has no h264 decoder"))?;
        let decoder = ffmpeg::codec::context::Context::new()
            .decoder()
            .open_as(codec)
            .context("open h264 decoder")?
            .video()
            .context("h264 decoder is not a video decoder")?;
        Ok(Self {
            decoder,
            scaler: None,
        })
    }

    fn scaler_for(
        &mut self,
        frame: &ffmpeg::frame::Video,
    ) -> Result<&mut ffmpeg::software::scaling::Context, PilotError> {
        let stale = match &self.scaler {
            Some(state) => state.width != frame.width() || state.height != frame.height(),
            None => true,
        };
        if stale {
            let context = ffmpeg::software::scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                ffmpeg::util::format::pixel::Pixel::RGB24,
                frame.width(),
                frame.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(|e| PilotError::Decode(format!("create scaler: {}", e)))?;
            self.scaler = Some(ScalerState {
                context,
                width: frame.width(),
                height: frame.height(),
            });
        }
        match self.scaler.as_mut() {
            Some(state) => Ok(&mut state.context),
            None => Err(PilotError::Decode("scaler unavailable".to_string())),
        }
    }
}

impl StreamDecoder for H264Decoder {
    fn name(&self) -> &'static str {
        "h264"
    }

    fn decode(&mut self, encoded: &[u8]) -> Result<Vec<DecodedPicture>, PilotError> {
        let packet = ffmpeg::Packet::copy(encoded);
        self.decoder
            .send_packet(&packet)
            .map_err(|e| PilotError::Decode(format!("send packet: {}", e)))?;

        let mut pictures = Vec::new();
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb = ffmpeg::frame::Video::empty();
            self.scaler_for(&decoded)?
                .run(&decoded, &mut rgb)
                .map_err(|e| PilotError::Decode(format!("scale frame to RGB: {}", e)))?;
            pictures.push(DecodedPicture {
                data: rgb.data(0).to_vec(),
                width: rgb.width(),
                height: rgb.height(),
                stride: rgb.stride(0),
                format: PixelFormat::Rgb24,
            });
        }
        Ok(pictures)
    }
}
