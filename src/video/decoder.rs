//! Stream decoder backends.
//!
//! A decoder consumes the bytes of one reassembled picture and returns zero
//! or more decoded pictures. An empty result means "no frame this cycle".
//!
//! Decoders are built on the receive loop thread from a `DecoderFactory`,
//! so a backend never has to cross threads.

use anyhow::{anyhow, Result};

use crate::frame::{DecodedPicture, PixelFormat};
use crate::PilotError;

pub trait StreamDecoder {
    fn name(&self) -> &'static str;

    fn decode(&mut self, encoded: &[u8]) -> Result<Vec<DecodedPicture>, PilotError>;
}

/// Builds a decoder on the thread that will drive it.
pub type DecoderFactory = Box<dyn FnOnce() -> Result<Box<dyn StreamDecoder>> + Send>;

/// Factory handing over an already constructed decoder.
pub fn decoder_factory<D>(decoder: D) -> DecoderFactory
where
    D: StreamDecoder + Send + 'static,
{
    Box::new(move || Ok(Box::new(decoder) as Box<dyn StreamDecoder>))
}

/// Treats each buffer as one single-row grey picture.
///
/// Used for stub sessions and tests, where the "video" is whatever bytes
/// were sent to the stream port.
#[derive(Debug, Default)]
pub struct PassthroughDecoder;

impl StreamDecoder for PassthroughDecoder {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn decode(&mut self, encoded: &[u8]) -> Result<Vec<DecodedPicture>, PilotError> {
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![DecodedPicture {
            data: encoded.to_vec(),
            width: encoded.len() as u32,
            height: 1,
            stride: encoded.len(),
            format: PixelFormat::Gray8,
        }])
    }
}

/// Resolve the decoder named in the video settings.
///
/// Unknown names fail here; backend construction happens when the receive
/// loop runs the returned factory.
pub fn open_decoder(name: &str) -> Result<DecoderFactory> {
    match name {
        "passthrough" => Ok(decoder_factory(PassthroughDecoder)),
        #[cfg(feature = "decode-h264")]
        "h264" => Ok(Box::new(|| {
            let decoder = super::ffmpeg::H264Decoder::new()?;
            Ok(Box::new(decoder) as Box<dyn StreamDecoder>)
        })),
        #[cfg(not(feature = "decode-h264"))]
        "h264" => Err(anyhow!(
            "h264 decoding requires the decode-h264 feature"
        )),
        other => Err(anyhow!(
            "unknown decoder '{}'; expected passthrough or h264",
            other
        )),
    }
}
