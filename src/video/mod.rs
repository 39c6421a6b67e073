//! Video stream ingestion.
//!
//! - `reassembly`: datagrams to encoded pictures
//! - `decoder`: encoded pictures to decoded pictures (`StreamDecoder`)
//! - `channel`: the receive loop and the freeze/live `FrameChannel`

pub mod channel;
pub mod decoder;
#[cfg(feature = "decode-h264")]
pub mod ffmpeg;
pub mod reassembly;

pub use channel::{FrameChannel, FrameRead, InitStatus, ShutdownStatus};
pub use decoder::{
    decoder_factory, open_decoder, DecoderFactory, PassthroughDecoder, StreamDecoder,
};
pub use reassembly::{Assembly, FrameAssembler};
