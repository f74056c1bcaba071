//! audio - Frame plumbing between a track's encoded stream and the voice transport
//!
//! Decoding is not done here: frames are Opus packets demuxed from an Ogg
//! container and forwarded untouched. The sink side paces them at real time.

pub mod frame;
pub mod ogg_packets;
pub mod pacer;

pub use frame::{Frame, FrameSink, FrameSource, OPUS_SILENCE, SILENCE_FRAMES};
pub use ogg_packets::OggOpusSource;
pub use pacer::PacedSink;
