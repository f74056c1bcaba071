//! Frame source and sink traits shared by the player and its collaborators.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One encoded audio packet, handed to the sink per write.
pub type Frame = Bytes;

/// Canonical Opus silence frame.
pub const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Number of silence frames written before the sink is told we stopped speaking.
pub const SILENCE_FRAMES: usize = 5;

/// A lazy, finite, non-restartable sequence of encoded audio frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// The real-time output side. `write` blocks until the frame is accepted.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write(&self, frame: &Frame) -> Result<()>;

    /// Speaking handshake: tells the transport audio starts or stops.
    async fn set_speaking(&self, speaking: bool) -> Result<()>;
}

pub fn silence_frame() -> Frame {
    Bytes::from_static(&OPUS_SILENCE)
}
