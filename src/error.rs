//! Typed errors at the playback core boundaries.

use thiserror::Error;

use crate::fetch::Track;

/// Terminal outcome of a player that did not end cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The frame source failed mid-stream.
    #[error("decoding frame: {0}")]
    Decode(String),

    /// The sink rejected a frame or the speaking handshake.
    #[error("writing frame: {0}")]
    Sink(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    /// The run loop has terminated; the rejected track is handed back.
    #[error("queue has finished, cannot play {}", .0.title)]
    Finished(Track),
}

/// Failures surfaced synchronously to the command that triggered them.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not in a playable context")]
    NotInVoice,

    #[error("no results found")]
    NoResults,

    #[error("searching tracks: {0}")]
    Search(#[source] anyhow::Error),

    #[error("joining voice session: {0}")]
    Join(#[source] anyhow::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
