//! Track resolution and search, the boundary to whatever produces audio.

pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::FrameSource;

pub use ytdlp::{YtDlpResolver, YtDlpSearch};

/// A playable item: a display title and an opaque source identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub id: String,
}

impl Track {
    pub fn new(title: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            id: id.into(),
        }
    }
}

/// Teardown hook for an upstream fetch.
///
/// Invoking it must stop the fetch promptly; it may run after the source was
/// fully consumed. Dropping the handle without invoking it is allowed.
pub struct CancelHandle(Option<Box<dyn FnOnce() + Send>>);

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

/// A track turned into frames, plus the hook that unwinds its fetch.
pub struct ResolvedStream {
    pub source: Box<dyn FrameSource>,
    pub cancel: CancelHandle,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, track: &Track) -> Result<ResolvedStream>;
}

#[async_trait]
pub trait TrackSearch: Send + Sync {
    /// Returns matching tracks, best match first.
    async fn search(&self, query: &str) -> Result<Vec<Track>>;
}
