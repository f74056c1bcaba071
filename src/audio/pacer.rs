//! Real-time pacing in front of a frame sink.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{self, Interval, MissedTickBehavior};

use super::frame::{Frame, FrameSink};

/// Lets at most one frame through per `frame_duration`.
///
/// Missed ticks are delayed rather than replayed, so a resume after a pause
/// restarts the cadence instead of flushing a burst of frames.
pub struct PacedSink<S: ?Sized> {
    inner: Arc<S>,
    frame_duration: Duration,
    ticker: Mutex<Option<Interval>>,
}

impl<S: FrameSink + ?Sized> PacedSink<S> {
    pub fn new(inner: Arc<S>, frame_duration: Duration) -> Self {
        Self {
            inner,
            frame_duration: frame_duration.max(Duration::from_millis(1)),
            ticker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: FrameSink + ?Sized> FrameSink for PacedSink<S> {
    async fn write(&self, frame: &Frame) -> Result<()> {
        let mut ticker = self.ticker.lock().await;
        let ticker = ticker.get_or_insert_with(|| {
            let mut interval = time::interval(self.frame_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        ticker.tick().await;
        self.inner.write(frame).await
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.inner.set_speaking(speaking).await
    }
}
