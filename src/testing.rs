//! Test doubles for sources, sinks, resolvers and transports.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audio::{Frame, FrameSink, FrameSource, OPUS_SILENCE};
use crate::fetch::{CancelHandle, ResolvedStream, Resolver, Track, TrackSearch};
use crate::session::{Transport, VoiceConnection};

pub fn frame(n: u8) -> Frame {
    Bytes::from(vec![n; 4])
}

/// Polls `cond` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met in time");
}

// ======================== Sink ========================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Frame(Frame),
    Speaking(bool),
}

pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    attempts: AtomicUsize,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Accepts `n` frame writes, then fails every write.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn audio_frames(&self) -> Vec<Frame> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Frame(f) if &f[..] != OPUS_SILENCE => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn silence_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Frame(f) if &f[..] == OPUS_SILENCE))
            .count()
    }

    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write(&self, frame: &Frame) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if attempt >= limit {
                bail!("sink closed");
            }
        }
        self.events.lock().unwrap().push(SinkEvent::Frame(frame.clone()));
        Ok(())
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.events.lock().unwrap().push(SinkEvent::Speaking(speaking));
        Ok(())
    }
}

// ======================== Sources ========================

pub struct ScriptedSource(VecDeque<Result<Frame>>);

impl ScriptedSource {
    pub fn new(items: Vec<Result<Frame>>) -> Self {
        Self(items.into())
    }

    pub fn frames(ids: &[u8]) -> Self {
        Self(ids.iter().map(|&n| Ok(frame(n))).collect())
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.0.pop_front().transpose()
    }
}

/// Yields whatever the test feeds; end of stream once the feeder is dropped.
pub struct ChannelSource(mpsc::UnboundedReceiver<Frame>);

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(rx), tx)
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.0.recv().await)
    }
}

// ======================== Resolver ========================

#[derive(Default)]
struct ResolverLog {
    resolved: Vec<String>,
    cancelled: Vec<String>,
    feeds: HashMap<String, mpsc::UnboundedSender<Frame>>,
    failing: HashSet<String>,
    stubborn: HashSet<String>,
}

/// Resolves every track to a `ChannelSource` the test drives by id.
/// Cancelling a stream drops its feeder, which ends the source.
#[derive(Default)]
pub struct MockResolver {
    log: Arc<Mutex<ResolverLog>>,
}

impl MockResolver {
    pub fn fail(&self, id: &str) {
        self.log.lock().unwrap().failing.insert(id.to_string());
    }

    /// Cancelling this track is recorded but leaves its stream open, like an
    /// upstream that keeps the pipe alive after being told to stop.
    pub fn ignore_cancel(&self, id: &str) {
        self.log.lock().unwrap().stubborn.insert(id.to_string());
    }

    pub fn feed(&self, id: &str, frame: Frame) -> bool {
        match self.log.lock().unwrap().feeds.get(id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Ends the track's stream as if the transcoder hit EOF.
    pub fn finish(&self, id: &str) {
        self.log.lock().unwrap().feeds.remove(id);
    }

    pub fn resolved(&self) -> Vec<String> {
        self.log.lock().unwrap().resolved.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.log.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn resolve(&self, track: &Track) -> Result<ResolvedStream> {
        let mut log = self.log.lock().unwrap();
        log.resolved.push(track.id.clone());
        if log.failing.contains(&track.id) {
            return Err(anyhow!("no suitable format found"));
        }

        let (source, tx) = ChannelSource::new();
        log.feeds.insert(track.id.clone(), tx);

        let shared = self.log.clone();
        let id = track.id.clone();
        let cancel = CancelHandle::new(move || {
            let mut log = shared.lock().unwrap();
            if !log.stubborn.contains(&id) {
                log.feeds.remove(&id);
            }
            log.cancelled.push(id);
        });

        Ok(ResolvedStream {
            source: Box::new(source),
            cancel,
        })
    }
}

// ======================== Search ========================

#[derive(Default)]
pub struct MockSearch {
    results: Mutex<HashMap<String, Vec<Track>>>,
}

impl MockSearch {
    pub fn add(&self, query: &str, track: Track) {
        self.results
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push(track);
    }
}

#[async_trait]
impl TrackSearch for MockSearch {
    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        Ok(self.results.lock().unwrap().get(query).cloned().unwrap_or_default())
    }
}

// ======================== Transport ========================

#[derive(Default)]
struct TransportLog {
    joins: Vec<String>,
    leaves: Vec<String>,
    connections: HashMap<String, Arc<MockConnection>>,
}

#[derive(Default)]
pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
    failing: AtomicBool,
    join_delays: Mutex<HashMap<String, Duration>>,
}

impl MockTransport {
    pub fn fail_joins(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn set_join_delay(&self, session: &str, delay: Duration) {
        self.join_delays.lock().unwrap().insert(session.to_string(), delay);
    }

    pub fn joins(&self) -> Vec<String> {
        self.log.lock().unwrap().joins.clone()
    }

    pub fn leaves(&self) -> Vec<String> {
        self.log.lock().unwrap().leaves.clone()
    }

    /// Audio frames received by the latest connection to `session`.
    pub fn frames(&self, session: &str) -> Vec<Frame> {
        let conn = self.log.lock().unwrap().connections.get(session).cloned();
        conn.map(|c| c.sink.audio_frames()).unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn join(&self, session_key: &str, _member_key: &str) -> Result<Arc<dyn VoiceConnection>> {
        let delay = self.join_delays.lock().unwrap().get(session_key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("voice gateway unreachable");
        }

        let conn = Arc::new(MockConnection {
            session: session_key.to_string(),
            sink: RecordingSink::new(),
            left: AtomicBool::new(false),
            log: self.log.clone(),
        });
        let mut log = self.log.lock().unwrap();
        log.joins.push(session_key.to_string());
        log.connections.insert(session_key.to_string(), conn.clone());
        Ok(conn)
    }
}

pub struct MockConnection {
    session: String,
    sink: RecordingSink,
    left: AtomicBool,
    log: Arc<Mutex<TransportLog>>,
}

#[async_trait]
impl FrameSink for MockConnection {
    async fn write(&self, frame: &Frame) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        self.sink.write(frame).await
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.sink.set_speaking(speaking).await
    }
}

#[async_trait]
impl VoiceConnection for MockConnection {
    async fn leave(&self) {
        // Records every call so tests can catch double releases.
        self.left.store(true, Ordering::SeqCst);
        self.log.lock().unwrap().leaves.push(self.session.clone());
    }
}
