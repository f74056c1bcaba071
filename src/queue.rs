//! Per-session track queue.
//!
//! One run loop per queue pulls tracks, resolves them and drives one
//! [`Player`] at a time. Producers (`play`, `skip`, `pause`, `end`) only touch
//! the shared state under a short lock and never block on the loop.
//!
//! When the backlog is empty the loop parks on a one-shot rendezvous and the
//! next `play` hands its track over directly instead of buffering it. The
//! idle timer only runs while parked there; if it fires first the queue
//! finishes and `done` resolves.

use std::collections::VecDeque;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time;

use crate::audio::{FrameSink, SILENCE_FRAMES};
use crate::error::QueueError;
use crate::fetch::{CancelHandle, Resolver, Track};
use crate::player::Player;

#[derive(Clone, Debug)]
pub struct QueueOptions {
    /// How long an empty queue waits for a track before ending the session.
    pub idle_timeout: Duration,
    /// Silence frames written whenever a player stops producing audio.
    pub silence_frames: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            silence_frames: SILENCE_FRAMES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    NotStarted,
    /// Parked on the rendezvous, idle timer running.
    Waiting,
    /// Resolving the next track.
    Fetching,
    Playing,
    Finished,
}

enum Backlog {
    /// The run loop is parked for the next track. Nothing is buffered.
    Waiting(oneshot::Sender<Track>),
    Buffered(VecDeque<Track>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    NotStarted,
    Running,
    Finished,
}

struct Current {
    track: Track,
    player: Player,
    // Per-player, so a skip can never outlive the track it was aimed at.
    skip: Option<oneshot::Sender<()>>,
}

struct Inner {
    backlog: Backlog,
    current: Option<Current>,
    lifecycle: Lifecycle,
}

pub struct Queue {
    inner: Mutex<Inner>,
    resolver: Arc<dyn Resolver>,
    sink: Arc<dyn FrameSink>,
    options: QueueOptions,
    end: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl Queue {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        sink: Arc<dyn FrameSink>,
        options: QueueOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                backlog: Backlog::Buffered(VecDeque::new()),
                current: None,
                lifecycle: Lifecycle::NotStarted,
            }),
            resolver,
            sink,
            options,
            end: watch::channel(false).0,
            done: watch::channel(false).0,
        })
    }

    /// Spawns the run loop. Only the first call does anything.
    pub fn start(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::NotStarted {
                return;
            }
            inner.lifecycle = Lifecycle::Running;
        }
        let queue = self.clone();
        tokio::spawn(async move { queue.run().await });
    }

    /// Appends a track, or hands it straight to the parked run loop.
    pub fn play(&self, track: Track) -> Result<(), QueueError> {
        let waiter = {
            let mut inner = self.lock();
            if inner.lifecycle == Lifecycle::Finished {
                return Err(QueueError::Finished(track));
            }
            match mem::replace(&mut inner.backlog, Backlog::Buffered(VecDeque::new())) {
                Backlog::Waiting(waiter) => waiter,
                Backlog::Buffered(mut tracks) => {
                    log::debug!("Queued {:?} behind {} track(s)", track.title, tracks.len());
                    tracks.push_back(track);
                    inner.backlog = Backlog::Buffered(tracks);
                    return Ok(());
                }
            }
        };
        // The receiver only goes away when the loop is shutting down.
        waiter.send(track).map_err(QueueError::Finished)
    }

    /// Abandons the current track. Does nothing when nothing is playing.
    pub fn skip(&self) {
        let mut inner = self.lock();
        if let Some(skip) = inner.current.as_mut().and_then(|c| c.skip.take()) {
            let _ = skip.send(());
        }
    }

    pub fn pause(&self, pause: bool) {
        if let Some(current) = &self.lock().current {
            current.player.pause(pause);
        }
    }

    pub fn playing(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|c| !c.player.paused())
    }

    pub fn paused(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|c| c.player.paused())
    }

    /// Ends the session: stops the current track, drops the backlog and
    /// finishes the run loop.
    pub fn end(&self) {
        self.end.send_replace(true);
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.lock().current.as_ref().map(|c| c.track.clone())
    }

    pub fn backlog(&self) -> Vec<Track> {
        match &self.lock().backlog {
            Backlog::Buffered(tracks) => tracks.iter().cloned().collect(),
            Backlog::Waiting(_) => Vec::new(),
        }
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.lock();
        match inner.lifecycle {
            Lifecycle::NotStarted => QueueStatus::NotStarted,
            Lifecycle::Finished => QueueStatus::Finished,
            Lifecycle::Running if inner.current.is_some() => QueueStatus::Playing,
            Lifecycle::Running => match inner.backlog {
                Backlog::Waiting(_) => QueueStatus::Waiting,
                Backlog::Buffered(_) => QueueStatus::Fetching,
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.lock().lifecycle == Lifecycle::Finished
    }

    /// Resolves once the run loop has terminated.
    pub fn done(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut done = self.done.subscribe();
        async move {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ======================== Run loop ========================

    async fn run(self: Arc<Self>) {
        let mut end = self.end.subscribe();

        loop {
            if *end.borrow() {
                break;
            }
            let Some(track) = self.next_track(&mut end).await else {
                break;
            };

            let stream = match self.resolver.resolve(&track).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Fetching stream for {:?}: {:#}", track.title, e);
                    continue;
                }
            };
            if *end.borrow() {
                stream.cancel.cancel();
                break;
            }

            let player = Player::new(stream.source, self.sink.clone(), self.options.silence_frames);
            player.start();
            let player_done = player.done();
            let (skip_tx, skip_rx) = oneshot::channel();
            log::info!("Playing {:?} ({})", track.title, track.id);
            self.lock().current = Some(Current {
                track,
                player,
                skip: Some(skip_tx),
            });

            let cancel = stream.cancel;
            let ended = tokio::select! {
                _ = player_done => false,
                Ok(()) = skip_rx => {
                    log::info!("Skipping current track");
                    self.unwind(cancel).await;
                    false
                }
                _ = end_requested(&mut end) => {
                    self.unwind(cancel).await;
                    true
                }
            };

            if let Some(finished) = self.lock().current.take() {
                match finished.player.err() {
                    Some(e) => log::warn!("Player error on {:?}: {}", finished.track.title, e),
                    None => log::debug!("Finished {:?}", finished.track.title),
                }
            }
            if ended {
                break;
            }
        }

        self.finish();
    }

    /// Pops the backlog head, or parks on the rendezvous until a producer
    /// hands a track over. `None` means the queue should finish.
    async fn next_track(&self, end: &mut watch::Receiver<bool>) -> Option<Track> {
        let mut handoff = {
            let mut inner = self.lock();
            if let Backlog::Buffered(tracks) = &mut inner.backlog {
                if let Some(track) = tracks.pop_front() {
                    return Some(track);
                }
            }
            let (tx, rx) = oneshot::channel();
            inner.backlog = Backlog::Waiting(tx);
            rx
        };

        tokio::select! {
            track = &mut handoff => track.ok(),
            _ = time::sleep(self.options.idle_timeout) => {
                if self.abandon_wait() {
                    log::info!("Idle for {:?}, ending queue", self.options.idle_timeout);
                    return None;
                }
                // A producer claimed the rendezvous before the timer won the lock.
                handoff.await.ok()
            }
            _ = end_requested(end) => None,
        }
    }

    /// Withdraws the rendezvous unless a producer already claimed it. Once
    /// withdrawn the queue is finished and further `play` calls are refused.
    fn abandon_wait(&self) -> bool {
        let mut inner = self.lock();
        if !matches!(inner.backlog, Backlog::Waiting(_)) {
            return false;
        }
        inner.backlog = Backlog::Buffered(VecDeque::new());
        inner.lifecycle = Lifecycle::Finished;
        true
    }

    /// Stops the current player, unwinds its upstream fetch and waits for
    /// the player to finish its silence handshake.
    async fn unwind(&self, cancel: CancelHandle) {
        let player_done = {
            let inner = self.lock();
            inner.current.as_ref().map(|current| {
                current.player.stop();
                current.player.done()
            })
        };
        cancel.cancel();
        if let Some(player_done) = player_done {
            player_done.await;
        }
    }

    fn finish(&self) {
        let dropped = {
            let mut inner = self.lock();
            inner.lifecycle = Lifecycle::Finished;
            inner.current = None;
            match mem::replace(&mut inner.backlog, Backlog::Buffered(VecDeque::new())) {
                Backlog::Buffered(tracks) => tracks.len(),
                Backlog::Waiting(_) => 0,
            }
        };
        if dropped > 0 {
            log::info!("Queue finished, dropping {} queued track(s)", dropped);
        } else {
            log::info!("Queue finished");
        }
        self.done.send_replace(true);
    }
}

async fn end_requested(end: &mut watch::Receiver<bool>) {
    let _ = end.wait_for(|ended| *ended).await;
}
