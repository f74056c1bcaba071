//! Single-track player.
//!
//! A `Player` streams one track's frames to a sink on a dedicated task and
//! reports how it ended. Pause and stop are delivered through a `watch`
//! channel that the task watches alongside the source, so a stop interrupts
//! a decode that is still waiting on the source, and a frame decoded after a
//! pause is held until resume. All methods are safe to call concurrently.
//!
//! Whenever audio stops (pause, stop, end of stream, decode error) the task
//! writes a short burst of Opus silence and then clears the speaking flag.
//! Transports expect that handshake; cutting frames off without it leaves the
//! receiving side stuck on the last frame.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::audio::frame::silence_frame;
use crate::audio::{Frame, FrameSink, FrameSource};
use crate::error::PlayerError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Signal {
    paused: bool,
    stopped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    NotStarted,
    Running,
    Paused,
    Stopped,
    Finished,
}

pub struct Player {
    sink: Arc<dyn FrameSink>,
    silence_frames: usize,
    signals: watch::Sender<Signal>,
    done: watch::Receiver<bool>,
    // Taken by the first start(); None afterwards.
    launch: Mutex<Option<(Box<dyn FrameSource>, watch::Sender<bool>)>>,
    outcome: Arc<Mutex<Option<PlayerError>>>,
}

impl Player {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        silence_frames: usize,
    ) -> Self {
        let (signals, _) = watch::channel(Signal::default());
        let (done_tx, done) = watch::channel(false);
        Self {
            sink,
            silence_frames,
            signals,
            done,
            launch: Mutex::new(Some((source, done_tx))),
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the streaming task. Only the first call does anything.
    pub fn start(&self) {
        let Some((source, done_tx)) = lock(&self.launch).take() else {
            return;
        };

        let run = Run {
            source,
            signals: self.signals.subscribe(),
            out: Output {
                sink: self.sink.clone(),
                silence_frames: self.silence_frames,
                speaking: false,
            },
        };
        let outcome = self.outcome.clone();

        tokio::spawn(async move {
            let result = run.run().await;
            *lock(&outcome) = result.err();
            done_tx.send_replace(true);
        });
    }

    /// Requests a pause state. Takes effect before the next frame write.
    pub fn pause(&self, pause: bool) {
        self.signals.send_if_modified(|signal| {
            if signal.paused == pause {
                return false;
            }
            signal.paused = pause;
            true
        });
    }

    /// Requests termination. Ignored before `start`; repeated calls are no-ops.
    pub fn stop(&self) {
        if !self.started() {
            return;
        }
        self.signals.send_if_modified(|signal| {
            if signal.stopped {
                return false;
            }
            signal.stopped = true;
            true
        });
    }

    pub fn paused(&self) -> bool {
        self.signals.borrow().paused
    }

    pub fn state(&self) -> PlayerState {
        if *self.done.borrow() {
            return PlayerState::Finished;
        }
        if !self.started() {
            return PlayerState::NotStarted;
        }
        let signal = *self.signals.borrow();
        if signal.stopped {
            PlayerState::Stopped
        } else if signal.paused {
            PlayerState::Paused
        } else {
            PlayerState::Running
        }
    }

    /// Resolves once the streaming task has terminated.
    pub fn done(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut done = self.done.clone();
        async move {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// The terminal error, if the task ended on one. `None` after a clean end
    /// of stream or an explicit stop.
    pub fn err(&self) -> Option<PlayerError> {
        lock(&self.outcome).clone()
    }

    fn started(&self) -> bool {
        lock(&self.launch).is_none()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ======================== Streaming task ========================

struct Run {
    source: Box<dyn FrameSource>,
    signals: watch::Receiver<Signal>,
    out: Output,
}

impl Run {
    async fn run(self) -> Result<(), PlayerError> {
        let Run {
            mut source,
            mut signals,
            mut out,
        } = self;

        loop {
            if !settle(&mut signals, &mut out).await? {
                return Ok(());
            }

            // The decode keeps running across a pause; only stop abandons it.
            let decoded = {
                let mut decode = source.next_frame();
                loop {
                    tokio::select! {
                        decoded = &mut decode => break decoded,
                        changed = signals.changed() => {
                            // Sender gone means the Player handle was dropped.
                            if changed.is_err() {
                                out.shut_up_quietly().await;
                                return Ok(());
                            }
                            if !settle(&mut signals, &mut out).await? {
                                return Ok(());
                            }
                        }
                    }
                }
            };

            let frame = match decoded {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    out.shut_up_quietly().await;
                    return Ok(());
                }
                Err(e) => {
                    out.shut_up_quietly().await;
                    return Err(PlayerError::Decode(format!("{:#}", e)));
                }
            };

            // A pause that landed with the frame holds it until resume.
            if !settle(&mut signals, &mut out).await? {
                return Ok(());
            }
            out.write(&frame).await?;
        }
    }
}

/// Applies the latest pause/stop state. Returns false once stopped. While
/// paused the sink is silenced and this blocks until resume or stop.
async fn settle(signals: &mut watch::Receiver<Signal>, out: &mut Output) -> Result<bool, PlayerError> {
    let signal = *signals.borrow_and_update();
    if signal.stopped {
        out.shut_up_quietly().await;
        return Ok(false);
    }
    if !signal.paused {
        return Ok(true);
    }

    out.shut_up().await?;
    loop {
        // Sender gone means the Player handle was dropped.
        if signals.changed().await.is_err() {
            out.shut_up_quietly().await;
            return Ok(false);
        }
        let signal = *signals.borrow_and_update();
        if signal.stopped {
            out.shut_up_quietly().await;
            return Ok(false);
        }
        if !signal.paused {
            return Ok(true);
        }
    }
}

struct Output {
    sink: Arc<dyn FrameSink>,
    silence_frames: usize,
    speaking: bool,
}

impl Output {
    async fn write(&mut self, frame: &Frame) -> Result<(), PlayerError> {
        if !self.speaking {
            if let Err(e) = self.sink.set_speaking(true).await {
                log::warn!("Starting speaking: {:#}", e);
            }
            self.speaking = true;
        }
        self.sink.write(frame).await.map_err(sink_error)
    }

    async fn shut_up(&mut self) -> Result<(), PlayerError> {
        let silence = silence_frame();
        for _ in 0..self.silence_frames {
            self.sink.write(&silence).await.map_err(sink_error)?;
        }
        self.speaking = false;
        self.sink.set_speaking(false).await.map_err(sink_error)
    }

    async fn shut_up_quietly(&mut self) {
        if let Err(e) = self.shut_up().await {
            log::warn!("Silencing sink: {}", e);
        }
    }
}

fn sink_error(e: anyhow::Error) -> PlayerError {
    PlayerError::Sink(format!("{:#}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SILENCE_FRAMES;
    use crate::testing::{frame, wait_until, ChannelSource, RecordingSink, ScriptedSource, SinkEvent};

    fn player(source: impl FrameSource + 'static, sink: &Arc<RecordingSink>) -> Player {
        Player::new(Box::new(source), sink.clone(), SILENCE_FRAMES)
    }

    #[tokio::test]
    async fn plays_to_end_of_stream_then_silences() {
        let sink = Arc::new(RecordingSink::new());
        let player = player(ScriptedSource::frames(&[1, 2, 3]), &sink);
        assert_eq!(player.state(), PlayerState::NotStarted);

        player.start();
        player.done().await;

        assert_eq!(player.state(), PlayerState::Finished);
        assert_eq!(player.err(), None);
        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2), frame(3)]);

        let events = sink.events();
        assert_eq!(events.first(), Some(&SinkEvent::Speaking(true)));
        assert_eq!(events.last(), Some(&SinkEvent::Speaking(false)));
        assert_eq!(sink.silence_count(), SILENCE_FRAMES);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let sink = Arc::new(RecordingSink::new());
        let player = player(ScriptedSource::frames(&[1, 2]), &sink);

        player.start();
        player.start();
        player.done().await;
        player.start();

        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2)]);
        assert_eq!(sink.silence_count(), SILENCE_FRAMES);
    }

    #[tokio::test]
    async fn decode_error_is_terminal_and_reported() {
        let sink = Arc::new(RecordingSink::new());
        let source = ScriptedSource::new(vec![Ok(frame(1)), Err(anyhow::anyhow!("corrupt packet"))]);
        let player = player(source, &sink);

        player.start();
        player.done().await;

        match player.err() {
            Some(PlayerError::Decode(msg)) => assert!(msg.contains("corrupt packet")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(sink.audio_frames(), vec![frame(1)]);
        assert_eq!(sink.silence_count(), SILENCE_FRAMES);
    }

    #[tokio::test]
    async fn write_failure_is_terminal_and_not_retried() {
        let sink = Arc::new(RecordingSink::failing_after(2));
        let player = player(ScriptedSource::frames(&[1, 2, 3, 4]), &sink);

        player.start();
        player.done().await;

        assert!(matches!(player.err(), Some(PlayerError::Sink(_))));
        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2)]);
        assert_eq!(sink.write_attempts(), 3);
    }

    #[tokio::test]
    async fn stop_silences_and_ends_without_error() {
        let sink = Arc::new(RecordingSink::new());
        let (source, feed) = ChannelSource::new();
        let player = player(source, &sink);

        player.start();
        feed.send(frame(1)).unwrap();
        wait_until(|| sink.audio_frames().len() == 1).await;

        player.stop();
        player.stop();
        assert!(matches!(player.state(), PlayerState::Stopped | PlayerState::Finished));
        // A frame racing the stop is decoded but never written.
        let _ = feed.send(frame(2));
        player.done().await;
        let _ = feed.send(frame(3));

        assert_eq!(player.err(), None);
        assert_eq!(sink.audio_frames(), vec![frame(1)]);
        assert_eq!(sink.events().last(), Some(&SinkEvent::Speaking(false)));
    }

    #[tokio::test]
    async fn stop_before_start_is_ignored() {
        let sink = Arc::new(RecordingSink::new());
        let player = player(ScriptedSource::frames(&[1]), &sink);

        player.stop();
        player.start();
        player.done().await;

        assert_eq!(sink.audio_frames(), vec![frame(1)]);
    }

    #[tokio::test]
    async fn pause_before_start_sets_initial_state() {
        let sink = Arc::new(RecordingSink::new());
        let player = player(ScriptedSource::frames(&[1, 2]), &sink);

        player.pause(true);
        assert!(player.paused());
        player.start();

        wait_until(|| sink.events().contains(&SinkEvent::Speaking(false))).await;
        assert!(sink.audio_frames().is_empty());
        assert_eq!(player.state(), PlayerState::Paused);

        player.pause(false);
        player.done().await;
        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2)]);
    }

    #[tokio::test]
    async fn pause_and_resume_loses_and_repeats_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let (source, feed) = ChannelSource::new();
        let player = player(source, &sink);
        player.start();

        feed.send(frame(1)).unwrap();
        feed.send(frame(2)).unwrap();
        wait_until(|| sink.audio_frames().len() == 2).await;

        player.pause(true);
        feed.send(frame(3)).unwrap();
        wait_until(|| sink.silence_count() == SILENCE_FRAMES).await;

        feed.send(frame(4)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2)]);

        player.pause(false);
        wait_until(|| sink.audio_frames().len() == 4).await;
        drop(feed);
        player.done().await;

        assert_eq!(sink.audio_frames(), vec![frame(1), frame(2), frame(3), frame(4)]);
        assert_eq!(player.err(), None);
        // Speaking is re-announced after the resume.
        let speaking: Vec<bool> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Speaking(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(speaking, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn stop_while_paused_ends_the_task() {
        let sink = Arc::new(RecordingSink::new());
        let (source, _feed) = ChannelSource::new();
        let player = player(source, &sink);

        player.pause(true);
        player.start();
        wait_until(|| sink.silence_count() == SILENCE_FRAMES).await;

        player.stop();
        player.done().await;
        assert_eq!(player.err(), None);
        assert!(sink.audio_frames().is_empty());
    }

    #[tokio::test]
    async fn stop_interrupts_a_decode_waiting_on_the_source() {
        let sink = Arc::new(RecordingSink::new());
        let (source, feed) = ChannelSource::new();
        let player = player(source, &sink);

        player.start();
        feed.send(frame(1)).unwrap();
        wait_until(|| sink.audio_frames().len() == 1).await;

        // The source stays open and silent; only the stop can end the task.
        player.stop();
        let done = tokio::time::timeout(std::time::Duration::from_secs(2), player.done()).await;
        assert!(done.is_ok(), "stop did not interrupt the pending decode");
        assert_eq!(player.err(), None);
        assert_eq!(sink.silence_count(), SILENCE_FRAMES);
        assert_eq!(sink.events().last(), Some(&SinkEvent::Speaking(false)));
        drop(feed);
    }

    #[tokio::test]
    async fn frame_decoded_while_paused_waits_for_resume() {
        let sink = Arc::new(RecordingSink::new());
        let (source, feed) = ChannelSource::new();
        let player = player(source, &sink);
        player.start();

        // Paused while the task is parked on the empty source.
        player.pause(true);
        wait_until(|| sink.silence_count() == SILENCE_FRAMES).await;

        feed.send(frame(1)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(sink.audio_frames().is_empty());

        player.pause(false);
        wait_until(|| sink.audio_frames() == vec![frame(1)]).await;
        drop(feed);
        player.done().await;
        assert_eq!(player.err(), None);
    }
}
