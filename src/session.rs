//! Session registry: one live Queue per session key.
//!
//! The first request for a session joins the voice transport and starts a
//! Queue on it. A watcher task waits for the Queue to finish, clears the slot
//! it owns and releases the transport exactly once.
//!
//! Each session has its own slot lock, held across the join so concurrent
//! first requests share one join. The registry lock itself only guards map
//! lookups, so a slow join never stalls other sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::audio::{FrameSink, PacedSink};
use crate::error::{QueueError, SessionError};
use crate::fetch::{Resolver, Track};
use crate::queue::{Queue, QueueOptions};

/// A joined voice session. Frames written here go out to the session.
#[async_trait]
pub trait VoiceConnection: FrameSink {
    /// Releases the session. Calling it more than once is harmless.
    async fn leave(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn join(&self, session_key: &str, member_key: &str) -> Result<Arc<dyn VoiceConnection>>;
}

/// A session's live Queue, `None` while the first join is in flight.
type Slot = Arc<Mutex<Option<Arc<Queue>>>>;
type Registry = Arc<StdMutex<HashMap<String, Slot>>>;

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    options: QueueOptions,
    frame_duration: Duration,
    sessions: Registry,
    watchers: TaskTracker,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolver>,
        options: QueueOptions,
        frame_duration: Duration,
    ) -> Self {
        Self {
            transport,
            resolver,
            options,
            frame_duration,
            sessions: Arc::new(StdMutex::new(HashMap::new())),
            watchers: TaskTracker::new(),
        }
    }

    /// Returns the session's live Queue, joining the transport on first use.
    pub async fn queue(&self, session: &str, member: &str) -> Result<Arc<Queue>, SessionError> {
        if member.is_empty() {
            return Err(SessionError::NotInVoice);
        }

        loop {
            let slot = lock(&self.sessions)
                .entry(session.to_string())
                .or_default()
                .clone();
            let mut live = slot.lock().await;
            // The watcher retired this slot while we waited on it.
            if !owns(&self.sessions, session, &slot) {
                continue;
            }

            if let Some(queue) = live.as_ref() {
                if !queue.is_finished() {
                    return Ok(queue.clone());
                }
                log::debug!("Session {} finished, replacing its queue", session);
            }

            log::info!("Joining session {} for member {}", session, member);
            let conn = match self.transport.join(session, member).await {
                Ok(conn) => conn,
                Err(e) => {
                    if live.is_none() {
                        retire(&self.sessions, session, &slot);
                    }
                    return Err(SessionError::Join(e));
                }
            };

            let sink: Arc<dyn FrameSink> = Arc::new(PacedSink::new(conn.clone(), self.frame_duration));
            let queue = Queue::new(self.resolver.clone(), sink, self.options.clone());
            queue.start();
            *live = Some(queue.clone());
            drop(live);

            self.watch(session.to_string(), slot, queue.clone(), conn);
            return Ok(queue);
        }
    }

    /// Plays `track` on the session, retrying once on a fresh Queue when the
    /// current one finished under our feet.
    pub async fn play(&self, session: &str, member: &str, track: Track) -> Result<Arc<Queue>, SessionError> {
        let queue = self.queue(session, member).await?;
        let track = match queue.play(track) {
            Ok(()) => return Ok(queue),
            Err(QueueError::Finished(track)) => track,
        };

        log::debug!("Queue for {} finished, retrying on a fresh one", session);
        let queue = self.queue(session, member).await?;
        queue.play(track)?;
        Ok(queue)
    }

    /// The session's Queue, if one is live. Waits out a join in progress.
    pub async fn get(&self, session: &str) -> Option<Arc<Queue>> {
        let slot = lock(&self.sessions).get(session).cloned()?;
        let live = slot.lock().await;
        live.clone()
    }

    /// Sessions with a live Queue or a join in flight.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Ends every live Queue and waits until each transport was released.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = lock(&self.sessions).values().cloned().collect();
        log::info!("Shutting down {} session(s)", slots.len());
        for slot in slots {
            if let Some(queue) = slot.lock().await.as_ref() {
                queue.end();
            }
        }
        self.watchers.close();
        self.watchers.wait().await;
    }

    fn watch(&self, key: String, slot: Slot, queue: Arc<Queue>, conn: Arc<dyn VoiceConnection>) {
        let sessions = self.sessions.clone();
        self.watchers.spawn(async move {
            queue.done().await;
            {
                let mut live = slot.lock().await;
                // 只清理自己登记的队列，可能已被新队列替换
                if live.as_ref().is_some_and(|q| Arc::ptr_eq(q, &queue)) {
                    *live = None;
                    retire(&sessions, &key, &slot);
                }
            }
            conn.leave().await;
            log::info!("Session {} released", key);
        });
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn owns(sessions: &Registry, key: &str, slot: &Slot) -> bool {
    lock(sessions).get(key).is_some_and(|s| Arc::ptr_eq(s, slot))
}

/// Drops the registry entry if it still points at `slot`. Callers hold the
/// slot lock, so nobody can be mid-join on it.
fn retire(sessions: &Registry, key: &str, slot: &Slot) {
    let mut sessions = lock(sessions);
    if sessions.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
        sessions.remove(key);
    }
}
