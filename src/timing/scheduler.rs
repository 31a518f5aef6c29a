use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use super::Timeline;
use crate::error::Result;
use crate::output::Output;

pub type SessionId = u64;

/// Updates kept for receivers that have not caught up. Older ones are
/// dropped first.
pub const UPDATE_BACKLOG: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Started {
        session: SessionId,
        name: String,
        events: usize,
    },
    Finished {
        session: SessionId,
        name: String,
        dispatched: usize,
    },
    Cancelled {
        session: SessionId,
        name: String,
        dispatched: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Finished { dispatched: usize },
    Cancelled { dispatched: usize },
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub session: SessionId,
    pub name: String,
    pub started: Instant,
    /// Seconds
    pub duration: f64,
}

struct ActiveSession {
    id: SessionId,
    cancel_tx: Sender<()>,
    done_rx: Receiver<SessionOutcome>,
    handle: JoinHandle<()>,
}

impl ActiveSession {
    /// Returns once the session thread has exited, so nothing from this
    /// session reaches the sink afterwards.
    fn cancel_and_join(self) {
        // Fails only if the thread already finished and dropped its receiver.
        let _ = self.cancel_tx.send(());
        if self.handle.join().is_err() {
            tracing::warn!(session = self.id, "playback thread panicked");
        }
    }
}

/// Bounded update channel that evicts its oldest entry instead of blocking
/// the playback thread.
#[derive(Clone)]
struct UpdateQueue {
    tx: Sender<PlaybackUpdate>,
    rx: Receiver<PlaybackUpdate>,
}

impl UpdateQueue {
    fn new() -> Self {
        let (tx, rx) = crossbeam::channel::bounded(UPDATE_BACKLOG);
        Self { tx, rx }
    }

    fn publish(&self, mut update: PlaybackUpdate) {
        loop {
            match self.tx.try_send(update) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(stale) = self.rx.try_recv() {
                        tracing::trace!(?stale, "dropping unread playback update");
                    }
                    update = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Runs at most one timeline playback at a time, each on its own thread.
pub struct Scheduler {
    active: Mutex<Option<ActiveSession>>,
    now_playing: Arc<ArcSwapOption<NowPlaying>>,
    next_id: AtomicU64,
    updates: UpdateQueue,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            now_playing: Arc::new(ArcSwapOption::empty()),
            next_id: AtomicU64::new(1),
            updates: UpdateQueue::new(),
        }
    }

    /// Status updates for every session. Each update is delivered to one
    /// receiver. At most [`UPDATE_BACKLOG`] unread updates are kept.
    pub fn updates(&self) -> Receiver<PlaybackUpdate> {
        self.updates.rx.clone()
    }

    pub fn now_playing(&self) -> Option<Arc<NowPlaying>> {
        self.now_playing.load_full()
    }

    pub fn is_playing(&self) -> bool {
        self.now_playing.load().is_some()
    }

    /// Starts playing `timeline`. A session already running is cancelled
    /// and its thread joined before the new one starts.
    pub fn play(&self, timeline: Arc<Timeline>, output: Arc<Output>) -> Result<SessionId> {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            tracing::info!(session = previous.id, "cancelling previous playback");
            previous.cancel_and_join();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = crossbeam::channel::bounded(1);
        let (done_tx, done_rx) = crossbeam::channel::bounded(1);

        self.now_playing.store(Some(Arc::new(NowPlaying {
            session: id,
            name: timeline.name().to_string(),
            started: Instant::now(),
            duration: timeline.duration(),
        })));

        let updates = self.updates.clone();
        let now_playing = self.now_playing.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("playback-{id}"))
            .spawn(move || {
                let name = timeline.name().to_string();
                tracing::info!(session = id, song = %name, events = timeline.len(), "playback started");
                updates.publish(PlaybackUpdate::Started {
                    session: id,
                    name: name.clone(),
                    events: timeline.len(),
                });

                let outcome = run_session(&timeline, &output, &cancel_rx);

                now_playing.store(None);
                let update = match outcome {
                    SessionOutcome::Finished { dispatched } => {
                        tracing::info!(session = id, song = %name, dispatched, "playback finished");
                        PlaybackUpdate::Finished {
                            session: id,
                            name,
                            dispatched,
                        }
                    }
                    SessionOutcome::Cancelled { dispatched } => {
                        tracing::info!(session = id, song = %name, dispatched, "playback cancelled");
                        PlaybackUpdate::Cancelled {
                            session: id,
                            name,
                            dispatched,
                        }
                    }
                };
                updates.publish(update);
                let _ = done_tx.send(outcome);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.now_playing.store(None);
                return Err(e.into());
            }
        };

        *active = Some(ActiveSession {
            id,
            cancel_tx,
            done_rx,
            handle,
        });
        Ok(id)
    }

    /// Cancels the active session. Returns `false` when nothing was playing.
    pub fn stop(&self) -> bool {
        let Some(session) = self.active.lock().take() else {
            tracing::debug!("stop requested with no active playback");
            return false;
        };
        let was_running = !session.handle.is_finished();
        session.cancel_and_join();
        was_running
    }

    /// Blocks until the active session ends. `None` if there is no session
    /// or its outcome was already collected.
    pub fn wait(&self) -> Option<SessionOutcome> {
        let done_rx = self.active.lock().as_ref().map(|s| s.done_rx.clone())?;
        done_rx.recv().ok()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.cancel_and_join();
        }
    }
}

fn deadline_after(start: Instant, seconds: f64) -> Option<Instant> {
    let offset = Duration::try_from_secs_f64(seconds).ok()?;
    start.checked_add(offset)
}

/// Dispatches events in order, sleeping until each event's offset from the
/// session start. Cancellation is checked before every dispatch and wakes
/// the sleep immediately.
fn run_session(timeline: &Timeline, output: &Output, cancel_rx: &Receiver<()>) -> SessionOutcome {
    let start = Instant::now();
    let mut dispatched = 0;

    for event in timeline.events() {
        let cancelled = match deadline_after(start, event.time()) {
            Some(deadline) => match cancel_rx.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => false,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            },
            // Unreachably far in the future: only a cancel can end the wait.
            None => {
                let _ = cancel_rx.recv();
                true
            }
        };
        if cancelled {
            return SessionOutcome::Cancelled { dispatched };
        }

        match output.dispatch(event.message()) {
            Ok(()) => dispatched += 1,
            Err(e) => tracing::warn!(time = event.time(), "dispatch failed: {}", e),
        }
    }

    SessionOutcome::Finished { dispatched }
}
