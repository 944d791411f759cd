//! Conversation relay.
//!
//! Accepts user messages, runs one generation at a time per user, and
//! streams each reply to the user's channel. Messages that arrive while a
//! reply is streaming wait in a FIFO lane; their user turn is appended when
//! they are dequeued, so history alternates user and assistant.
//!
//! Lock order is lanes, then store.

mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::llm::ModelGateway;
use crate::models::{RelayEvent, Role};
use crate::server::Broadcaster;
use crate::session::{HistoryTrimmer, SessionStore};

pub use worker::Outcome;

/// Text sent with `ai:error`. Failure details stay in the log.
pub const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again.";

/// Text sent with `ai:error` for replies dropped by a clear or disconnect.
pub const CANCELLED_MESSAGE: &str = "This reply was cancelled.";

/// How an accepted message was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Generation started immediately.
    Started,
    /// Waiting behind an in-flight reply; `position` is 1-based.
    Queued { position: usize },
}

/// Right to publish a generation's terminal event. Shared by the worker and
/// whoever cancels it; only the first claim succeeds.
#[derive(Debug, Clone, Default)]
struct Terminal(Arc<AtomicBool>);

impl Terminal {
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A user's in-flight generation and the messages waiting behind it.
struct Lane {
    generation: usize,
    cancel: CancellationToken,
    terminal: Terminal,
    pending: VecDeque<String>,
}

/// Next generation for a lane's driver task to run.
struct Job {
    generation: usize,
    session_id: String,
    cancel: CancellationToken,
    terminal: Terminal,
}

pub struct Relay {
    store: Arc<SessionStore>,
    trimmer: HistoryTrimmer,
    gateway: Arc<dyn ModelGateway>,
    broadcaster: Arc<dyn Broadcaster>,
    lanes: Mutex<HashMap<String, Lane>>,
    permits: Arc<Semaphore>,
    next_generation: AtomicUsize,
}

impl Relay {
    pub fn new(
        store: Arc<SessionStore>,
        trimmer: HistoryTrimmer,
        gateway: Arc<dyn ModelGateway>,
        broadcaster: Arc<dyn Broadcaster>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            trimmer,
            gateway,
            broadcaster,
            lanes: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_generation: AtomicUsize::new(0),
        }
    }

    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Accept a message for `user_id`.
    ///
    /// Whitespace-only input is rejected without touching the session.
    /// Otherwise the message either starts a generation or queues behind the
    /// one in flight; either way delivery continues on the user's channel.
    pub async fn submit(
        self: &Arc<Self>,
        user_id: &str,
        message: &str,
    ) -> Result<Submission, RelayError> {
        if message.trim().is_empty() {
            return Err(RelayError::Validation);
        }

        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.get_mut(user_id) {
            lane.pending.push_back(message.to_string());
            let position = lane.pending.len();
            debug!(user = %user_id, position, "Reply in flight, message queued");
            return Ok(Submission::Queued { position });
        }

        let appended = self.store.append(user_id, Role::User, message).await;
        let job = self.job(appended.session_id);
        lanes.insert(
            user_id.to_string(),
            Lane {
                generation: job.generation,
                cancel: job.cancel.clone(),
                terminal: job.terminal.clone(),
                pending: VecDeque::new(),
            },
        );
        drop(lanes);

        debug!(user = %user_id, chars = message.chars().count(), turns = appended.turns, "Message accepted");
        self.drive(user_id.to_string(), job);
        Ok(Submission::Started)
    }

    /// Forget the user's conversation: cancel any generation, drop queued
    /// messages, and remove the session. Returns whether a session existed.
    ///
    /// Members still on the channel get one `ai:error` per reply they were
    /// waiting for, so no client is left typing.
    pub async fn clear(&self, user_id: &str) -> bool {
        let mut lanes = self.lanes.lock().await;
        if let Some(lane) = lanes.remove(user_id) {
            self.abandon(user_id, lane);
        }
        let existed = self.store.clear(user_id).await;
        drop(lanes);

        info!(user = %user_id, existed, "Session cleared");
        existed
    }

    /// Cancel the in-flight generation and drop queued messages, keeping the
    /// session. Returns whether anything was running.
    pub async fn cancel_inflight(&self, user_id: &str) -> bool {
        let mut lanes = self.lanes.lock().await;
        let Some(lane) = lanes.remove(user_id) else {
            return false;
        };
        self.abandon(user_id, lane);
        true
    }

    /// Cancel a removed lane and settle every reply it owed. Called with the
    /// lanes lock held, so these events precede any newer generation's.
    fn abandon(&self, user_id: &str, lane: Lane) {
        lane.cancel.cancel();
        let inflight = usize::from(lane.terminal.claim());
        let owed = inflight + lane.pending.len();
        for _ in 0..owed {
            self.broadcaster
                .publish(user_id, RelayEvent::Error(CANCELLED_MESSAGE.to_string()));
        }
        debug!(user = %user_id, dropped = lane.pending.len(), owed, "Cancelled generation");
    }

    /// Whether a generation is running or queued for the user.
    pub async fn is_busy(&self, user_id: &str) -> bool {
        self.lanes.lock().await.contains_key(user_id)
    }

    /// Messages waiting behind the in-flight generation.
    pub async fn pending(&self, user_id: &str) -> usize {
        self.lanes
            .lock()
            .await
            .get(user_id)
            .map_or(0, |lane| lane.pending.len())
    }

    fn job(&self, session_id: String) -> Job {
        Job {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            session_id,
            cancel: CancellationToken::new(),
            terminal: Terminal::default(),
        }
    }

    /// Run generations for `user_id` until its lane drains or is replaced.
    fn drive(self: &Arc<Self>, user_id: String, first: Job) {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(job) = next {
                let outcome = worker::generate(&relay, &user_id, &job).await;
                debug!(user = %user_id, generation = job.generation, ?outcome, "Generation finished");
                next = relay.advance(&user_id, job.generation).await;
            }
        });
    }

    /// Pop the next queued message once `generation` has finished.
    ///
    /// A lane that was cleared or cancelled (and maybe restarted by a newer
    /// submit) no longer carries `generation`, and is left alone.
    async fn advance(&self, user_id: &str, generation: usize) -> Option<Job> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes.get_mut(user_id)?;
        if lane.generation != generation {
            return None;
        }

        let Some(message) = lane.pending.pop_front() else {
            lanes.remove(user_id);
            return None;
        };

        let appended = self.store.append(user_id, Role::User, message).await;
        let job = self.job(appended.session_id);
        lane.generation = job.generation;
        lane.cancel = job.cancel.clone();
        lane.terminal = job.terminal.clone();
        debug!(user = %user_id, remaining = lane.pending.len(), "Dequeued message");
        Some(job)
    }
}
