//! One generation: history in, events out, assistant turn persisted.

use tracing::{debug, warn};

use super::{Job, Relay, FALLBACK_MESSAGE};
use crate::models::{Fragment, RelayEvent, Role};

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend finished. `persisted` is false when the session was
    /// cleared or evicted mid-reply and the assistant turn was dropped.
    Completed { persisted: bool },
    /// The backend failed; nothing was persisted.
    Failed,
    /// Cancelled by a clear or by the channel emptying. The canceller
    /// publishes the terminal event.
    Cancelled,
    /// The session disappeared before generation could start.
    Abandoned,
}

/// Publish the generation's terminal event unless a canceller already did.
fn settle(relay: &Relay, user_id: &str, job: &Job, event: RelayEvent) {
    if job.terminal.claim() {
        relay.broadcaster.publish(user_id, event);
    }
}

fn fail(relay: &Relay, user_id: &str, job: &Job) {
    settle(relay, user_id, job, RelayEvent::Error(FALLBACK_MESSAGE.to_string()));
}

pub(super) async fn generate(relay: &Relay, user_id: &str, job: &Job) -> Outcome {
    let _permit = tokio::select! {
        biased;
        () = job.cancel.cancelled() => return Outcome::Cancelled,
        permit = relay.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                warn!(user = %user_id, "Generation limiter closed");
                fail(relay, user_id, job);
                return Outcome::Failed;
            }
        },
    };

    let Some(history) = relay.store.history(user_id, &job.session_id).await else {
        if job.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        warn!(user = %user_id, "Session evicted before generation started");
        fail(relay, user_id, job);
        return Outcome::Abandoned;
    };

    let turns = relay.trimmer.trim(&history);
    debug!(user = %user_id, turns = turns.len(), history = history.len(), "Starting generation");
    let mut fragments = relay.gateway.submit(turns);
    let mut reply = String::new();

    loop {
        let fragment = tokio::select! {
            biased;
            () = job.cancel.cancelled() => {
                debug!(user = %user_id, chars = reply.chars().count(), "Generation cancelled");
                return Outcome::Cancelled;
            }
            fragment = fragments.recv() => fragment,
        };

        match fragment {
            Some(Fragment::Content(delta)) => {
                reply.push_str(&delta);
                if !job.terminal.is_claimed() {
                    relay.broadcaster.publish(user_id, RelayEvent::Chunk(delta));
                }
            }
            Some(Fragment::Done) => {
                let persisted = relay
                    .store
                    .append_to(user_id, &job.session_id, Role::Assistant, reply)
                    .await;
                if !persisted {
                    debug!(user = %user_id, "Session replaced mid-reply, assistant turn dropped");
                }
                settle(relay, user_id, job, RelayEvent::Done);
                return Outcome::Completed { persisted };
            }
            Some(Fragment::Error(cause)) => {
                warn!(user = %user_id, error = %cause, "Generation failed");
                fail(relay, user_id, job);
                return Outcome::Failed;
            }
            None => {
                warn!(user = %user_id, "Reply stream closed before completion");
                fail(relay, user_id, job);
                return Outcome::Failed;
            }
        }
    }
}
