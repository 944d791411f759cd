//! Shared helpers for the end-to-end relay tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use solace::config::RelayConfig;
use solace::llm::ModelGateway;
use solace::models::{Fragment, RelayEvent, Turn};
use solace::server::{AppState, Subscription};
use tokio::sync::{mpsc, Notify};

pub const WAIT: Duration = Duration::from_secs(5);

/// One step of a scripted reply.
pub enum Step {
    Emit(Fragment),
    /// Wait until the notify fires.
    Pause(Arc<Notify>),
    /// Never finish; only cancellation ends the reply.
    Hang,
}

/// Gateway replaying scripted replies in submission order.
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    calls: Mutex<Vec<Vec<Turn>>>,
    cancelled: Arc<AtomicUsize>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    /// Script a reply made of `deltas` followed by done.
    pub fn reply(&self, deltas: &[&str]) {
        let mut steps: Vec<Step> = deltas
            .iter()
            .map(|d| Step::Emit(Fragment::Content((*d).to_string())))
            .collect();
        steps.push(Step::Emit(Fragment::Done));
        self.script(steps);
    }

    /// Histories the relay submitted, oldest first.
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap().clone()
    }

    /// Replies abandoned because the relay dropped the receiver.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ModelGateway for ScriptedGateway {
    fn submit(&self, turns: Vec<Turn>) -> mpsc::Receiver<Fragment> {
        self.calls.lock().unwrap().push(turns);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Emit(Fragment::Done)]);

        let (tx, rx) = mpsc::channel(16);
        let cancelled = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            for step in steps {
                let dropped = match step {
                    Step::Emit(fragment) => tx.send(fragment).await.is_err(),
                    Step::Pause(notify) => tokio::select! {
                        () = notify.notified() => false,
                        () = tx.closed() => true,
                    },
                    Step::Hang => {
                        tx.closed().await;
                        true
                    }
                };
                if dropped {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
        });
        rx
    }
}

pub fn state_with(config: &RelayConfig, gateway: &Arc<ScriptedGateway>) -> Arc<AppState> {
    let gateway: Arc<dyn ModelGateway> = gateway.clone();
    Arc::new(AppState::new(config, gateway))
}

pub fn state(gateway: &Arc<ScriptedGateway>) -> Arc<AppState> {
    state_with(&RelayConfig::default(), gateway)
}

pub fn preamble() -> Turn {
    Turn::system(RelayConfig::default().system_preamble)
}

/// Next event on `subscription`, failing the test after `WAIT`.
pub async fn next_event(subscription: &mut Subscription) -> RelayEvent {
    tokio::time::timeout(WAIT, subscription.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("channel closed")
}

/// Poll `check` until it holds, failing the test after `WAIT`.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
