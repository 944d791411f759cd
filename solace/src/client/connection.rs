//! Transport for the terminal client: HTTP for requests, a WebSocket for
//! the user's event channel.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::models::RelayEvent;
use crate::server::USER_HEADER;

/// Events buffered between the socket reader and the UI loop.
const EVENT_BUFFER: usize = 256;

/// A user's connection to a relay server.
#[derive(Debug, Clone)]
pub struct Connection {
    http: reqwest::Client,
    base: String,
    user_id: String,
}

impl Connection {
    /// `base` is the server's HTTP root, e.g. `http://127.0.0.1:58231`.
    pub fn new(base: &str, user_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Submit one message. The reply arrives on the event channel.
    pub async fn send(&self, message: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/conversation", self.base))
            .header(USER_HEADER, &self.user_id)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .context("Failed to reach relay server")?;

        if !resp.status().is_success() {
            bail!("Server returned {}", resp.status());
        }
        Ok(())
    }

    /// Ask the server to forget this user's conversation.
    pub async fn clear(&self) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/api/conversation", self.base))
            .header(USER_HEADER, &self.user_id)
            .send()
            .await
            .context("Failed to reach relay server")?;

        if !resp.status().is_success() {
            bail!("Server returned {}", resp.status());
        }
        Ok(())
    }

    /// Join the user's event channel.
    pub async fn subscribe(&self) -> Result<EventFeed> {
        let url = format!(
            "{}/ws?user_id={}",
            websocket_base(&self.base),
            urlencoding::encode(&self.user_id)
        );
        let (mut socket, _) = connect_async(url.as_str())
            .await
            .context("Failed to open event channel")?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RelayEvent>(text.as_str()) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring unrecognised channel message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Event channel closed");
                        break;
                    }
                }
            }
        });

        Ok(EventFeed { rx, reader })
    }
}

/// Incoming relay events. Dropping it closes the channel.
pub struct EventFeed {
    rx: mpsc::Receiver<RelayEvent>,
    reader: JoinHandle<()>,
}

impl EventFeed {
    /// Next event, or `None` once the server closed the channel.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn websocket_base(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    }
}
