//! Streaming completion requests against the model backend.

use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::chunk::ChunkParser;
use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::models::{Fragment, Turn};

/// Buffer between the upstream reader and the relay worker.
const FRAGMENT_BUFFER: usize = 256;

/// Longest slice of an error body kept for the log.
const ERROR_BODY_LIMIT: usize = 512;

/// Starts a streamed generation for a trimmed history.
///
/// The returned receiver yields content fragments followed by exactly one
/// terminal fragment (`Done` or `Error`). Dropping the receiver cancels the
/// upstream request.
pub trait ModelGateway: Send + Sync {
    fn submit(&self, turns: Vec<Turn>) -> mpsc::Receiver<Fragment>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Gateway for Ollama-compatible `/api/chat` backends.
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OllamaGateway {
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| RelayError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.chat_url(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, turns: &[Turn]) -> RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages: turns,
            stream: true,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let request = self.client.post(&self.url).json(&body);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl ModelGateway for OllamaGateway {
    fn submit(&self, turns: Vec<Turn>) -> mpsc::Receiver<Fragment> {
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        let request = self.request(&turns);
        debug!(model = %self.model, turns = turns.len(), "Submitting completion request");

        tokio::spawn(async move {
            if let Err(err) = stream_reply(request, &tx).await {
                warn!(error = %err, "Upstream generation failed");
                let _ = tx.send(Fragment::Error(err.to_string())).await;
            }
        });

        rx
    }
}

/// Forward the response body through the chunk parser until a terminal
/// fragment, a transport error, or the receiver going away.
async fn stream_reply(
    request: RequestBuilder,
    tx: &mpsc::Sender<Fragment>,
) -> Result<(), RelayError> {
    let response = tokio::select! {
        response = request.send() => response.map_err(|e| RelayError::Upstream(describe(&e)))?,
        () = tx.closed() => return Ok(()),
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(RelayError::Upstream(format!("backend returned {status}: {body}")));
    }

    let mut parser = ChunkParser::new();
    let mut body = response.bytes_stream();

    loop {
        let read = tokio::select! {
            read = body.next() => read,
            () = tx.closed() => {
                debug!("Reply receiver dropped, abandoning upstream request");
                return Ok(());
            }
        };

        let ended = read.is_none();
        let fragments = match read {
            Some(Ok(bytes)) => parser.push(&bytes),
            Some(Err(e)) => return Err(RelayError::Upstream(describe(&e))),
            None => parser.finish(),
        };

        for fragment in fragments {
            let terminal = fragment.is_terminal();
            if tx.send(fragment).await.is_err() || terminal {
                return Ok(());
            }
        }

        if ended {
            return Err(RelayError::Upstream(
                "stream ended before completion".to_string(),
            ));
        }
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("backend unreachable: {err}")
    } else {
        err.to_string()
    }
}
