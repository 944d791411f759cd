//! Streaming units produced while a reply is generated.

use serde::{Deserialize, Serialize};

/// An ephemeral piece of an in-progress reply.
///
/// Fragments are never stored. Content deltas are accumulated into the
/// assistant turn that is persisted once `Done` arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Incremental text delta.
    Content(String),
    /// The backend finished generating.
    Done,
    /// Generation failed; carries a diagnostic for the log.
    Error(String),
}

impl Fragment {
    /// Whether this fragment ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Event delivered to the members of a user's channel.
///
/// Serialized as `{"event":"ai:chunk","data":"..."}`, `{"event":"ai:done"}`
/// or `{"event":"ai:error","data":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RelayEvent {
    #[serde(rename = "ai:chunk")]
    Chunk(String),
    #[serde(rename = "ai:done")]
    Done,
    #[serde(rename = "ai:error")]
    Error(String),
}

impl RelayEvent {
    /// Event name as it appears on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "ai:chunk",
            Self::Done => "ai:done",
            Self::Error(_) => "ai:error",
        }
    }
}
