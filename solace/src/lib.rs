//! Solace - anonymous AI support conversations with live streaming replies.
//!
//! A user's message is appended to their in-memory session, the trimmed
//! history is sent to a streaming model backend, and the reply is fanned out
//! to every live connection of that user as it is generated. The assistant
//! turn is persisted only once the backend reports completion.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;
pub mod session;
