//! Data models for conversation relay entities.

mod fragment;
mod session;
mod turn;

pub use fragment::{Fragment, RelayEvent};
pub use session::ConversationSession;
pub use turn::{Role, Turn};
