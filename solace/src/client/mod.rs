//! Terminal chat client.

mod connection;
mod view;

pub use connection::{Connection, EventFeed};
pub use view::{ConversationView, ViewUpdate, FALLBACK, REASSURANCE, SUGGESTIONS};
