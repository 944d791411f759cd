//! Per-user conversation memory.

mod store;
mod trim;

pub use store::{Appended, SessionStore};
pub use trim::HistoryTrimmer;
