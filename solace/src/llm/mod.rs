//! Model backend access: the streaming gateway and its NDJSON parser.

mod chunk;
mod gateway;

pub use chunk::ChunkParser;
pub use gateway::{ModelGateway, OllamaGateway};
