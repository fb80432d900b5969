pub mod openai;
pub mod stub;
mod types;

pub use types::{ChatChunk, ChatMessage, ChatRequest, ChunkStream, Provider, Role};
