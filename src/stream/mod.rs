//! Incremental separation of streamed model output into prose and fenced
//! code blocks.

mod classifier;
mod normalize;

pub use classifier::{CodeBlock, ParserState, Segment, StreamTextClassifier, Update};
pub use normalize::normalize;
