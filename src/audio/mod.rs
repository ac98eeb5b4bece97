//! Inbound audio pipeline: PCM decoding, the speech-activity gate, and
//! the per-session batch flush policy.

pub mod batch;
pub mod speech;

pub use batch::{AudioBatcher, FlushedBatch};
