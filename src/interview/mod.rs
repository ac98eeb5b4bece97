//! Interview logic: question-bank loading, adaptive question
//! selection, and score aggregation.

pub mod bank;
pub mod scoring;
pub mod selector;

pub use selector::Selection;
