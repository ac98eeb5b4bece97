//! Interview session domain: data model and the concurrency manager
//! that owns all mutation of session and answer state.

pub mod model;
pub mod store;

pub use model::{
    AnswerStatus, Difficulty, InterviewAnswer, InterviewSession, Question, QuestionBank,
    QuestionDistribution, SessionStatus, Verdict,
};
pub use store::SessionStore;
