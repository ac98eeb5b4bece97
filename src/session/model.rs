//! # Interview Data Model
//!
//! Core records for a live interview: the session row, the per-round
//! answer row, and the read-only question catalog handed to a session
//! at enrollment time.
//!
//! ## Lifecycle invariants:
//! - A session holds at most one `InProgress` answer at any time.
//! - Round numbers form a strictly increasing, gap-free sequence.
//! - An answer's transcript only grows while `InProgress` and is
//!   frozen at finalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Current status of an interview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session enrolled, candidate not yet connected
    Pending,
    /// Candidate connected, interview in progress
    Active,
    /// All rounds finished normally
    Completed,
    /// Ended early (disconnect, manual termination)
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
        }
    }
}

/// Status of a single answer within its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Turn open, transcript still growing
    InProgress,
    /// Turn ended, transcript frozen, awaiting the scoring job
    Finalizing,
    /// Scoring recorded; the answer is immutable from here on
    Scored,
    /// Candidate skipped the question; never scored
    Skipped,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AnswerStatus::InProgress => "in_progress",
            AnswerStatus::Finalizing => "finalizing",
            AnswerStatus::Scored => "scored",
            AnswerStatus::Skipped => "skipped",
        }
    }
}

/// Next-action classification derived from a scored answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    DrillUp,
    DrillDown,
    Continue,
    Complete,
}

impl Verdict {
    pub fn as_str(&self) -> &str {
        match self {
            Verdict::DrillUp => "drill_up",
            Verdict::DrillDown => "drill_down",
            Verdict::Continue => "continue",
            Verdict::Complete => "complete",
        }
    }
}

/// Question difficulty, ordered from easiest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// One step harder, saturating at `Hard`.
    pub fn raised(self) -> Self {
        match self {
            Difficulty::Easy => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Hard => Difficulty::Hard,
        }
    }

    /// One step easier, saturating at `Easy`.
    pub fn lowered(self) -> Self {
        match self {
            Difficulty::Hard => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Easy => Difficulty::Easy,
        }
    }
}

/// One question from the catalog. `id` is the deterministic tie-break
/// key for selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub name: String,
    pub text: String,
    pub topic: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub expected_secs: u32,
}

/// The question catalog assigned to a session at enrollment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionBank {
    pub questions: Vec<Question>,
}

impl QuestionBank {
    pub fn get(&self, id: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Target answered count per (topic, difficulty) pair. Read-only input
/// to question selection; a soft preference, not a hard constraint.
#[derive(Debug, Clone, Default)]
pub struct QuestionDistribution {
    targets: HashMap<(String, Difficulty), u32>,
}

impl QuestionDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, topic: &str, difficulty: Difficulty, count: u32) {
        self.targets.insert((topic.to_string(), difficulty), count);
    }

    pub fn target(&self, topic: &str, difficulty: Difficulty) -> u32 {
        self.targets
            .get(&(topic.to_string(), difficulty))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all quota targets; used for completion progress.
    pub fn total(&self) -> u32 {
        self.targets.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// One interview session row.
#[derive(Debug, Clone)]
pub struct InterviewSession {
    pub id: Uuid,
    pub token: String,
    pub status: SessionStatus,
    /// Monotonic, increases by exactly one per finalized turn
    pub current_round: u32,
    pub current_question: Option<u32>,
    pub current_topic: Option<String>,
    pub current_difficulty: Difficulty,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Rendered report text, set once at completion
    pub report: Option<String>,
}

impl InterviewSession {
    pub fn new(token: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            status: SessionStatus::Pending,
            current_round: 0,
            current_question: None,
            current_topic: None,
            current_difficulty: Difficulty::Easy,
            is_active: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            report: None,
        }
    }
}

/// One answer row: the candidate's response to a question within one
/// round of a session.
#[derive(Debug, Clone)]
pub struct InterviewAnswer {
    pub id: Uuid,
    pub session_id: Uuid,
    pub round: u32,
    pub question_id: u32,
    pub status: AnswerStatus,
    /// Grows monotonically while in progress; frozen at finalization
    pub transcript: String,
    /// Named score dimension -> value in [0, 1]
    pub components: BTreeMap<String, f64>,
    pub aggregate: Option<f64>,
    pub verdict: Option<Verdict>,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub scored_at: Option<DateTime<Utc>>,
}

impl InterviewAnswer {
    pub fn new(session_id: Uuid, round: u32, question_id: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            round,
            question_id,
            status: AnswerStatus::InProgress,
            transcript: String::new(),
            components: BTreeMap::new(),
            aggregate: None,
            verdict: None,
            summary: None,
            started_at: Utc::now(),
            finalized_at: None,
            scored_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_adjustment_saturates() {
        assert_eq!(Difficulty::Easy.raised(), Difficulty::Medium);
        assert_eq!(Difficulty::Medium.raised(), Difficulty::Hard);
        assert_eq!(Difficulty::Hard.raised(), Difficulty::Hard);
        assert_eq!(Difficulty::Hard.lowered(), Difficulty::Medium);
        assert_eq!(Difficulty::Easy.lowered(), Difficulty::Easy);
    }

    #[test]
    fn test_distribution_targets() {
        let mut dist = QuestionDistribution::new();
        dist.set_target("databases", Difficulty::Easy, 2);
        dist.set_target("networking", Difficulty::Medium, 1);

        assert_eq!(dist.target("databases", Difficulty::Easy), 2);
        assert_eq!(dist.target("databases", Difficulty::Hard), 0);
        assert_eq!(dist.total(), 3);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SessionStatus::Active.as_str(), "active");
        assert_eq!(AnswerStatus::InProgress.as_str(), "in_progress");
        assert_eq!(Verdict::DrillUp.as_str(), "drill_up");
    }
}
