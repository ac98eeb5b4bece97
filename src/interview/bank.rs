//! # Question Bank Loading
//!
//! Reads the interview content file: the question catalog, the
//! per-(topic, difficulty) distribution quotas, and the candidate
//! tokens to enroll at startup. The file is TOML:
//!
//! ```toml
//! tokens = ["candidate-a1b2"]
//!
//! [[questions]]
//! id = 1
//! name = "sql-indexes"
//! text = "How does a B-tree index speed up lookups?"
//! topic = "databases"
//! difficulty = "easy"
//! expected_secs = 90
//!
//! [[distribution]]
//! topic = "databases"
//! difficulty = "easy"
//! count = 2
//! ```

use crate::error::{AppError, AppResult};
use crate::session::model::{Difficulty, Question, QuestionBank, QuestionDistribution};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Everything the content file provides.
#[derive(Debug)]
pub struct InterviewContent {
    pub bank: QuestionBank,
    pub distribution: QuestionDistribution,
    pub tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BankFile {
    #[serde(default)]
    tokens: Vec<String>,
    questions: Vec<Question>,
    #[serde(default)]
    distribution: Vec<DistributionEntry>,
}

#[derive(Debug, Deserialize)]
struct DistributionEntry {
    topic: String,
    difficulty: Difficulty,
    count: u32,
}

/// Load and validate the content file.
pub fn load_bank(path: &Path) -> AppResult<InterviewContent> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("cannot read bank file {}: {}", path.display(), e))
    })?;
    parse_bank(&raw).map(|content| {
        info!(
            questions = content.bank.questions.len(),
            tokens = content.tokens.len(),
            "Loaded question bank from {}",
            path.display()
        );
        content
    })
}

fn parse_bank(raw: &str) -> AppResult<InterviewContent> {
    let file: BankFile = toml::from_str(raw)
        .map_err(|e| AppError::ConfigError(format!("invalid bank file: {}", e)))?;

    if file.questions.is_empty() {
        return Err(AppError::ConfigError(
            "bank file contains no questions".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for q in &file.questions {
        if !seen.insert(q.id) {
            return Err(AppError::ConfigError(format!(
                "duplicate question id {}",
                q.id
            )));
        }
    }

    let mut distribution = QuestionDistribution::new();
    for entry in &file.distribution {
        distribution.set_target(&entry.topic, entry.difficulty, entry.count);
    }

    Ok(InterviewContent {
        bank: QuestionBank {
            questions: file.questions,
        },
        distribution,
        tokens: file.tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        tokens = ["candidate-1", "candidate-2"]

        [[questions]]
        id = 1
        name = "sql-indexes"
        text = "How does a B-tree index speed up lookups?"
        topic = "databases"
        difficulty = "easy"
        expected_secs = 90

        [[questions]]
        id = 2
        name = "tcp-handshake"
        text = "Walk through the TCP three-way handshake."
        topic = "networking"
        difficulty = "medium"

        [[distribution]]
        topic = "databases"
        difficulty = "easy"
        count = 2
    "#;

    #[test]
    fn test_parse_sample() {
        let content = parse_bank(SAMPLE).unwrap();
        assert_eq!(content.bank.questions.len(), 2);
        assert_eq!(content.tokens.len(), 2);
        assert_eq!(content.distribution.target("databases", Difficulty::Easy), 2);
        // expected_secs defaults when omitted
        assert_eq!(content.bank.get(2).unwrap().expected_secs, 0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = r#"
            [[questions]]
            id = 1
            name = "a"
            text = "A?"
            topic = "t"
            difficulty = "easy"

            [[questions]]
            id = 1
            name = "b"
            text = "B?"
            topic = "t"
            difficulty = "hard"
        "#;
        assert!(matches!(
            parse_bank(raw),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_bank_rejected() {
        assert!(matches!(
            parse_bank("questions = []"),
            Err(AppError::ConfigError(_))
        ));
    }
}
