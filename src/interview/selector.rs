//! # Adaptive Question Selection
//!
//! Picks the next question after each scored answer. Selection is a
//! pure function over the question bank, the distribution quotas, and
//! the set of already-asked questions, so it is fully deterministic:
//! ties are always broken by lowest question id.
//!
//! ## Selection order:
//! 1. Adjust the target difficulty by the verdict (drill up / down,
//!    saturating at the ends of the scale).
//! 2. Quota tier: unasked questions at the target difficulty whose
//!    (topic, difficulty) quota is not yet filled, current topic first.
//! 3. Quota-relaxed tier: any unasked question at the target
//!    difficulty, current topic first.
//! 4. Difficulty fallback: repeat both tiers at the alternate
//!    difficulties, nearest first.
//! 5. Nothing left: the interview is exhausted and completes.

use crate::session::model::{
    Difficulty, Question, QuestionBank, QuestionDistribution, Verdict,
};
use std::collections::HashMap;

/// Result of a selection pass.
#[derive(Debug, Clone)]
pub enum Selection {
    Next(Question),
    Exhausted,
}

/// The difficulty to aim for after a verdict, relative to the
/// difficulty of the question just answered.
pub fn target_difficulty(current: Difficulty, verdict: Verdict) -> Difficulty {
    match verdict {
        Verdict::DrillUp => current.raised(),
        Verdict::DrillDown => current.lowered(),
        Verdict::Continue | Verdict::Complete => current,
    }
}

/// Alternate difficulties to try when the target level is exhausted,
/// nearest level first.
fn fallback_order(target: Difficulty) -> [Difficulty; 2] {
    match target {
        Difficulty::Hard => [Difficulty::Medium, Difficulty::Easy],
        Difficulty::Medium => [Difficulty::Easy, Difficulty::Hard],
        Difficulty::Easy => [Difficulty::Medium, Difficulty::Hard],
    }
}

/// Select the next question, or `Exhausted` when every question in the
/// bank has been asked.
pub fn select_next(
    bank: &QuestionBank,
    distribution: &QuestionDistribution,
    answered_ids: &[u32],
    current_topic: Option<&str>,
    current_difficulty: Difficulty,
    verdict: Verdict,
) -> Selection {
    let asked_counts = answered_counts(bank, answered_ids);
    let target = target_difficulty(current_difficulty, verdict);

    let mut levels = vec![target];
    levels.extend(fallback_order(target));

    for difficulty in levels {
        // Quota tier, then quota-relaxed tier at the same level
        for respect_quota in [true, false] {
            let pick = pick_at(
                bank,
                distribution,
                &asked_counts,
                answered_ids,
                current_topic,
                difficulty,
                respect_quota,
            );
            if let Some(question) = pick {
                return Selection::Next(question.clone());
            }
        }
    }

    Selection::Exhausted
}

/// Asked-so-far counts per (topic, difficulty), resolved through the
/// bank. Ids not in the bank are ignored.
fn answered_counts(
    bank: &QuestionBank,
    answered_ids: &[u32],
) -> HashMap<(String, Difficulty), u32> {
    let mut counts = HashMap::new();
    for id in answered_ids {
        if let Some(q) = bank.get(*id) {
            *counts.entry((q.topic.clone(), q.difficulty)).or_insert(0) += 1;
        }
    }
    counts
}

fn pick_at<'a>(
    bank: &'a QuestionBank,
    distribution: &QuestionDistribution,
    asked_counts: &HashMap<(String, Difficulty), u32>,
    answered_ids: &[u32],
    current_topic: Option<&str>,
    difficulty: Difficulty,
    respect_quota: bool,
) -> Option<&'a Question> {
    bank.questions
        .iter()
        .filter(|q| q.difficulty == difficulty)
        .filter(|q| !answered_ids.contains(&q.id))
        .filter(|q| {
            if !respect_quota {
                return true;
            }
            let asked = asked_counts
                .get(&(q.topic.clone(), difficulty))
                .copied()
                .unwrap_or(0);
            asked < distribution.target(&q.topic, difficulty)
        })
        // Current topic sorts ahead of other topics, then lowest id
        .min_by_key(|q| (Some(q.topic.as_str()) != current_topic, q.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(id: u32, topic: &str, difficulty: Difficulty) -> Question {
        Question {
            id,
            name: format!("q{}", id),
            text: format!("Question {}?", id),
            topic: topic.to_string(),
            difficulty,
            expected_secs: 60,
        }
    }

    fn bank() -> QuestionBank {
        QuestionBank {
            questions: vec![
                q(1, "databases", Difficulty::Easy),
                q(2, "databases", Difficulty::Easy),
                q(3, "databases", Difficulty::Medium),
                q(4, "networking", Difficulty::Easy),
                q(5, "networking", Difficulty::Medium),
                q(6, "networking", Difficulty::Hard),
            ],
        }
    }

    fn dist() -> QuestionDistribution {
        let mut d = QuestionDistribution::new();
        d.set_target("databases", Difficulty::Easy, 2);
        d.set_target("networking", Difficulty::Medium, 1);
        d
    }

    #[test]
    fn test_verdict_adjusts_difficulty() {
        assert_eq!(
            target_difficulty(Difficulty::Easy, Verdict::DrillUp),
            Difficulty::Medium
        );
        assert_eq!(
            target_difficulty(Difficulty::Hard, Verdict::DrillUp),
            Difficulty::Hard
        );
        assert_eq!(
            target_difficulty(Difficulty::Medium, Verdict::DrillDown),
            Difficulty::Easy
        );
        assert_eq!(
            target_difficulty(Difficulty::Medium, Verdict::Continue),
            Difficulty::Medium
        );
    }

    #[test]
    fn test_quota_tier_prefers_current_topic() {
        // One databases/easy asked, quota is 2: the second easy
        // databases question is picked before any other topic.
        let selection = select_next(
            &bank(),
            &dist(),
            &[1],
            Some("databases"),
            Difficulty::Easy,
            Verdict::Continue,
        );
        match selection {
            Selection::Next(q) => assert_eq!(q.id, 2),
            Selection::Exhausted => panic!("expected a question"),
        }
    }

    #[test]
    fn test_quota_tier_moves_to_other_topic_when_filled() {
        // databases/easy quota (2) fully asked; networking/medium is
        // the only remaining open quota, so a continue verdict at easy
        // falls through the quota tier to the relaxed tier at easy.
        let selection = select_next(
            &bank(),
            &dist(),
            &[1, 2],
            Some("databases"),
            Difficulty::Easy,
            Verdict::Continue,
        );
        match selection {
            Selection::Next(q) => assert_eq!(q.id, 4),
            Selection::Exhausted => panic!("expected a question"),
        }
    }

    #[test]
    fn test_drill_up_targets_open_quota() {
        // Drill up from easy lands on medium; networking/medium has an
        // open quota so it wins over the quota-less databases/medium.
        let selection = select_next(
            &bank(),
            &dist(),
            &[1],
            Some("databases"),
            Difficulty::Easy,
            Verdict::DrillUp,
        );
        match selection {
            Selection::Next(q) => assert_eq!(q.id, 5),
            Selection::Exhausted => panic!("expected a question"),
        }
    }

    #[test]
    fn test_difficulty_fallback_order() {
        // Only a hard question remains. Target medium is empty at both
        // tiers; the fallback order for medium is easy then hard, and
        // easy is also exhausted.
        let selection = select_next(
            &bank(),
            &dist(),
            &[1, 2, 3, 4, 5],
            Some("networking"),
            Difficulty::Medium,
            Verdict::Continue,
        );
        match selection {
            Selection::Next(q) => assert_eq!(q.id, 6),
            Selection::Exhausted => panic!("expected a question"),
        }
    }

    #[test]
    fn test_lowest_id_tie_break() {
        // No current topic, everything else equal: lowest id wins.
        let selection = select_next(
            &bank(),
            &dist(),
            &[],
            None,
            Difficulty::Easy,
            Verdict::Continue,
        );
        match selection {
            Selection::Next(q) => assert_eq!(q.id, 1),
            Selection::Exhausted => panic!("expected a question"),
        }
    }

    #[test]
    fn test_exhausted_bank() {
        let selection = select_next(
            &bank(),
            &dist(),
            &[1, 2, 3, 4, 5, 6],
            Some("networking"),
            Difficulty::Hard,
            Verdict::Continue,
        );
        assert!(matches!(selection, Selection::Exhausted));
    }
}
