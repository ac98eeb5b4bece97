//! # Session Concurrency Manager
//!
//! The single place where session and answer state is mutated. Every
//! operation on a session runs under that session's row lock, so two
//! operations on the same session never interleave; operations on
//! different sessions are fully independent.
//!
//! ## Concurrency contract:
//! - Registry: `RwLock<HashMap<Uuid, Arc<SessionRow>>>` with explicit
//!   insertion (enrollment) and no implicit removal — archiving is
//!   external lifecycle policy.
//! - Row lock: `tokio::sync::Mutex<SessionRecord>` per session, the
//!   in-memory equivalent of row-level locking. Connection actors and
//!   background workers both go through it; neither holds any other
//!   reference to the record.
//! - Round advancement is a compare-and-set on the current value, so
//!   concurrent callers cannot both compute the same next round.
//!
//! Races show up as well-defined errors (`InvalidState`, `StaleAnswer`)
//! instead of silent corruption.

use crate::error::{AppError, AppResult};
use crate::session::model::{
    AnswerStatus, InterviewAnswer, InterviewSession, Question, QuestionBank,
    QuestionDistribution, SessionStatus, Verdict,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything the store holds for one session, guarded by the row lock.
struct SessionRecord {
    session: InterviewSession,
    answers: Vec<InterviewAnswer>,
    bank: Arc<QuestionBank>,
    distribution: Arc<QuestionDistribution>,
}

struct SessionRow {
    record: Mutex<SessionRecord>,
}

/// Process-wide registry of interview sessions, keyed by session id.
pub struct SessionStore {
    rows: RwLock<HashMap<Uuid, Arc<SessionRow>>>,
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    fn row(&self, session_id: Uuid) -> AppResult<Arc<SessionRow>> {
        self.rows
            .read()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {}", session_id)))
    }

    /// Enroll a candidate: creates a pending session bound to the token
    /// together with its read-only question bank and distribution.
    pub fn register_candidate(
        &self,
        token: &str,
        bank: QuestionBank,
        distribution: QuestionDistribution,
    ) -> AppResult<Uuid> {
        let mut tokens = self.tokens.write().unwrap();
        if tokens.contains_key(token) {
            return Err(AppError::InvalidState(format!(
                "token '{}' already enrolled",
                token
            )));
        }

        let session = InterviewSession::new(token.to_string());
        let session_id = session.id;

        let row = Arc::new(SessionRow {
            record: Mutex::new(SessionRecord {
                session,
                answers: Vec::new(),
                bank: Arc::new(bank),
                distribution: Arc::new(distribution),
            }),
        });

        self.rows.write().unwrap().insert(session_id, row);
        tokens.insert(token.to_string(), session_id);

        info!(%session_id, "Enrolled interview session");
        Ok(session_id)
    }

    /// Resolve a connection token to its session. Unknown tokens refuse
    /// the connection.
    pub fn session_for_token(&self, token: &str) -> AppResult<Uuid> {
        self.tokens
            .read()
            .unwrap()
            .get(token)
            .copied()
            .ok_or_else(|| AppError::Unauthorized("unknown or expired token".to_string()))
    }

    /// The question bank and distribution assigned at enrollment.
    pub async fn interview_content(
        &self,
        session_id: Uuid,
    ) -> AppResult<(Arc<QuestionBank>, Arc<QuestionDistribution>)> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        Ok((record.bank.clone(), record.distribution.clone()))
    }

    /// Mark the session live: `Pending/Terminated -> Active`.
    pub async fn activate_session(&self, session_id: Uuid) -> AppResult<InterviewSession> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;

        if record.session.status == SessionStatus::Completed {
            return Err(AppError::InvalidState(
                "session already completed".to_string(),
            ));
        }

        record.session.status = SessionStatus::Active;
        record.session.is_active = true;
        if record.session.started_at.is_none() {
            record.session.started_at = Some(Utc::now());
        }

        Ok(record.session.clone())
    }

    /// Open a new turn: creates the answer for round `current + 1`.
    /// Fails with `InvalidState` if an in-progress answer already
    /// exists — at most one turn is ever open per session.
    pub async fn start_turn(
        &self,
        session_id: Uuid,
        question: &Question,
    ) -> AppResult<InterviewAnswer> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;

        if record
            .answers
            .iter()
            .any(|a| a.status == AnswerStatus::InProgress)
        {
            return Err(AppError::InvalidState(
                "an in-progress answer already exists".to_string(),
            ));
        }

        let expected = record.session.current_round;
        let round = advance_round_locked(&mut record, expected)?;

        let answer = InterviewAnswer::new(session_id, round, question.id);
        record.session.current_question = Some(question.id);
        record.session.current_topic = Some(question.topic.clone());
        record.session.current_difficulty = question.difficulty;
        record.answers.push(answer.clone());

        debug!(%session_id, round, question = question.id, "Started turn");
        Ok(answer)
    }

    /// Append transcribed text to a live answer and return the
    /// cumulative transcript. `InvalidState` once the turn has ended —
    /// a late transcription for a finalized answer is dropped by the
    /// caller, never merged.
    pub async fn append_transcript(
        &self,
        session_id: Uuid,
        answer_id: Uuid,
        text: &str,
    ) -> AppResult<String> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        let answer = answer_mut(&mut record, answer_id)?;

        if answer.status != AnswerStatus::InProgress {
            return Err(AppError::InvalidState(format!(
                "answer {} is {}, not in_progress",
                answer_id,
                answer.status.as_str()
            )));
        }

        if !answer.transcript.is_empty() {
            answer.transcript.push(' ');
        }
        answer.transcript.push_str(text.trim());

        Ok(answer.transcript.clone())
    }

    /// Close a turn: `InProgress -> Finalizing`, freezing the
    /// transcript. Idempotent — duplicate end-of-turn signals (manual
    /// end racing the timer) return the already-frozen transcript with
    /// `false` instead of erroring.
    ///
    /// Returns `(frozen_transcript, newly_finalized)`.
    pub async fn finalize_answer(
        &self,
        session_id: Uuid,
        answer_id: Uuid,
    ) -> AppResult<(String, bool)> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        let answer = answer_mut(&mut record, answer_id)?;

        match answer.status {
            AnswerStatus::InProgress => {
                answer.status = AnswerStatus::Finalizing;
                answer.finalized_at = Some(Utc::now());
                debug!(%session_id, %answer_id, "Finalized answer");
                Ok((answer.transcript.clone(), true))
            }
            AnswerStatus::Finalizing | AnswerStatus::Scored | AnswerStatus::Skipped => {
                debug!(%session_id, %answer_id, "Duplicate finalize ignored");
                Ok((answer.transcript.clone(), false))
            }
        }
    }

    /// Candidate-initiated skip: `InProgress -> Skipped`, closing the
    /// turn with no scoring round. Any other state means the turn
    /// already ended through another path; the skip is a no-op then.
    ///
    /// Returns `true` if this call closed the turn.
    pub async fn skip_answer(&self, session_id: Uuid, answer_id: Uuid) -> AppResult<bool> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        let answer = answer_mut(&mut record, answer_id)?;

        match answer.status {
            AnswerStatus::InProgress => {
                answer.status = AnswerStatus::Skipped;
                answer.finalized_at = Some(Utc::now());
                info!(%session_id, %answer_id, "Skipped answer");
                Ok(true)
            }
            _ => {
                debug!(%session_id, %answer_id, "Skip ignored, answer already closed");
                Ok(false)
            }
        }
    }

    /// Record scoring results: `Finalizing -> Scored`. `StaleAnswer`
    /// in any other state — a slow scoring job that completes after the
    /// session moved on must not overwrite anything.
    pub async fn record_score(
        &self,
        session_id: Uuid,
        answer_id: Uuid,
        components: BTreeMap<String, f64>,
        aggregate: f64,
        verdict: Verdict,
        summary: Option<String>,
    ) -> AppResult<()> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        let answer = answer_mut(&mut record, answer_id)?;

        if answer.status != AnswerStatus::Finalizing {
            return Err(AppError::StaleAnswer(format!(
                "answer {} is {}, not finalizing",
                answer_id,
                answer.status.as_str()
            )));
        }

        answer.status = AnswerStatus::Scored;
        answer.components = components;
        answer.aggregate = Some(aggregate);
        answer.verdict = Some(verdict);
        answer.summary = summary;
        answer.scored_at = Some(Utc::now());

        debug!(%session_id, %answer_id, aggregate, verdict = verdict.as_str(), "Recorded score");
        Ok(())
    }

    /// Conditionally advance the round counter. `expected` must match
    /// the current value; concurrent callers racing on the same value
    /// see `InvalidState` and must re-read before retrying.
    pub async fn advance_round(&self, session_id: Uuid, expected: u32) -> AppResult<u32> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        advance_round_locked(&mut record, expected)
    }

    /// Cheap guard used by every background job and broadcast: a
    /// disconnected session generates no further side effects.
    pub fn is_session_active(&self, session_id: Uuid) -> bool {
        let rows = self.rows.read().unwrap();
        match rows.get(&session_id) {
            // try_lock keeps the guard cheap; a contended row is by
            // definition still live.
            Some(row) => match row.record.try_lock() {
                Ok(record) => record.session.is_active,
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Mark the session no longer live. Called on disconnect before
    /// per-session resources are released.
    pub async fn mark_session_inactive(&self, session_id: Uuid) {
        if let Ok(row) = self.row(session_id) {
            let mut record = row.record.lock().await;
            record.session.is_active = false;
            if record.session.status == SessionStatus::Active {
                record.session.status = SessionStatus::Terminated;
            }
            info!(%session_id, "Marked session inactive");
        } else {
            warn!(%session_id, "mark_session_inactive: unknown session");
        }
    }

    /// Mark the interview finished normally. The session also stops
    /// being live: no further turn or scoring work is accepted, only
    /// the report renders after this point.
    pub async fn complete_session(&self, session_id: Uuid) -> AppResult<InterviewSession> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        record.session.status = SessionStatus::Completed;
        record.session.is_active = false;
        record.session.completed_at = Some(Utc::now());
        info!(%session_id, rounds = record.session.current_round, "Completed session");
        Ok(record.session.clone())
    }

    /// Attach the rendered report document to a completed session.
    pub async fn store_report(&self, session_id: Uuid, report: String) -> AppResult<()> {
        let row = self.row(session_id)?;
        let mut record = row.record.lock().await;
        record.session.report = Some(report);
        Ok(())
    }

    /// A point-in-time copy of the session row.
    pub async fn snapshot(&self, session_id: Uuid) -> AppResult<InterviewSession> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        Ok(record.session.clone())
    }

    /// The currently in-progress answer, if a turn is open.
    pub async fn current_answer(&self, session_id: Uuid) -> AppResult<Option<InterviewAnswer>> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        Ok(record
            .answers
            .iter()
            .find(|a| a.status == AnswerStatus::InProgress)
            .cloned())
    }

    /// A point-in-time copy of one answer row.
    pub async fn answer(&self, session_id: Uuid, answer_id: Uuid) -> AppResult<InterviewAnswer> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        record
            .answers
            .iter()
            .find(|a| a.id == answer_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("answer {}", answer_id)))
    }

    /// Ids of every question a turn has been opened for, in round order.
    pub async fn answered_question_ids(&self, session_id: Uuid) -> AppResult<Vec<u32>> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        Ok(record.answers.iter().map(|a| a.question_id).collect())
    }

    /// All scored answers, in round order; input to report rendering.
    pub async fn scored_answers(&self, session_id: Uuid) -> AppResult<Vec<InterviewAnswer>> {
        let row = self.row(session_id)?;
        let record = row.record.lock().await;
        Ok(record
            .answers
            .iter()
            .filter(|a| a.status == AnswerStatus::Scored)
            .cloned()
            .collect())
    }

    /// Number of enrolled sessions (metrics).
    pub fn session_count(&self) -> usize {
        self.rows.read().unwrap().len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn answer_mut<'a>(
    record: &'a mut SessionRecord,
    answer_id: Uuid,
) -> AppResult<&'a mut InterviewAnswer> {
    record
        .answers
        .iter_mut()
        .find(|a| a.id == answer_id)
        .ok_or_else(|| AppError::NotFound(format!("answer {}", answer_id)))
}

/// Conditional round increment; shared by `start_turn` and the public
/// `advance_round` so both go through the same compare-and-set.
fn advance_round_locked(record: &mut SessionRecord, expected: u32) -> AppResult<u32> {
    if record.session.current_round != expected {
        return Err(AppError::InvalidState(format!(
            "round moved: expected {}, found {}",
            expected, record.session.current_round
        )));
    }
    record.session.current_round = expected + 1;
    Ok(record.session.current_round)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::Difficulty;

    fn test_question(id: u32) -> Question {
        Question {
            id,
            name: format!("q{}", id),
            text: format!("Question {}?", id),
            topic: "databases".to_string(),
            difficulty: Difficulty::Easy,
            expected_secs: 60,
        }
    }

    fn store_with_session() -> (SessionStore, Uuid) {
        let store = SessionStore::new();
        let id = store
            .register_candidate(
                "token-1",
                QuestionBank::default(),
                QuestionDistribution::new(),
            )
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_token_resolution() {
        let (store, id) = store_with_session();
        assert_eq!(store.session_for_token("token-1").unwrap(), id);
        assert!(matches!(
            store.session_for_token("nope"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_start_turn_rejects_second_open_turn() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();

        let answer = store.start_turn(id, &test_question(1)).await.unwrap();
        assert_eq!(answer.round, 1);

        let err = store.start_turn(id, &test_question(2)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_rounds_are_gap_free() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();

        for expected_round in 1..=3u32 {
            let answer = store
                .start_turn(id, &test_question(expected_round))
                .await
                .unwrap();
            assert_eq!(answer.round, expected_round);
            store.finalize_answer(id, answer.id).await.unwrap();
            store
                .record_score(
                    id,
                    answer.id,
                    BTreeMap::new(),
                    0.5,
                    Verdict::Continue,
                    None,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        let answer = store.start_turn(id, &test_question(1)).await.unwrap();
        store
            .append_transcript(id, answer.id, "hello world")
            .await
            .unwrap();

        let (first, newly) = store.finalize_answer(id, answer.id).await.unwrap();
        assert!(newly);
        assert_eq!(first, "hello world");

        // Second call: same frozen transcript, no new transition
        let (second, newly) = store.finalize_answer(id, answer.id).await.unwrap();
        assert!(!newly);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_append_after_finalize_is_invalid() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        let answer = store.start_turn(id, &test_question(1)).await.unwrap();
        store.finalize_answer(id, answer.id).await.unwrap();

        let err = store
            .append_transcript(id, answer.id, "late batch")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        // Transcript unchanged by the rejected append
        let frozen = store.answer(id, answer.id).await.unwrap();
        assert_eq!(frozen.transcript, "");
    }

    #[tokio::test]
    async fn test_record_score_on_scored_answer_is_stale() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        let answer = store.start_turn(id, &test_question(1)).await.unwrap();
        store.finalize_answer(id, answer.id).await.unwrap();

        let mut components = BTreeMap::new();
        components.insert("correctness".to_string(), 0.8);
        store
            .record_score(
                id,
                answer.id,
                components,
                0.8,
                Verdict::DrillUp,
                Some("good".to_string()),
            )
            .await
            .unwrap();

        // A second, slower job must not overwrite the recorded score
        let mut late = BTreeMap::new();
        late.insert("correctness".to_string(), 0.1);
        let err = store
            .record_score(id, answer.id, late, 0.1, Verdict::DrillDown, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StaleAnswer(_)));

        let stored = store.answer(id, answer.id).await.unwrap();
        assert_eq!(stored.aggregate, Some(0.8));
        assert_eq!(stored.verdict, Some(Verdict::DrillUp));
    }

    #[tokio::test]
    async fn test_concurrent_round_advancement() {
        let (store, id) = store_with_session();
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    // CAS loop: re-read on conflict, advance exactly once
                    loop {
                        let current = store.snapshot(id).await.unwrap().current_round;
                        match store.advance_round(id, current).await {
                            Ok(round) => return round,
                            Err(AppError::InvalidState(_)) => continue,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                })
            })
            .collect();

        let mut rounds = Vec::new();
        for task in tasks {
            rounds.push(task.await.unwrap());
        }

        rounds.sort_unstable();
        rounds.dedup();
        assert_eq!(rounds.len(), 8, "all intermediate rounds distinct");
        assert_eq!(store.snapshot(id).await.unwrap().current_round, 8);
    }

    #[tokio::test]
    async fn test_skip_closes_turn_without_scoring() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        let answer = store.start_turn(id, &test_question(1)).await.unwrap();

        assert!(store.skip_answer(id, answer.id).await.unwrap());
        let skipped = store.answer(id, answer.id).await.unwrap();
        assert_eq!(skipped.status, AnswerStatus::Skipped);
        assert!(skipped.aggregate.is_none());

        // The skipped question stays consumed and the next turn opens
        assert_eq!(store.answered_question_ids(id).await.unwrap(), vec![1]);
        let next = store.start_turn(id, &test_question(2)).await.unwrap();
        assert_eq!(next.round, 2);

        // A skip racing another end-of-turn path is a no-op
        store.finalize_answer(id, next.id).await.unwrap();
        assert!(!store.skip_answer(id, next.id).await.unwrap());
        let frozen = store.answer(id, next.id).await.unwrap();
        assert_eq!(frozen.status, AnswerStatus::Finalizing);
    }

    #[tokio::test]
    async fn test_completed_session_is_not_live() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        assert!(store.is_session_active(id));

        store.complete_session(id).await.unwrap();
        assert!(!store.is_session_active(id));

        let session = store.snapshot(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_inactive_session_guard() {
        let (store, id) = store_with_session();
        store.activate_session(id).await.unwrap();
        assert!(store.is_session_active(id));

        store.mark_session_inactive(id).await;
        assert!(!store.is_session_active(id));
        assert!(!store.is_session_active(Uuid::new_v4()));
    }
}
