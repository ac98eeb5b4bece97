//! # Background Jobs
//!
//! Everything slow runs off the connection actor: transcription,
//! answer scoring, greeting preparation, and report rendering. Jobs
//! are spawned tasks that share nothing with the actor except the
//! session store handle and their payload; results come back as actix
//! messages to the submitting actor.
//!
//! ## Rules every job follows:
//! - Guard first: if the session is no longer active, the job exits
//!   without side effects or a reply.
//! - Dependency failures are retried a bounded number of times, then
//!   the job degrades (neutral score, failure notice) instead of
//!   wedging the session.
//! - Stale results (`InvalidState` / `StaleAnswer` from the store) are
//!   logged and dropped, never propagated.

use crate::collaborators::{
    neutral_analysis, AnalysisRequest, AnswerAnalyzer, ReportRenderer, SpeechToText,
};
use crate::config::{JobsConfig, ScoringConfig};
use crate::error::{AppError, AppResult};
use crate::interview::scoring;
use crate::session::model::{Question, Verdict};
use crate::session::store::SessionStore;
use actix::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One unit of background work.
#[derive(Debug)]
pub enum Job {
    /// Transcribe a flushed audio batch and append the text to the
    /// answer's transcript.
    TranscribeBatch {
        session_id: Uuid,
        answer_id: Uuid,
        /// Round the batch was captured in; carried through to the
        /// outcome so a late batch is never labeled with a newer round.
        round: u32,
        samples: Vec<i16>,
        sample_rate: u32,
    },
    /// Analyze a finalized answer and record its score.
    ScoreAnswer {
        session_id: Uuid,
        answer_id: Uuid,
        question: Question,
        transcript: String,
        /// Answered quota fraction at finalization, for the
        /// end-of-interview gate
        progress: f64,
    },
    /// Prepare the opening message for a freshly connected candidate.
    Greeting { session_id: Uuid },
    /// Render and store the end-of-interview report.
    RenderReport { session_id: Uuid },
}

/// Result delivered back to the connection actor.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub enum JobOutcome {
    TranscriptAppended {
        answer_id: Uuid,
        round: u32,
        /// Text from this batch
        segment: String,
        /// Cumulative transcript after the append
        transcript: String,
    },
    TranscriptionFailed {
        answer_id: Uuid,
        error: String,
    },
    AnswerScored {
        answer_id: Uuid,
        components: BTreeMap<String, f64>,
        aggregate: f64,
        verdict: Verdict,
        summary: Option<String>,
        /// True when the neutral fallback was recorded
        degraded: bool,
    },
    GreetingReady {
        text: String,
    },
    ReportReady {
        report: String,
    },
}

/// Shared handles every job runs with.
pub struct JobRunner {
    pub store: Arc<SessionStore>,
    pub stt: Arc<dyn SpeechToText>,
    pub analyzer: Arc<dyn AnswerAnalyzer>,
    pub reporter: Arc<dyn ReportRenderer>,
    pub scoring: ScoringConfig,
    pub jobs: JobsConfig,
}

/// Cheap-to-clone job entry point held by connection actors.
#[derive(Clone)]
pub struct JobDispatcher {
    runner: Arc<JobRunner>,
}

impl JobDispatcher {
    pub fn new(runner: JobRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    /// Spawn the job; its outcome (if any) is delivered to `reply`.
    pub fn submit(&self, job: Job, reply: Recipient<JobOutcome>) {
        let runner = self.runner.clone();
        tokio::spawn(async move {
            if let Some(outcome) = runner.run(job).await {
                // The actor may have stopped; a dead recipient is fine.
                let _ = reply.do_send(outcome);
            }
        });
    }

    /// Run a job in the calling task instead of spawning. Used where
    /// ordering matters, e.g. the final audio batch must be transcribed
    /// before the answer is frozen.
    pub async fn run_inline(&self, job: Job) -> Option<JobOutcome> {
        self.runner.run(job).await
    }
}

impl JobRunner {
    /// Execute one job to completion. `None` means the job was skipped
    /// or its result dropped; the session hears nothing about it.
    pub async fn run(&self, job: Job) -> Option<JobOutcome> {
        let session_id = match &job {
            Job::TranscribeBatch { session_id, .. }
            | Job::ScoreAnswer { session_id, .. }
            | Job::Greeting { session_id }
            | Job::RenderReport { session_id } => *session_id,
        };

        // Report rendering is post-completion work; every other job is
        // dropped once the session stops being live.
        let post_completion = matches!(job, Job::RenderReport { .. });
        if !post_completion && !self.store.is_session_active(session_id) {
            debug!(%session_id, "Skipping job for inactive session");
            return None;
        }

        match job {
            Job::TranscribeBatch {
                session_id,
                answer_id,
                round,
                samples,
                sample_rate,
            } => {
                self.transcribe_batch(session_id, answer_id, round, &samples, sample_rate)
                    .await
            }
            Job::ScoreAnswer {
                session_id,
                answer_id,
                question,
                transcript,
                progress,
            } => {
                self.score_answer(session_id, answer_id, &question, &transcript, progress)
                    .await
            }
            Job::Greeting { session_id } => self.greeting(session_id).await,
            Job::RenderReport { session_id } => self.render_report(session_id).await,
        }
    }

    async fn transcribe_batch(
        &self,
        session_id: Uuid,
        answer_id: Uuid,
        round: u32,
        samples: &[i16],
        sample_rate: u32,
    ) -> Option<JobOutcome> {
        let segment = match self
            .with_retries("transcription", || self.stt.transcribe(samples, sample_rate))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                return Some(JobOutcome::TranscriptionFailed {
                    answer_id,
                    error: e.to_string(),
                });
            }
        };

        let segment = segment.trim().to_string();
        if segment.is_empty() {
            return None;
        }

        match self
            .store
            .append_transcript(session_id, answer_id, &segment)
            .await
        {
            Ok(transcript) => Some(JobOutcome::TranscriptAppended {
                answer_id,
                round,
                segment,
                transcript,
            }),
            // The turn ended while we were transcribing; the frozen
            // transcript stands and this segment is dropped.
            Err(AppError::InvalidState(msg)) => {
                info!(%session_id, %answer_id, "Dropping late transcription: {}", msg);
                None
            }
            Err(e) => {
                warn!(%session_id, %answer_id, "Transcript append failed: {}", e);
                None
            }
        }
    }

    async fn score_answer(
        &self,
        session_id: Uuid,
        answer_id: Uuid,
        question: &Question,
        transcript: &str,
        progress: f64,
    ) -> Option<JobOutcome> {
        let request = AnalysisRequest {
            question: question.text.clone(),
            topic: question.topic.clone(),
            difficulty: question.difficulty,
            transcript: transcript.to_string(),
        };

        let component_names: Vec<String> = self.scoring.weights.keys().cloned().collect();

        let (analysis, degraded) = match self
            .with_retries("analysis", || self.analyzer.analyze(&request))
            .await
        {
            Ok(analysis) => (analysis, false),
            Err(e) => {
                warn!(%session_id, %answer_id, "Analyzer failed, recording neutral score: {}", e);
                (neutral_analysis(&component_names), true)
            }
        };

        // An out-of-range analysis also degrades to neutral rather
        // than recording a corrupt aggregate.
        let (analysis, aggregate, degraded) =
            match scoring::aggregate_score(&analysis.components, &self.scoring) {
                Ok(aggregate) => (analysis, aggregate, degraded),
                Err(e) => {
                    warn!(%session_id, %answer_id, "Rejecting analysis: {}", e);
                    let neutral = neutral_analysis(&component_names);
                    let aggregate = scoring::aggregate_score(&neutral.components, &self.scoring)
                        .unwrap_or(0.5);
                    (neutral, aggregate, true)
                }
            };

        let verdict =
            scoring::verdict_for(aggregate, analysis.recommend_end, progress, &self.scoring);

        match self
            .store
            .record_score(
                session_id,
                answer_id,
                analysis.components.clone(),
                aggregate,
                verdict,
                analysis.summary.clone(),
            )
            .await
        {
            Ok(()) => Some(JobOutcome::AnswerScored {
                answer_id,
                components: analysis.components,
                aggregate,
                verdict,
                summary: analysis.summary,
                degraded,
            }),
            // Another job already scored this answer; its result stands.
            Err(AppError::StaleAnswer(msg)) => {
                info!(%session_id, %answer_id, "Dropping stale score: {}", msg);
                None
            }
            Err(e) => {
                warn!(%session_id, %answer_id, "Score record failed: {}", e);
                None
            }
        }
    }

    async fn greeting(&self, session_id: Uuid) -> Option<JobOutcome> {
        let (bank, distribution) = match self.store.interview_content(session_id).await {
            Ok(content) => content,
            Err(e) => {
                warn!(%session_id, "Greeting failed: {}", e);
                return None;
            }
        };

        let planned = if distribution.is_empty() {
            bank.questions.len() as u32
        } else {
            distribution.total()
        };

        Some(JobOutcome::GreetingReady {
            text: format!(
                "Welcome to your interview. You'll be asked around {} questions; \
                 answer out loud and take your time. Say you're done, or just \
                 pause, when you've finished an answer.",
                planned
            ),
        })
    }

    async fn render_report(&self, session_id: Uuid) -> Option<JobOutcome> {
        let result: AppResult<String> = async {
            let session = self.store.snapshot(session_id).await?;
            let answers = self.store.scored_answers(session_id).await?;
            let (bank, _) = self.store.interview_content(session_id).await?;
            self.reporter.render(&session, &answers, &bank).await
        }
        .await;

        match result {
            Ok(report) => {
                if let Err(e) = self.store.store_report(session_id, report.clone()).await {
                    warn!(%session_id, "Report store failed: {}", e);
                }
                Some(JobOutcome::ReportReady { report })
            }
            Err(e) => {
                warn!(%session_id, "Report rendering failed: {}", e);
                None
            }
        }
    }

    /// Retry dependency failures up to the configured limit; any other
    /// error aborts immediately.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut call: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(AppError::DependencyFailure(msg)) if attempt < self.jobs.max_retries => {
                    attempt += 1;
                    debug!(
                        "{} failed (attempt {}/{}), retrying: {}",
                        what, attempt, self.jobs.max_retries, msg
                    );
                    tokio::time::sleep(self.jobs.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
