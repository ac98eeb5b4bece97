//! # Interview WebSocket Handler
//!
//! One actor per connected candidate, reached at
//! `/ws/interview/{token}`. The actor is the single owner of the
//! per-turn state (turn detector, audio batcher) and the only place
//! session progress decisions are made; everything slow happens in
//! background jobs that report back as actor messages.
//!
//! ## Protocol:
//! - **Client → Server**: binary frames of 16-bit mono PCM audio, plus
//!   JSON control messages (`end_turn`, `skip_question`,
//!   `end_interview`).
//! - **Server → Client**: JSON events: `connection_established`,
//!   `greeting`, `next_question`, `transcription_update`,
//!   `scoring_update`, `interview_completed`, `error`.
//!
//! ## Turn lifecycle as seen from here:
//! question sent → frames stream in (gate → detector, batch → jobs) →
//! detector or candidate ends the turn → final batch transcribed
//! inline → answer frozen → scoring job → scored outcome → select the
//! next question or complete.

use crate::audio::batch::AudioBatcher;
use crate::audio::speech;
use crate::config::AppConfig;
use crate::interview::selector::{self, Selection};
use crate::jobs::{Job, JobOutcome};
use crate::session::model::{Difficulty, Question, QuestionBank, QuestionDistribution, Verdict};
use crate::session::store::SessionStore;
use crate::state::AppState;
use crate::turn::{EndReason, TurnDetector};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages sent to the candidate.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection_established")]
    ConnectionEstablished { session_id: Uuid },

    #[serde(rename = "greeting")]
    Greeting { text: String },

    #[serde(rename = "next_question")]
    NextQuestion {
        round: u32,
        question_id: u32,
        name: String,
        text: String,
        topic: String,
        difficulty: String,
        expected_secs: u32,
    },

    #[serde(rename = "transcription_update")]
    TranscriptionUpdate {
        answer_id: Uuid,
        round: u32,
        /// Text from the latest batch
        segment: String,
        /// Cumulative transcript for the open answer
        transcript: String,
    },

    #[serde(rename = "scoring_update")]
    ScoringUpdate {
        answer_id: Uuid,
        components: std::collections::BTreeMap<String, f64>,
        aggregate: f64,
        verdict: String,
        summary: Option<String>,
        degraded: bool,
    },

    #[serde(rename = "interview_completed")]
    InterviewCompleted { rounds: u32, report: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Control messages from the candidate.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// "I'm done answering this question"
    #[serde(rename = "end_turn")]
    EndTurn,

    /// "Next question please" — closes the turn without a scoring round
    #[serde(rename = "skip_question")]
    SkipQuestion,

    /// "End the whole interview now"
    #[serde(rename = "end_interview")]
    EndInterview,
}

/// Per-turn state owned exclusively by the actor.
struct OpenTurn {
    answer_id: Uuid,
    round: u32,
    question: Question,
    detector: TurnDetector,
}

pub struct InterviewSocket {
    state: AppState,
    config: AppConfig,
    session_id: Uuid,
    bank: Arc<QuestionBank>,
    distribution: Arc<QuestionDistribution>,
    turn: Option<OpenTurn>,
    batcher: AudioBatcher,
    /// Candidate asked to end the whole interview
    ending: bool,
    completed: bool,
    last_heartbeat: Instant,
}

impl InterviewSocket {
    pub fn new(
        state: AppState,
        session_id: Uuid,
        bank: Arc<QuestionBank>,
        distribution: Arc<QuestionDistribution>,
    ) -> Self {
        let config = state.get_config();
        let batcher = AudioBatcher::new(
            config.audio.batch_max_frames,
            config.audio.batch_max_duration(),
        );
        Self {
            state,
            config,
            session_id,
            bank,
            distribution,
            turn: None,
            batcher,
            ending: false,
            completed: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_json(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize server message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(session_id = %self.session_id, "WebSocket error {}: {}", code, message);
        self.send_json(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// The denominator for quota progress: the distribution total, or
    /// the bank size when no quotas were configured.
    fn quota_total(&self) -> u32 {
        if self.distribution.is_empty() {
            self.bank.questions.len() as u32
        } else {
            self.distribution.total()
        }
    }

    /// One inbound PCM frame: gate it, feed the detector, batch it.
    fn handle_audio_frame(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let turn_open = matches!(&self.turn, Some(t) if !t.detector.is_ended());
        if !turn_open {
            // Audio between turns (or after end-of-turn) carries no answer
            debug!(session_id = %self.session_id, "Dropping audio frame outside an open turn");
            return;
        }

        let samples = match speech::decode_pcm(data) {
            Ok(samples) => samples,
            Err(e) => {
                self.send_error(ctx, "invalid_audio", &e.to_string());
                return;
            }
        };

        let now = Instant::now();
        let has_speech = speech::frame_has_speech(&samples, self.config.audio.speech_rms_threshold);

        // Evaluate immediately after the frame as well as on the tick,
        // so an end condition is not left waiting for the next tick.
        let ended = self.turn.as_mut().and_then(|turn| {
            turn.detector.on_frame(has_speech, now);
            turn.detector.tick(now)
        });

        if let Some(batch) = self.batcher.append(&samples, now) {
            self.dispatch_transcription(batch.samples, ctx);
        }

        if let Some(reason) = ended {
            self.begin_finalize(reason, ctx);
        }
    }

    fn dispatch_transcription(&self, samples: Vec<i16>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(turn) = &self.turn else { return };
        self.state.record_job_dispatched();
        self.state.dispatcher.submit(
            Job::TranscribeBatch {
                session_id: self.session_id,
                answer_id: turn.answer_id,
                round: turn.round,
                samples,
                sample_rate: self.config.audio.sample_rate,
            },
            ctx.address().recipient(),
        );
    }

    /// Close the current turn: flush remaining audio, freeze the
    /// answer, then hand it to scoring. The detector has already
    /// transitioned, so a racing end signal arrives here at most once;
    /// idempotent finalization in the store covers anything already in
    /// flight.
    fn begin_finalize(&mut self, reason: EndReason, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(turn) = &self.turn else { return };
        info!(
            session_id = %self.session_id,
            round = turn.round,
            reason = reason.as_str(),
            "Turn ended"
        );

        let final_batch = self.batcher.flush_now(Instant::now());
        let store = self.state.store.clone();
        let dispatcher = self.state.dispatcher.clone();
        let session_id = self.session_id;
        let answer_id = turn.answer_id;
        let round = turn.round;
        let question = turn.question.clone();
        let sample_rate = self.config.audio.sample_rate;
        let quota_total = self.quota_total().max(1);
        let addr = ctx.address();

        self.state.record_turn_finalized();
        self.state.record_job_dispatched();

        tokio::spawn(async move {
            // The last partial batch must land in the transcript before
            // the answer freezes, so it runs inline rather than racing
            // the finalize below.
            if let Some(batch) = final_batch {
                if let Some(outcome) = dispatcher
                    .run_inline(Job::TranscribeBatch {
                        session_id,
                        answer_id,
                        round,
                        samples: batch.samples,
                        sample_rate,
                    })
                    .await
                {
                    let _ = addr.do_send(outcome);
                }
            }

            match store.finalize_answer(session_id, answer_id).await {
                Ok((transcript, true)) => {
                    let answered = store
                        .answered_question_ids(session_id)
                        .await
                        .unwrap_or_default();
                    let progress = answered.len() as f64 / quota_total as f64;
                    dispatcher.submit(
                        Job::ScoreAnswer {
                            session_id,
                            answer_id,
                            question,
                            transcript,
                            progress,
                        },
                        addr.recipient(),
                    );
                }
                Ok((_, false)) => {
                    debug!(%session_id, %answer_id, "Turn already finalized");
                }
                Err(e) => {
                    warn!(%session_id, %answer_id, "Finalize failed: {}", e);
                }
            }
        });
    }

    /// Pick and open the next turn off the actor thread; the result
    /// comes back as a `TurnStarted` message.
    fn advance_interview(
        &self,
        topic: Option<String>,
        difficulty: Difficulty,
        verdict: Verdict,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        tokio::spawn(open_next_turn(
            self.state.store.clone(),
            self.bank.clone(),
            self.distribution.clone(),
            self.session_id,
            topic,
            difficulty,
            verdict,
            ctx.address(),
        ));
    }

    /// A transcript segment is proof the candidate was speaking even
    /// when the frame gate missed it (soft speech below the RMS
    /// threshold), so it feeds the detector like a speech frame.
    fn register_transcript_activity(
        &mut self,
        answer_id: Uuid,
        now: Instant,
    ) -> Option<EndReason> {
        let turn = self.turn.as_mut()?;
        if turn.answer_id != answer_id || turn.detector.is_ended() {
            return None;
        }
        turn.detector.on_frame(true, now);
        turn.detector.tick(now)
    }

    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::EndTurn) => {
                let ended = self
                    .turn
                    .as_mut()
                    .map(|t| t.detector.end_manual())
                    .unwrap_or(false);
                if ended {
                    self.begin_finalize(EndReason::Manual, ctx);
                } else {
                    debug!(session_id = %self.session_id, "end_turn with no open turn");
                }
            }
            Ok(ClientMessage::SkipQuestion) => {
                let Some(turn) = self.turn.as_mut() else {
                    debug!(session_id = %self.session_id, "skip_question with no open turn");
                    return;
                };
                if !turn.detector.end_manual() {
                    debug!(session_id = %self.session_id, "skip_question after turn already ended");
                    return;
                }

                let answer_id = turn.answer_id;
                let round = turn.round;
                let topic = Some(turn.question.topic.clone());
                let difficulty = turn.question.difficulty;
                info!(session_id = %self.session_id, round, "Question skipped");

                // Skipped audio carries no answer; drop whatever was buffered
                let _ = self.batcher.flush_now(Instant::now());

                let store = self.state.store.clone();
                let bank = self.bank.clone();
                let distribution = self.distribution.clone();
                let session_id = self.session_id;
                let addr = ctx.address();

                tokio::spawn(async move {
                    // The skip must land before the next turn opens, so
                    // both happen in this one task.
                    match store.skip_answer(session_id, answer_id).await {
                        Ok(true) => {
                            open_next_turn(
                                store,
                                bank,
                                distribution,
                                session_id,
                                topic,
                                difficulty,
                                Verdict::Continue,
                                addr,
                            )
                            .await;
                        }
                        Ok(false) => {
                            debug!(%session_id, %answer_id, "Skip lost to another end-of-turn path");
                        }
                        Err(e) => {
                            warn!(%session_id, %answer_id, "Skip failed: {}", e);
                        }
                    }
                });
            }
            Ok(ClientMessage::EndInterview) => {
                info!(session_id = %self.session_id, "Candidate requested end of interview");
                self.ending = true;
                let ended = self
                    .turn
                    .as_mut()
                    .map(|t| t.detector.end_manual())
                    .unwrap_or(false);
                if ended {
                    // Completion follows once the final answer is scored
                    self.begin_finalize(EndReason::Manual, ctx);
                } else {
                    ctx.address().do_send(CompleteInterview);
                }
            }
            Err(e) => {
                self.send_error(ctx, "invalid_message", &format!("Invalid JSON: {}", e));
            }
        }
    }
}

/// Select the next question and open its turn, reporting back to the
/// actor. Runs in a spawned task so selection never blocks the socket.
#[allow(clippy::too_many_arguments)]
async fn open_next_turn(
    store: Arc<SessionStore>,
    bank: Arc<QuestionBank>,
    distribution: Arc<QuestionDistribution>,
    session_id: Uuid,
    topic: Option<String>,
    difficulty: Difficulty,
    verdict: Verdict,
    addr: Addr<InterviewSocket>,
) {
    let answered = match store.answered_question_ids(session_id).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(%session_id, "Cannot read answered questions: {}", e);
            return;
        }
    };

    let selection = selector::select_next(
        &bank,
        &distribution,
        &answered,
        topic.as_deref(),
        difficulty,
        verdict,
    );

    match selection {
        Selection::Next(question) => match store.start_turn(session_id, &question).await {
            Ok(answer) => addr.do_send(TurnStarted {
                answer_id: answer.id,
                round: answer.round,
                question,
            }),
            Err(e) => {
                warn!(%session_id, "Cannot open turn: {}", e);
            }
        },
        Selection::Exhausted => addr.do_send(CompleteInterview),
    }
}

/// Internal message: a new turn was opened in the store.
#[derive(Message)]
#[rtype(result = "()")]
struct TurnStarted {
    answer_id: Uuid,
    round: u32,
    question: Question,
}

/// Internal message: no more questions, or the candidate/analyzer
/// ended the interview.
#[derive(Message)]
#[rtype(result = "()")]
struct CompleteInterview;

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Interview connection started");
        self.state.connection_opened();

        self.send_json(
            ctx,
            &ServerMessage::ConnectionEstablished {
                session_id: self.session_id,
            },
        );

        // Greeting is prepared off-thread; the first question follows
        // once it has been delivered.
        self.state.record_job_dispatched();
        self.state.dispatcher.submit(
            Job::Greeting {
                session_id: self.session_id,
            },
            ctx.address().recipient(),
        );

        // Turn timers and the stalled-batch check share one tick.
        ctx.run_interval(self.config.turn.tick_interval(), |act, ctx| {
            let now = Instant::now();

            if act.batcher.is_due(now) {
                if let Some(batch) = act.batcher.flush_now(now) {
                    act.dispatch_transcription(batch.samples, ctx);
                }
            }

            let ended = act.turn.as_mut().and_then(|t| t.detector.tick(now));
            if let Some(reason) = ended {
                act.begin_finalize(reason, ctx);
            }
        });

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session_id, "Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Interview connection stopped");
        self.state.connection_closed();

        // Salvage what we can, then silence all background work for
        // this session: flush → freeze the open answer → mark inactive.
        // A completed session is already inactive; the report job is
        // exempt from the guard and still runs.
        let open_turn = self.turn.as_ref().map(|t| (t.answer_id, t.round));
        let final_batch = self.batcher.flush_now(Instant::now());
        let store = self.state.store.clone();
        let dispatcher = self.state.dispatcher.clone();
        let session_id = self.session_id;
        let sample_rate = self.config.audio.sample_rate;

        tokio::spawn(async move {
            if let Some((answer_id, round)) = open_turn {
                if let Some(batch) = final_batch {
                    // Nobody is listening anymore; only the store append matters.
                    let _ = dispatcher
                        .run_inline(Job::TranscribeBatch {
                            session_id,
                            answer_id,
                            round,
                            samples: batch.samples,
                            sample_rate,
                        })
                        .await;
                }
                if let Err(e) = store.finalize_answer(session_id, answer_id).await {
                    warn!(%session_id, "Finalize on disconnect failed: {}", e);
                }
            }
            store.mark_session_inactive(session_id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.handle_audio_frame(&data, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_control(&text, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "WebSocket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

impl Handler<JobOutcome> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: JobOutcome, ctx: &mut Self::Context) {
        match msg {
            JobOutcome::GreetingReady { text } => {
                self.send_json(ctx, &ServerMessage::Greeting { text });

                // Open the first turn at the session's starting level.
                let difficulty = self
                    .turn
                    .as_ref()
                    .map(|t| t.question.difficulty)
                    .unwrap_or(Difficulty::Easy);
                self.advance_interview(None, difficulty, Verdict::Continue, ctx);
            }
            JobOutcome::TranscriptAppended {
                answer_id,
                round,
                segment,
                transcript,
            } => {
                let ended = self.register_transcript_activity(answer_id, Instant::now());
                self.send_json(
                    ctx,
                    &ServerMessage::TranscriptionUpdate {
                        answer_id,
                        round,
                        segment,
                        transcript,
                    },
                );
                if let Some(reason) = ended {
                    self.begin_finalize(reason, ctx);
                }
            }
            JobOutcome::TranscriptionFailed { answer_id, error } => {
                // Timeouts keep the turn moving; the candidate just
                // gets no live transcript for this batch.
                debug!(
                    session_id = %self.session_id,
                    %answer_id,
                    "Transcription unavailable: {}", error
                );
                self.state.record_job_degraded();
            }
            JobOutcome::AnswerScored {
                answer_id,
                aggregate,
                verdict,
                summary,
                degraded,
                components,
            } => {
                if degraded {
                    self.state.record_job_degraded();
                }
                self.send_json(
                    ctx,
                    &ServerMessage::ScoringUpdate {
                        answer_id,
                        components,
                        aggregate,
                        verdict: verdict.as_str().to_string(),
                        summary,
                        degraded,
                    },
                );

                if self.ending || verdict == Verdict::Complete {
                    ctx.address().do_send(CompleteInterview);
                    return;
                }

                let (topic, difficulty) = match &self.turn {
                    Some(turn) => (
                        Some(turn.question.topic.clone()),
                        turn.question.difficulty,
                    ),
                    None => (None, Difficulty::Easy),
                };
                self.advance_interview(topic, difficulty, verdict, ctx);
            }
            JobOutcome::ReportReady { report } => {
                let rounds = self.turn.as_ref().map(|t| t.round).unwrap_or(0);
                self.send_json(ctx, &ServerMessage::InterviewCompleted { rounds, report });
            }
        }
    }
}

impl Handler<TurnStarted> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: TurnStarted, ctx: &mut Self::Context) {
        if self.completed {
            return;
        }

        info!(
            session_id = %self.session_id,
            round = msg.round,
            question = msg.question.id,
            "Asking question"
        );

        // Fresh per-turn state; the previous detector is terminal and
        // the batcher was flushed at finalize.
        self.turn = Some(OpenTurn {
            answer_id: msg.answer_id,
            round: msg.round,
            question: msg.question.clone(),
            detector: TurnDetector::new(&self.config.turn, Instant::now()),
        });
        self.batcher = AudioBatcher::new(
            self.config.audio.batch_max_frames,
            self.config.audio.batch_max_duration(),
        );

        self.send_json(
            ctx,
            &ServerMessage::NextQuestion {
                round: msg.round,
                question_id: msg.question.id,
                name: msg.question.name,
                text: msg.question.text,
                topic: msg.question.topic,
                difficulty: msg.question.difficulty.as_str().to_string(),
                expected_secs: msg.question.expected_secs,
            },
        );
    }
}

impl Handler<CompleteInterview> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, _msg: CompleteInterview, ctx: &mut Self::Context) {
        if self.completed {
            return;
        }
        self.completed = true;
        info!(session_id = %self.session_id, "Interview complete");

        self.state.record_session_completed();
        self.state.record_job_dispatched();

        let store = self.state.store.clone();
        let dispatcher = self.state.dispatcher.clone();
        let session_id = self.session_id;
        let addr = ctx.address();

        tokio::spawn(async move {
            if let Err(e) = store.complete_session(session_id).await {
                warn!(%session_id, "Complete session failed: {}", e);
            }
            // Completion deactivates the session; report rendering is
            // the one job that still runs for it. The client hears
            // interview_completed once it lands.
            dispatcher.submit(Job::RenderReport { session_id }, addr.recipient());
        });
    }
}

/// HTTP entry point: validates the token, activates the session, and
/// upgrades to the WebSocket actor.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let token = path.into_inner();
    info!(
        "New interview connection from: {:?}",
        req.connection_info().peer_addr()
    );

    let store = app_state.store.clone();
    let session_id = store.session_for_token(&token)?;
    let (bank, distribution) = store.interview_content(session_id).await?;
    store.activate_session(session_id).await?;

    let socket = InterviewSocket::new(
        app_state.get_ref().clone(),
        session_id,
        bank,
        distribution,
    );
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DisabledSpeechToText, NeutralAnalyzer, TextReportRenderer};
    use crate::jobs::{JobDispatcher, JobRunner};

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::NextQuestion {
            round: 2,
            question_id: 7,
            name: "sql-indexes".to_string(),
            text: "How does a B-tree index work?".to_string(),
            topic: "databases".to_string(),
            difficulty: "medium".to_string(),
            expected_secs: 90,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"next_question\""));
        assert!(json.contains("\"round\":2"));
        assert!(json.contains("sql-indexes"));
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "end_turn"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::EndTurn));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "skip_question"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SkipQuestion));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "end_interview"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::EndInterview));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "nope"}"#).is_err());
    }

    fn test_socket() -> InterviewSocket {
        let config = AppConfig::default();
        let store = Arc::new(SessionStore::new());
        let dispatcher = JobDispatcher::new(JobRunner {
            store: store.clone(),
            stt: Arc::new(DisabledSpeechToText),
            analyzer: Arc::new(NeutralAnalyzer::new(vec!["correctness".to_string()])),
            reporter: Arc::new(TextReportRenderer),
            scoring: config.scoring.clone(),
            jobs: config.jobs.clone(),
        });
        let state = AppState::new(config, store, dispatcher);
        InterviewSocket::new(
            state,
            Uuid::new_v4(),
            Arc::new(QuestionBank::default()),
            Arc::new(QuestionDistribution::new()),
        )
    }

    fn open_turn_at(t0: Instant, config: &AppConfig) -> OpenTurn {
        OpenTurn {
            answer_id: Uuid::new_v4(),
            round: 1,
            question: Question {
                id: 1,
                name: "q1".to_string(),
                text: "Question?".to_string(),
                topic: "databases".to_string(),
                difficulty: Difficulty::Easy,
                expected_secs: 60,
            },
            detector: TurnDetector::new(&config.turn, t0),
        }
    }

    #[test]
    fn test_transcript_counts_as_speech() {
        let mut socket = test_socket();
        let config = AppConfig::default();
        let t0 = Instant::now();
        let turn = open_turn_at(t0, &config);
        let answer_id = turn.answer_id;
        socket.turn = Some(turn);

        // Soft speech: the frame gate never fires, but transcript
        // segments keep arriving. At t=115 the no-speech window has
        // almost elapsed.
        let ended =
            socket.register_transcript_activity(answer_id, t0 + Duration::from_secs(115));
        assert_eq!(ended, None);

        // The turn now ends through the silence rule, not the
        // no-speech timeout at t=120.
        let detector = &mut socket.turn.as_mut().unwrap().detector;
        assert_eq!(detector.tick(t0 + Duration::from_secs(120)), None);
        assert_eq!(
            detector.tick(t0 + Duration::from_secs(125)),
            Some(EndReason::Silence)
        );
    }

    #[test]
    fn test_transcript_for_other_answer_is_ignored() {
        let mut socket = test_socket();
        let config = AppConfig::default();
        let t0 = Instant::now();
        socket.turn = Some(open_turn_at(t0, &config));

        // A late segment from a previous answer must not count as
        // speech for the current turn.
        let ended =
            socket.register_transcript_activity(Uuid::new_v4(), t0 + Duration::from_secs(115));
        assert_eq!(ended, None);

        let detector = &mut socket.turn.as_mut().unwrap().detector;
        assert_eq!(
            detector.tick(t0 + Duration::from_secs(120)),
            Some(EndReason::TimeoutNoSpeech)
        );
    }

    #[test]
    fn test_scoring_update_round_trip() {
        let mut components = std::collections::BTreeMap::new();
        components.insert("correctness".to_string(), 0.8);
        let msg = ServerMessage::ScoringUpdate {
            answer_id: Uuid::new_v4(),
            components,
            aggregate: 0.74,
            verdict: "continue".to_string(),
            summary: Some("solid answer".to_string()),
            degraded: false,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerMessage::ScoringUpdate {
                aggregate, verdict, ..
            } => {
                assert!((aggregate - 0.74).abs() < 1e-9);
                assert_eq!(verdict, "continue");
            }
            _ => panic!("wrong message type"),
        }
    }
}
