//! # External Collaborators
//!
//! Trait seams for the services the backend talks to from background
//! jobs: speech-to-text, answer analysis, and report rendering. Each
//! trait has a production implementation and a built-in stand-in so
//! the session pipeline runs end to end without external services.

use crate::error::{AppError, AppResult};
use crate::session::model::{Difficulty, InterviewAnswer, InterviewSession, QuestionBank};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// What an analyzer says about one finalized answer.
#[derive(Debug, Clone)]
pub struct AnswerAnalysis {
    /// Score component name -> value in [0, 1]
    pub components: BTreeMap<String, f64>,
    pub summary: Option<String>,
    /// Analyzer's opinion that the interview can end early
    pub recommend_end: bool,
}

/// Inputs for one answer analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub question: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub transcript: String,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one batch of mono PCM samples.
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> AppResult<String>;
}

#[async_trait]
pub trait AnswerAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> AppResult<AnswerAnalysis>;
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render the end-of-interview report document.
    async fn render(
        &self,
        session: &InterviewSession,
        answers: &[InterviewAnswer],
        bank: &QuestionBank,
    ) -> AppResult<String>;
}

/// No transcription backend configured. Every batch reports a
/// dependency failure; the turn timeouts keep the session moving.
pub struct DisabledSpeechToText;

#[async_trait]
impl SpeechToText for DisabledSpeechToText {
    async fn transcribe(&self, _samples: &[i16], _sample_rate: u32) -> AppResult<String> {
        Err(AppError::DependencyFailure(
            "no speech-to-text backend configured".to_string(),
        ))
    }
}

/// Speech-to-text via an Ollama-compatible
/// `/api/audio/transcriptions` endpoint. PCM samples are wrapped in a
/// WAV container and uploaded as a multipart file.
pub struct WhisperSpeechToText {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl WhisperSpeechToText {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// 16-bit mono PCM in a minimal RIFF/WAVE container.
    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);

        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");

        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
        out.extend_from_slice(&2u16.to_le_bytes()); // block align
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SpeechToText for WhisperSpeechToText {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> AppResult<String> {
        let url = format!("{}/api/audio/transcriptions", self.base_url);

        let file = reqwest::multipart::Part::bytes(Self::wav_bytes(samples, sample_rate))
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AppError::Internal(format!("wav upload part: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("transcriber unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::DependencyFailure(format!(
                "transcriber returned HTTP {}",
                response.status()
            )));
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("transcriber response: {}", e)))?;

        debug!(chars = transcription.text.len(), "Transcription received");
        Ok(transcription.text)
    }
}

/// Answer analysis via an Ollama-compatible `/api/generate` endpoint,
/// requesting strict-JSON output.
pub struct OllamaAnalyzer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    component_names: Vec<String>,
}

impl OllamaAnalyzer {
    pub fn new(base_url: &str, model: &str, component_names: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            component_names,
        }
    }

    fn prompt(&self, request: &AnalysisRequest) -> String {
        format!(
            "You are scoring a spoken answer from a technical interview.\n\
             Question ({} / {}): {}\n\
             Candidate's answer (transcribed): {}\n\n\
             Respond with JSON only, no prose, using this shape:\n\
             {{\"scores\": {{{}}}, \"summary\": \"<one sentence>\", \"end_interview\": false}}\n\
             Each score must be a number between 0.0 and 1.0. Set\n\
             end_interview to true only if the interview has clearly\n\
             gathered enough signal to stop.",
            request.topic,
            request.difficulty.as_str(),
            request.question,
            request.transcript,
            self.component_names
                .iter()
                .map(|name| format!("\"{}\": 0.0", name))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzerOutput {
    #[serde(default)]
    scores: BTreeMap<String, f64>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    end_interview: bool,
}

#[async_trait]
impl AnswerAnalyzer for OllamaAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> AppResult<AnswerAnalysis> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": self.prompt(request),
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("analyzer unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::DependencyFailure(format!(
                "analyzer returned HTTP {}",
                response.status()
            )));
        }

        let generate: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("analyzer response: {}", e)))?;

        let output: AnalyzerOutput = serde_json::from_str(&generate.response)
            .map_err(|e| AppError::DependencyFailure(format!("analyzer JSON: {}", e)))?;

        debug!(scores = ?output.scores, "Analyzer response parsed");
        Ok(AnswerAnalysis {
            components: output.scores,
            summary: output.summary,
            recommend_end: output.end_interview,
        })
    }
}

/// Fixed neutral scores for the configured components. Used both as a
/// standalone analyzer and as the degraded fallback when the real one
/// fails repeatedly.
pub struct NeutralAnalyzer {
    component_names: Vec<String>,
}

impl NeutralAnalyzer {
    pub fn new(component_names: Vec<String>) -> Self {
        Self { component_names }
    }
}

/// The neutral analysis recorded on the degraded path: mid-scale on
/// every component so one failed scoring round neither sinks nor
/// inflates the candidate.
pub fn neutral_analysis(component_names: &[String]) -> AnswerAnalysis {
    AnswerAnalysis {
        components: component_names
            .iter()
            .map(|name| (name.clone(), 0.5))
            .collect(),
        summary: Some("Scoring unavailable; neutral score recorded.".to_string()),
        recommend_end: false,
    }
}

#[async_trait]
impl AnswerAnalyzer for NeutralAnalyzer {
    async fn analyze(&self, _request: &AnalysisRequest) -> AppResult<AnswerAnalysis> {
        Ok(neutral_analysis(&self.component_names))
    }
}

/// Plain-text end-of-interview report.
pub struct TextReportRenderer;

#[async_trait]
impl ReportRenderer for TextReportRenderer {
    async fn render(
        &self,
        session: &InterviewSession,
        answers: &[InterviewAnswer],
        bank: &QuestionBank,
    ) -> AppResult<String> {
        let mut out = String::new();
        out.push_str(&format!(
            "Interview report — session {}\nRounds completed: {}\n\n",
            session.id,
            answers.len()
        ));

        let mut total = 0.0;
        let mut scored = 0usize;
        for answer in answers {
            let question = bank
                .get(answer.question_id)
                .map(|q| q.name.as_str())
                .unwrap_or("unknown question");
            let aggregate = answer.aggregate.unwrap_or(0.0);
            total += aggregate;
            scored += 1;

            out.push_str(&format!(
                "Round {}: {} — score {:.2}",
                answer.round, question, aggregate
            ));
            if let Some(verdict) = answer.verdict {
                out.push_str(&format!(" ({})", verdict.as_str()));
            }
            out.push('\n');
            if let Some(summary) = &answer.summary {
                out.push_str(&format!("  {}\n", summary));
            }
        }

        if scored > 0 {
            out.push_str(&format!(
                "\nOverall average: {:.2}\n",
                total / scored as f64
            ));
        } else {
            out.push_str("\nNo answers were scored.\n");
        }

        Ok(out)
    }
}
