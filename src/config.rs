//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The defaults encode the interview tuning knobs: audio batch flush
//! thresholds, turn-detection timeouts, scoring weights and verdict
//! bands, and the background-job retry policy.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub turn: TurnConfig,
    pub scoring: ScoringConfig,
    pub jobs: JobsConfig,
    pub models: ModelsConfig,
    pub interview: InterviewConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Inbound audio format and batch flush policy.
///
/// Frames are buffered per session and handed to a transcription job
/// once either flush threshold is reached: `batch_max_frames` frames
/// in the open batch, or `batch_max_duration_ms` elapsed since the
/// batch was opened. `speech_rms_threshold` is the RMS energy gate
/// used to decide whether a frame carries speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub batch_max_frames: usize,
    pub batch_max_duration_ms: u64,
    pub speech_rms_threshold: f64,
}

impl AudioConfig {
    pub fn batch_max_duration(&self) -> Duration {
        Duration::from_millis(self.batch_max_duration_ms)
    }
}

/// Turn-detection timeouts, all in seconds.
///
/// - `no_speech_timeout_secs`: end the turn if no speech was ever
///   detected this long after the question was asked.
/// - `mid_speech_timeout_secs`: end the turn if audio stops arriving
///   for this long after speech has started.
/// - `silence_secs`: end the turn after this much silence following
///   speech, but never before `min_turn_secs` of total elapsed time.
/// - `max_turn_secs`: absolute ceiling regardless of speech activity.
/// - `tick_interval_secs`: cadence of the periodic timeout check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    pub no_speech_timeout_secs: u64,
    pub mid_speech_timeout_secs: u64,
    pub silence_secs: u64,
    pub min_turn_secs: u64,
    pub max_turn_secs: u64,
    pub tick_interval_secs: u64,
}

impl TurnConfig {
    pub fn no_speech_timeout(&self) -> Duration {
        Duration::from_secs(self.no_speech_timeout_secs)
    }

    pub fn mid_speech_timeout(&self) -> Duration {
        Duration::from_secs(self.mid_speech_timeout_secs)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_secs(self.silence_secs)
    }

    pub fn min_turn_duration(&self) -> Duration {
        Duration::from_secs(self.min_turn_secs)
    }

    pub fn max_turn_duration(&self) -> Duration {
        Duration::from_secs(self.max_turn_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Score aggregation weights and verdict bands.
///
/// `weights` maps score component names to their share of the
/// aggregate and must sum to 1.0; components missing from an analysis
/// are excluded and the remaining weights renormalized. The aggregate
/// is thresholded into a verdict: `>= drill_up_at` raises difficulty,
/// `< drill_down_below` lowers it. An analyzer recommendation to end
/// the interview is honored only once at least
/// `min_progress_to_complete` of the question quota has been answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: HashMap<String, f64>,
    pub drill_up_at: f64,
    pub drill_down_below: f64,
    pub min_progress_to_complete: f64,
}

/// Background job retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl JobsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// External collaborator endpoints.
///
/// `transcriber` selects the speech-to-text backend: a base URL points
/// at an Ollama-compatible audio transcription endpoint serving
/// `transcriber_model`, while "disabled" runs the pipeline without one
/// (transcription jobs then report a dependency failure and the turn
/// timeouts keep the session moving).
/// `analyzer_url`/`analyzer_model` point at an Ollama-compatible
/// generate endpoint for answer scoring; "neutral" as the URL selects
/// the built-in fixed-score analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub transcriber: String,
    pub transcriber_model: String,
    pub analyzer_url: String,
    pub analyzer_model: String,
}

/// Interview content configuration.
///
/// `bank_path` points at a TOML file holding the question bank, the
/// per-(topic, difficulty) distribution quotas, and the enrolled
/// candidate tokens. Empty string means no bank is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    pub bank_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("correctness".to_string(), 0.5);
        weights.insert("clarity".to_string(), 0.3);
        weights.insert("depth".to_string(), 0.2);

        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                channels: 1,
                bit_depth: 16,
                batch_max_frames: 4,
                batch_max_duration_ms: 2_000,
                speech_rms_threshold: 300.0,
            },
            turn: TurnConfig {
                no_speech_timeout_secs: 120,
                mid_speech_timeout_secs: 120,
                silence_secs: 10,
                min_turn_secs: 10,
                max_turn_secs: 300,
                tick_interval_secs: 1,
            },
            scoring: ScoringConfig {
                weights,
                drill_up_at: 0.75,
                drill_down_below: 0.4,
                min_progress_to_complete: 0.5,
            },
            jobs: JobsConfig {
                max_retries: 2,
                retry_delay_ms: 500,
            },
            models: ModelsConfig {
                transcriber: "disabled".to_string(),
                transcriber_model: "whisper".to_string(),
                analyzer_url: "neutral".to_string(),
                analyzer_model: "llama3.1:8b".to_string(),
            },
            interview: InterviewConfig {
                bank_path: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject HOST/PORT without the
        // APP_ prefix; honor them as overrides.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.batch_max_frames == 0 {
            return Err(anyhow::anyhow!(
                "audio.batch_max_frames must be greater than 0"
            ));
        }

        if self.audio.batch_max_duration_ms == 0 {
            return Err(anyhow::anyhow!(
                "audio.batch_max_duration_ms must be greater than 0"
            ));
        }

        if self.turn.tick_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "turn.tick_interval_secs must be greater than 0"
            ));
        }

        if self.turn.max_turn_secs < self.turn.min_turn_secs {
            return Err(anyhow::anyhow!(
                "turn.max_turn_secs must be at least turn.min_turn_secs"
            ));
        }

        if self.scoring.weights.is_empty() {
            return Err(anyhow::anyhow!("scoring.weights must not be empty"));
        }

        let weight_sum: f64 = self.scoring.weights.values().sum();
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err(anyhow::anyhow!(
                "scoring.weights must sum to 1.0 (got {:.4})",
                weight_sum
            ));
        }

        if self.scoring.drill_down_below > self.scoring.drill_up_at {
            return Err(anyhow::anyhow!(
                "scoring.drill_down_below must not exceed scoring.drill_up_at"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Only the fields present in the JSON are updated; the result is
    /// re-validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(frames) = audio.get("batch_max_frames").and_then(|v| v.as_u64()) {
                self.audio.batch_max_frames = frames as usize;
            }
            if let Some(ms) = audio.get("batch_max_duration_ms").and_then(|v| v.as_u64()) {
                self.audio.batch_max_duration_ms = ms;
            }
            if let Some(rms) = audio.get("speech_rms_threshold").and_then(|v| v.as_f64()) {
                self.audio.speech_rms_threshold = rms;
            }
        }

        if let Some(turn) = partial_config.get("turn") {
            if let Some(secs) = turn.get("no_speech_timeout_secs").and_then(|v| v.as_u64()) {
                self.turn.no_speech_timeout_secs = secs;
            }
            if let Some(secs) = turn.get("mid_speech_timeout_secs").and_then(|v| v.as_u64()) {
                self.turn.mid_speech_timeout_secs = secs;
            }
            if let Some(secs) = turn.get("silence_secs").and_then(|v| v.as_u64()) {
                self.turn.silence_secs = secs;
            }
            if let Some(secs) = turn.get("max_turn_secs").and_then(|v| v.as_u64()) {
                self.turn.max_turn_secs = secs;
            }
        }

        if let Some(models) = partial_config.get("models") {
            if let Some(backend) = models.get("transcriber").and_then(|v| v.as_str()) {
                self.models.transcriber = backend.to_string();
            }
            if let Some(model) = models.get("transcriber_model").and_then(|v| v.as_str()) {
                self.models.transcriber_model = model.to_string();
            }
            if let Some(url) = models.get("analyzer_url").and_then(|v| v.as_str()) {
                self.models.analyzer_url = url.to_string();
            }
            if let Some(model) = models.get("analyzer_model").and_then(|v| v.as_str()) {
                self.models.analyzer_model = model.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}
