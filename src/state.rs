//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor:
//! the runtime configuration, the session store, the job dispatcher,
//! and process-wide counters for the metrics endpoint.
//!
//! Everything mutable sits behind `Arc<RwLock<...>>`; snapshots are
//! cloned out so no lock is held while a response is being built.

use crate::config::AppConfig;
use crate::jobs::JobDispatcher;
use crate::session::store::SessionStore;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all request handlers and connection actors.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration (updatable through the config endpoint)
    pub config: Arc<RwLock<AppConfig>>,

    /// All enrolled interview sessions
    pub store: Arc<SessionStore>,

    /// Background job entry point
    pub dispatcher: JobDispatcher,

    /// Process-wide counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub start_time: Instant,
}

/// Counters reported by the metrics endpoint.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Currently open WebSocket connections
    pub active_connections: u32,
    /// Background jobs handed to the dispatcher
    pub jobs_dispatched: u64,
    /// Job outcomes that came back failed or degraded
    pub jobs_degraded: u64,
    /// Turns finalized (by any end reason)
    pub turns_finalized: u64,
    /// Interviews that completed normally
    pub sessions_completed: u64,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<SessionStore>, dispatcher: JobDispatcher) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            dispatcher,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// A copy of the current configuration; the lock is released
    /// before the caller does anything with it.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn connection_opened(&self) {
        self.metrics.write().unwrap().active_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_connections > 0 {
            metrics.active_connections -= 1;
        }
    }

    pub fn record_job_dispatched(&self) {
        self.metrics.write().unwrap().jobs_dispatched += 1;
    }

    pub fn record_job_degraded(&self) {
        self.metrics.write().unwrap().jobs_degraded += 1;
    }

    pub fn record_turn_finalized(&self) {
        self.metrics.write().unwrap().turns_finalized += 1;
    }

    pub fn record_session_completed(&self) {
        self.metrics.write().unwrap().sessions_completed += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DisabledSpeechToText, NeutralAnalyzer, TextReportRenderer};
    use crate::jobs::JobRunner;

    fn test_state() -> AppState {
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
        AppState::new(config, store, dispatcher)
    }

    #[test]
    fn test_connection_counter_does_not_underflow() {
        let state = test_state();
        state.connection_opened();
        state.connection_closed();
        state.connection_closed();
        assert_eq!(state.get_metrics_snapshot().active_connections, 0);
    }

    #[test]
    fn test_config_update_validates() {
        let state = test_state();
        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = state.get_config();
        good.turn.silence_secs = 5;
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().turn.silence_secs, 5);
    }
}
