//! # Turn Detection
//!
//! Decides when the candidate has finished answering the current
//! question. One detector instance exists per open turn, owned by the
//! connection actor, and is evaluated on every inbound audio frame and
//! once per timer tick.
//!
//! ## End conditions:
//! - **TimeoutNoSpeech**: no speech was ever detected within the
//!   no-speech window after the question was asked.
//! - **Silence**: speech happened, then went quiet for the silence
//!   window — but never before the minimum turn duration has elapsed,
//!   so a thinking pause right after the question does not cut the
//!   turn short.
//! - **TimeoutMidSpeech**: audio frames stopped arriving entirely
//!   after speech had started (client hang, dead microphone).
//! - **MaxDuration**: absolute ceiling on turn length.
//! - **Manual**: the candidate pressed "done". Wins over every timer
//!   rule.
//!
//! The transition to `Ended` happens exactly once; after that every
//! frame and tick is a no-op. Duplicate end signals are therefore
//! resolved here, before any session state is touched.

use crate::config::TurnConfig;
use std::time::{Duration, Instant};

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Silence,
    TimeoutNoSpeech,
    TimeoutMidSpeech,
    MaxDuration,
    Manual,
}

impl EndReason {
    pub fn as_str(&self) -> &str {
        match self {
            EndReason::Silence => "silence",
            EndReason::TimeoutNoSpeech => "timeout_no_speech",
            EndReason::TimeoutMidSpeech => "timeout_mid_speech",
            EndReason::MaxDuration => "max_duration",
            EndReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Question asked, no speech heard yet
    AwaitingSpeech,
    /// Speech detected at least once
    SpeechActive,
    /// Terminal; the reason is recorded once and never changes
    Ended(EndReason),
}

/// Per-turn end-of-answer state machine. All timing is injected via
/// `Instant` parameters; the detector never reads the clock itself.
pub struct TurnDetector {
    no_speech_timeout: Duration,
    mid_speech_timeout: Duration,
    silence_threshold: Duration,
    min_turn: Duration,
    max_turn: Duration,

    phase: Phase,
    started_at: Instant,
    last_frame_at: Instant,
    last_speech_at: Option<Instant>,
}

impl TurnDetector {
    /// A fresh detector for a turn opened at `started_at` (the moment
    /// the question was sent).
    pub fn new(config: &TurnConfig, started_at: Instant) -> Self {
        Self {
            no_speech_timeout: config.no_speech_timeout(),
            mid_speech_timeout: config.mid_speech_timeout(),
            silence_threshold: config.silence_threshold(),
            min_turn: config.min_turn_duration(),
            max_turn: config.max_turn_duration(),
            phase: Phase::AwaitingSpeech,
            started_at,
            last_frame_at: started_at,
            last_speech_at: None,
        }
    }

    /// Record an inbound audio frame and its speech-gate verdict.
    pub fn on_frame(&mut self, has_speech: bool, now: Instant) {
        if matches!(self.phase, Phase::Ended(_)) {
            return;
        }

        self.last_frame_at = now;
        if has_speech {
            self.last_speech_at = Some(now);
            if self.phase == Phase::AwaitingSpeech {
                self.phase = Phase::SpeechActive;
            }
        }
    }

    /// Evaluate the timer rules. Returns `Some(reason)` on the tick
    /// that ends the turn and `None` on every other tick, including
    /// all ticks after the turn has ended.
    pub fn tick(&mut self, now: Instant) -> Option<EndReason> {
        let elapsed = now - self.started_at;

        let reason = match self.phase {
            Phase::Ended(_) => return None,
            _ if elapsed >= self.max_turn => EndReason::MaxDuration,
            Phase::AwaitingSpeech if elapsed >= self.no_speech_timeout => {
                EndReason::TimeoutNoSpeech
            }
            Phase::SpeechActive => {
                let silent_for = self
                    .last_speech_at
                    .map(|at| now - at)
                    .unwrap_or(elapsed);
                if silent_for >= self.silence_threshold && elapsed >= self.min_turn {
                    EndReason::Silence
                } else if now - self.last_frame_at >= self.mid_speech_timeout {
                    EndReason::TimeoutMidSpeech
                } else {
                    return None;
                }
            }
            _ => return None,
        };

        self.phase = Phase::Ended(reason);
        Some(reason)
    }

    /// Candidate-initiated end of turn. Returns `true` if this call
    /// ended the turn, `false` if it had already ended.
    pub fn end_manual(&mut self) -> bool {
        if matches!(self.phase, Phase::Ended(_)) {
            return false;
        }
        self.phase = Phase::Ended(EndReason::Manual);
        true
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.phase, Phase::Ended(_))
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        match self.phase {
            Phase::Ended(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn detector(t0: Instant) -> TurnDetector {
        TurnDetector::new(&AppConfig::default().turn, t0)
    }

    #[test]
    fn test_no_speech_timeout_fires_at_window() {
        let t0 = Instant::now();
        let mut det = detector(t0);

        assert_eq!(det.tick(t0 + Duration::from_secs(119)), None);
        assert_eq!(
            det.tick(t0 + Duration::from_secs(120)),
            Some(EndReason::TimeoutNoSpeech)
        );
        // Terminal: later ticks stay quiet
        assert_eq!(det.tick(t0 + Duration::from_secs(121)), None);
        assert_eq!(det.end_reason(), Some(EndReason::TimeoutNoSpeech));
    }

    #[test]
    fn test_silence_after_speech() {
        let t0 = Instant::now();
        let mut det = detector(t0);

        det.on_frame(true, t0 + Duration::from_secs(2));
        det.on_frame(false, t0 + Duration::from_secs(3));

        // 9 s of silence: not yet
        assert_eq!(det.tick(t0 + Duration::from_secs(11)), None);
        // 10 s past last speech
        assert_eq!(
            det.tick(t0 + Duration::from_secs(12)),
            Some(EndReason::Silence)
        );
    }

    #[test]
    fn test_min_turn_guard_delays_silence() {
        let t0 = Instant::now();
        let mut config = AppConfig::default().turn;
        config.min_turn_secs = 30;
        let mut det = TurnDetector::new(&config, t0);

        // A one-word answer right away, then silence. The silence
        // window is met at t=11 but the minimum turn duration holds
        // the turn open until t=30.
        det.on_frame(true, t0 + Duration::from_secs(1));
        assert_eq!(det.tick(t0 + Duration::from_secs(15)), None);
        assert_eq!(det.tick(t0 + Duration::from_secs(29)), None);
        assert_eq!(
            det.tick(t0 + Duration::from_secs(30)),
            Some(EndReason::Silence)
        );
    }

    #[test]
    fn test_continued_speech_resets_silence() {
        let t0 = Instant::now();
        let mut det = detector(t0);

        det.on_frame(true, t0 + Duration::from_secs(1));
        det.on_frame(true, t0 + Duration::from_secs(8));
        // Only 7 s since last speech at t=15
        assert_eq!(det.tick(t0 + Duration::from_secs(15)), None);
        assert_eq!(
            det.tick(t0 + Duration::from_secs(18)),
            Some(EndReason::Silence)
        );
    }

    #[test]
    fn test_mid_speech_timeout_when_frames_stop() {
        let t0 = Instant::now();
        let mut config = AppConfig::default().turn;
        // Make the frame dropout rule observable before the silence
        // rule by disabling silence detection.
        config.silence_secs = 1_000;
        let mut det = TurnDetector::new(&config, t0);

        det.on_frame(true, t0 + Duration::from_secs(5));
        assert_eq!(det.tick(t0 + Duration::from_secs(124)), None);
        assert_eq!(
            det.tick(t0 + Duration::from_secs(125)),
            Some(EndReason::TimeoutMidSpeech)
        );
    }

    #[test]
    fn test_max_duration_backstop() {
        let t0 = Instant::now();
        let mut config = AppConfig::default().turn;
        config.silence_secs = 1_000;
        config.mid_speech_timeout_secs = 1_000;
        let mut det = TurnDetector::new(&config, t0);

        // Keep talking the whole time; the ceiling still applies.
        for s in 0..300 {
            det.on_frame(true, t0 + Duration::from_secs(s));
        }
        assert_eq!(det.tick(t0 + Duration::from_secs(299)), None);
        assert_eq!(
            det.tick(t0 + Duration::from_secs(300)),
            Some(EndReason::MaxDuration)
        );
    }

    #[test]
    fn test_manual_end_wins() {
        let t0 = Instant::now();
        let mut det = detector(t0);

        det.on_frame(true, t0 + Duration::from_secs(1));
        assert!(det.end_manual());
        assert_eq!(det.end_reason(), Some(EndReason::Manual));

        // A timer tick arriving just after the manual end is a no-op
        assert_eq!(det.tick(t0 + Duration::from_secs(500)), None);
        assert!(!det.end_manual());
        assert_eq!(det.end_reason(), Some(EndReason::Manual));
    }

    #[test]
    fn test_frames_after_end_are_ignored() {
        let t0 = Instant::now();
        let mut det = detector(t0);
        assert!(det.end_manual());

        det.on_frame(true, t0 + Duration::from_secs(1));
        assert!(det.is_ended());
        assert_eq!(det.end_reason(), Some(EndReason::Manual));
    }
}
