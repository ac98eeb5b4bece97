//! # Audio Batching
//!
//! Buffers inbound audio frames per session and decides when the open
//! batch should be handed to a transcription job. A batch flushes when
//! either threshold is reached: enough frames accumulated, or enough
//! wall time elapsed since the batch was opened. Flushing swaps in a
//! fresh empty batch so the connection keeps streaming while the job
//! runs.
//!
//! The batcher is owned by exactly one connection actor and is not
//! shared; all timing comes in as `Instant` parameters so the flush
//! policy is deterministic under test.

use std::time::{Duration, Instant};

/// A closed batch of audio frames ready for transcription.
#[derive(Debug)]
pub struct FlushedBatch {
    /// Number of frames the batch accumulated
    pub frames: usize,
    /// Concatenated PCM samples across all frames, in arrival order
    pub samples: Vec<i16>,
    /// When the first frame of the batch arrived
    pub opened_at: Instant,
}

/// Per-session audio frame accumulator with a two-condition flush
/// policy (frame count or batch age).
pub struct AudioBatcher {
    max_frames: usize,
    max_duration: Duration,
    frames: usize,
    samples: Vec<i16>,
    opened_at: Option<Instant>,
}

impl AudioBatcher {
    pub fn new(max_frames: usize, max_duration: Duration) -> Self {
        Self {
            max_frames,
            max_duration,
            frames: 0,
            samples: Vec::new(),
            opened_at: None,
        }
    }

    /// Append one decoded frame. Returns the closed batch if this
    /// frame tripped a flush threshold, `None` otherwise.
    pub fn append(&mut self, frame: &[i16], now: Instant) -> Option<FlushedBatch> {
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.frames += 1;
        self.samples.extend_from_slice(frame);

        let age = now - self.opened_at.unwrap_or(now);
        if self.frames >= self.max_frames || age >= self.max_duration {
            self.take(now)
        } else {
            None
        }
    }

    /// Flush whatever is buffered regardless of thresholds. Used at
    /// end of turn and on disconnect so no audio is lost. Returns
    /// `None` when the batch is empty.
    pub fn flush_now(&mut self, now: Instant) -> Option<FlushedBatch> {
        if self.frames == 0 {
            return None;
        }
        self.take(now)
    }

    /// True if the open batch holds at least one frame.
    pub fn has_pending(&self) -> bool {
        self.frames > 0
    }

    /// True when a non-empty batch has aged past the duration
    /// threshold. Checked from the periodic tick so a batch still
    /// flushes when frames stop arriving.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if self.frames > 0 => now - opened >= self.max_duration,
            _ => false,
        }
    }

    fn take(&mut self, now: Instant) -> Option<FlushedBatch> {
        let batch = FlushedBatch {
            frames: self.frames,
            samples: std::mem::take(&mut self.samples),
            opened_at: self.opened_at.unwrap_or(now),
        };
        self.frames = 0;
        self.opened_at = None;
        Some(batch)
    }
}
