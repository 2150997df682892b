//! Presentation timing state
//!
//! Two concerns live here: the monotonic watermark that input timestamps
//! are clamped against, and the wall-clock anchor that presentation pacing
//! measures deadlines from. Both are per-run state, reset on stop and on
//! seek.

use std::time::{Duration, Instant};

/// Unset watermark marker
const UNSET: i64 = -1;

/// Per-run timing state, guarded by the session's control lock
#[derive(Debug, Default)]
pub(crate) struct TimingState {
    /// Wall clock at the first rendered frame of this run
    reference: Option<Instant>,

    /// Highest timestamp handed to the decoder so far; UNSET before the
    /// first access unit
    prev_pts_us: Option<i64>,
}

impl TimingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce non-decreasing input timestamps.
    ///
    /// A raw timestamp below the watermark is raised to equal it, which can
    /// produce duplicate consecutive timestamps. That is the contract:
    /// duplicates are acceptable, interpolation is not.
    pub fn clamp(&mut self, raw_pts_us: i64) -> i64 {
        let pts = match self.prev_pts_us {
            Some(prev) if raw_pts_us < prev => prev,
            _ => raw_pts_us,
        };
        self.prev_pts_us = Some(pts);
        pts
    }

    /// Presentation deadline for a frame.
    ///
    /// The first call of a run anchors the reference clock and returns
    /// None: the first frame renders immediately. Subsequent frames are due
    /// at reference + timestamp.
    pub fn deadline_for(&mut self, pts_us: i64) -> Option<Instant> {
        match self.reference {
            Some(reference) => {
                Some(reference + Duration::from_micros(pts_us.max(0) as u64))
            }
            None => {
                self.reference = Some(Instant::now());
                None
            }
        }
    }

    /// Clear the anchor and watermark so the next run or the next frame
    /// after a seek restarts cleanly
    pub fn reset(&mut self) {
        self.reference = None;
        self.prev_pts_us = None;
    }

    /// Watermark value for diagnostics; UNSET when no sample has been fed
    pub fn watermark(&self) -> i64 {
        self.prev_pts_us.unwrap_or(UNSET)
    }
}
