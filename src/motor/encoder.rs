// Encoder counts <-> wheel angular velocity
//
// Both directions use the same counts-per-revolution so that a rate
// command and the velocity read back from the encoders agree.

use std::f64::consts::TAU;
use std::num::NonZeroU32;
use std::time::Instant;

/// Radians of wheel rotation per encoder count
pub fn rad_per_count(counts_per_rev: NonZeroU32) -> f64 {
    TAU / counts_per_rev.get() as f64
}

/// Encoder counts per radian, the inverse of [`rad_per_count`]
pub fn counts_per_rad(counts_per_rev: NonZeroU32) -> f64 {
    counts_per_rev.get() as f64 / TAU
}

/// Convert a wheel rate in rad/s to the firmware's counts-per-loop setpoint
pub fn rad_s_to_counts(rad_s: f64, counts_per_rev: NonZeroU32) -> i32 {
    let counts = (rad_s * counts_per_rad(counts_per_rev)).round();

    // `as` saturates, NaN becomes 0
    counts as i32
}

/// Counter values seen at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSample {
    pub left_count: i64,
    pub right_count: i64,
    pub timestamp: Instant,
}

impl EncoderSample {
    pub fn zero(timestamp: Instant) -> Self {
        Self {
            left_count: 0,
            right_count: 0,
            timestamp,
        }
    }
}

/// Wheel angular velocities derived from two samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityEstimate {
    pub left_rad_s: f64,
    pub right_rad_s: f64,
}

/// Keeps the previous sample and turns each new reading into a velocity
#[derive(Debug, Clone)]
pub struct EncoderTracker {
    rad_per_count: f64,
    previous: EncoderSample,
}

impl EncoderTracker {
    /// Start from a zero sample taken at `now`
    pub fn new(counts_per_rev: NonZeroU32, now: Instant) -> Self {
        Self::from_sample(counts_per_rev, EncoderSample::zero(now))
    }

    pub fn from_sample(counts_per_rev: NonZeroU32, previous: EncoderSample) -> Self {
        Self {
            rad_per_count: rad_per_count(counts_per_rev),
            previous,
        }
    }

    pub fn previous(&self) -> &EncoderSample {
        &self.previous
    }

    /// Fold in a new reading.
    ///
    /// Returns `None` and leaves the stored sample alone when no time has
    /// elapsed since the previous one.
    pub fn update(&mut self, counts: (i64, i64), now: Instant) -> Option<VelocityEstimate> {
        // `checked_duration_since` is None for an instant before the previous one
        let elapsed = now.checked_duration_since(self.previous.timestamp)?;
        let dt = elapsed.as_secs_f64();
        if dt <= 0.0 {
            return None;
        }

        let (left, right) = counts;
        // Counters may wrap in firmware; deltas are taken at native width
        let left_delta = left.wrapping_sub(self.previous.left_count);
        let right_delta = right.wrapping_sub(self.previous.right_count);

        self.previous = EncoderSample {
            left_count: left,
            right_count: right,
            timestamp: now,
        };

        Some(VelocityEstimate {
            left_rad_s: left_delta as f64 * self.rad_per_count / dt,
            right_rad_s: right_delta as f64 * self.rad_per_count / dt,
        })
    }
}
