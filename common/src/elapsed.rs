//! Whole-hour bookkeeping shared by the light and irrigation engines.

use serde::{Deserialize, Serialize};

pub const ONE_HOUR_MS: u64 = 3_600_000;

/// Hours credited since the last light transition and the last irrigation.
///
/// Both counters advance together from a single reference sample, so the two
/// subsystems never drift apart. At most one hour is credited per
/// [`tick`](ElapsedHours::tick); a loop stalled for several hours (e.g. a long
/// irrigation pulse) under-counts until it catches up one hour per call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElapsedHours {
    last_sample_ms: u64,
    hours_since_light_change: u32,
    hours_since_irrigation: u32,
}

impl ElapsedHours {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_sample_ms: now_ms,
            ..Self::default()
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> u32 {
        // Uptime counter wrapped or was reset: re-anchor without crediting.
        if now_ms < self.last_sample_ms {
            self.last_sample_ms = now_ms;
            return 0;
        }

        if now_ms - self.last_sample_ms >= ONE_HOUR_MS {
            self.hours_since_light_change = self.hours_since_light_change.saturating_add(1);
            self.hours_since_irrigation = self.hours_since_irrigation.saturating_add(1);
            self.last_sample_ms = now_ms;
            return 1;
        }

        0
    }

    pub fn last_sample_ms(&self) -> u64 {
        self.last_sample_ms
    }

    pub fn hours_since_light_change(&self) -> u32 {
        self.hours_since_light_change
    }

    pub fn hours_since_irrigation(&self) -> u32 {
        self.hours_since_irrigation
    }

    pub fn reset_light(&mut self) {
        self.hours_since_light_change = 0;
    }

    pub fn reset_irrigation(&mut self) {
        self.hours_since_irrigation = 0;
    }

    #[cfg(test)]
    pub(crate) fn with_hours(light: u32, irrigation: u32) -> Self {
        Self {
            last_sample_ms: 0,
            hours_since_light_change: light,
            hours_since_irrigation: irrigation,
        }
    }
}
