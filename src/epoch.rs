// Copyright 2025 Stake DAO
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Weekly period boundary calculation.
//!
//! Bounties, snapshots and Merkle records are all bucketed by a fixed weekly
//! epoch aligned to the Unix timeline: `floor(timestamp / WEEK) * WEEK`. This
//! matches the rounding used by the gauge controller and the bounty markets,
//! so every collaborator agrees on where a period starts without coordination.

/// Period duration in seconds (1 week)
pub const WEEK: u64 = 7 * 24 * 60 * 60; // 604800 seconds

/// Boundaries of a single distribution period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodBoundary {
    pub start: u64,
    pub end: u64,
}

impl PeriodBoundary {
    /// Period containing the given timestamp.
    pub fn containing(timestamp: u64) -> Self {
        let start = (timestamp / WEEK) * WEEK;
        Self { start, end: start + WEEK }
    }

    /// Period `periods_back` full weeks before the one containing `timestamp`.
    pub fn periods_back(timestamp: u64, periods_back: u64) -> Self {
        let current = Self::containing(timestamp);
        let start = current.start - periods_back * WEEK;
        Self { start, end: start + WEEK }
    }

    /// The immediately preceding period.
    pub fn previous(&self) -> Self {
        Self { start: self.start - WEEK, end: self.start }
    }

    /// Whether the timestamp falls inside this period (start inclusive,
    /// end exclusive).
    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containing_aligns_to_week() {
        let period = PeriodBoundary::containing(WEEK * 100 + 12345);
        assert_eq!(period.start, WEEK * 100);
        assert_eq!(period.end, WEEK * 101);
    }

    #[test]
    fn test_exact_boundary_starts_new_period() {
        let period = PeriodBoundary::containing(WEEK * 7);
        assert_eq!(period.start, WEEK * 7);
        assert!(period.contains(WEEK * 7));
        assert!(!period.contains(WEEK * 8));
    }

    #[test]
    fn test_periods_back() {
        let now = WEEK * 50 + 999;
        let period = PeriodBoundary::periods_back(now, 2);
        assert_eq!(period.start, WEEK * 48);
        assert_eq!(period.end, WEEK * 49);

        // Zero periods back is the current period
        assert_eq!(PeriodBoundary::periods_back(now, 0), PeriodBoundary::containing(now));
    }

    #[test]
    fn test_previous() {
        let period = PeriodBoundary::containing(WEEK * 10);
        let prev = period.previous();
        assert_eq!(prev.start, WEEK * 9);
        assert_eq!(prev.end, WEEK * 10);
    }

    #[test]
    fn test_week_is_seven_days() {
        assert_eq!(WEEK, 604800);
    }
}
