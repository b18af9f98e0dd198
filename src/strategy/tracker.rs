// SPDX-License-Identifier: GPL-3.0-only
//! Strategy performance tracker
//!
//! Keeps a bounded, oldest-first log of strategy attempts and derives per
//! strategy success counts and average duration from it. The ranking it
//! produces is advisory: it changes which strategy is tried first, never how
//! many are tried.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use super::{Strategy, StrategyClass};
use crate::monitor::DisplayId;

/// Outcome of one strategy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyExecutionResult {
    pub strategy: Strategy,
    pub display_id: DisplayId,
    pub success: bool,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

impl StrategyExecutionResult {
    pub fn succeeded(strategy: Strategy, display_id: &str, duration: Duration) -> Self {
        Self {
            strategy,
            display_id: display_id.to_string(),
            success: true,
            duration_ms: duration.as_millis() as u64,
            error_message: None,
        }
    }

    pub fn failed(
        strategy: Strategy,
        display_id: &str,
        duration: Duration,
        error: impl ToString,
    ) -> Self {
        Self {
            strategy,
            display_id: display_id.to_string(),
            success: false,
            duration_ms: duration.as_millis() as u64,
            error_message: Some(error.to_string()),
        }
    }
}

/// Aggregates over the retained history of one strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyStats {
    pub successes: u32,
    pub failures: u32,
    pub avg_duration_ms: f64,
}

impl StrategyStats {
    pub fn samples(&self) -> u32 {
        self.successes + self.failures
    }

    pub fn success_rate(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            n => f64::from(self.successes) / f64::from(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyTracker {
    history: VecDeque<StrategyExecutionResult>,
    cap: usize,
    min_samples: u32,
}

impl StrategyTracker {
    pub fn new(cap: usize, min_samples: u32) -> Self {
        Self {
            history: VecDeque::with_capacity(cap.min(1024)),
            cap: cap.max(1),
            min_samples,
        }
    }

    pub fn record(&mut self, result: StrategyExecutionResult) {
        if self.history.len() == self.cap {
            self.history.pop_front();
        }
        self.history.push_back(result);
    }

    /// Retained results, oldest first
    pub fn history(&self) -> Vec<StrategyExecutionResult> {
        self.history.iter().cloned().collect()
    }

    pub fn stats(&self, strategy: Strategy) -> StrategyStats {
        let mut stats = StrategyStats::default();
        for result in self.history.iter().filter(|r| r.strategy == strategy) {
            if result.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
            // Running mean
            let n = f64::from(stats.samples());
            stats.avg_duration_ms += (result.duration_ms as f64 - stats.avg_duration_ms) / n;
        }
        stats
    }

    /// Strategies of `class` in the order they should be tried
    ///
    /// Strategies with at least `min_samples` observations are re-sorted
    /// among the slots they occupy in the default order: higher success rate
    /// first, then lower average duration. Strategies below the floor keep
    /// their default slot, so a few unlucky attempts never demote them.
    pub fn recommend_order(&self, class: StrategyClass) -> Vec<Strategy> {
        let default = class.default_order();
        let mut order = default.to_vec();

        let mut slots = Vec::new();
        let mut ranked = Vec::new();
        for (slot, strategy) in default.iter().enumerate() {
            let stats = self.stats(*strategy);
            if stats.samples() >= self.min_samples.max(1) {
                slots.push(slot);
                ranked.push((*strategy, stats, slot));
            }
        }

        ranked.sort_by(|(_, a, a_slot), (_, b, b_slot)| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then(a.avg_duration_ms.total_cmp(&b.avg_duration_ms))
                .then(a_slot.cmp(b_slot))
        });

        for (slot, (strategy, _, _)) in slots.into_iter().zip(ranked) {
            order[slot] = strategy;
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_order_without_history() {
        let tracker = StrategyTracker::new(16, 3);
        assert_eq!(
            tracker.recommend_order(StrategyClass::Enable),
            StrategyClass::Enable.default_order()
        );
    }

    #[test]
    fn test_consistent_failures_demote_strategy() {
        let mut tracker = StrategyTracker::new(64, 3);
        for _ in 0..3 {
            tracker.record(StrategyExecutionResult::failed(
                Strategy::ActivatePath,
                "DISPLAY2",
                ms(40),
                "rejected",
            ));
            tracker.record(StrategyExecutionResult::succeeded(
                Strategy::ForceExtend,
                "DISPLAY2",
                ms(120),
            ));
        }
        let order = tracker.recommend_order(StrategyClass::Enable);
        assert_eq!(&order[..2], &[Strategy::ForceExtend, Strategy::ActivatePath]);
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_sample_floor_keeps_default_slot() {
        let mut tracker = StrategyTracker::new(64, 3);
        tracker.record(StrategyExecutionResult::failed(
            Strategy::ActivatePath,
            "DISPLAY2",
            ms(10),
            "rejected",
        ));
        for _ in 0..3 {
            tracker.record(StrategyExecutionResult::succeeded(
                Strategy::AutoDetectMode,
                "DISPLAY2",
                ms(300),
            ));
        }
        let order = tracker.recommend_order(StrategyClass::Enable);
        // Only AutoDetectMode is ranked, and it can only move among ranked slots
        assert_eq!(order, StrategyClass::Enable.default_order());
    }

    #[test]
    fn test_duration_breaks_ties() {
        let mut tracker = StrategyTracker::new(64, 2);
        for _ in 0..2 {
            tracker.record(StrategyExecutionResult::succeeded(
                Strategy::DeactivatePath,
                "DISPLAY2",
                ms(900),
            ));
            tracker.record(StrategyExecutionResult::succeeded(
                Strategy::DetachViaModeSet,
                "DISPLAY2",
                ms(100),
            ));
        }
        assert_eq!(
            tracker.recommend_order(StrategyClass::Disable),
            vec![Strategy::DetachViaModeSet, Strategy::DeactivatePath]
        );
        let stats = tracker.stats(Strategy::DeactivatePath);
        assert_eq!(stats.successes, 2);
        assert!((stats.avg_duration_ms - 900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = StrategyTracker::new(4, 1);
        for i in 0..6 {
            tracker.record(StrategyExecutionResult::succeeded(
                Strategy::ForceExtend,
                &format!("DISPLAY{i}"),
                ms(1),
            ));
        }
        let history = tracker.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].display_id, "DISPLAY2");
        assert_eq!(tracker.stats(Strategy::ForceExtend).samples(), 4);
    }
}
