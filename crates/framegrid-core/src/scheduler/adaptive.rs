//! Frame-time tracking and the adaptive throughput multiplier.
//!
//! Every tick records one frame time. On a slower interval the controller
//! compares the recent half of the history against the older half and nudges
//! the multiplier; crossing a critical memory or frame-time threshold pins
//! it to the emergency value until both drop back under their warning levels.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;

/// Direction recent frame times are heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceTrend {
    Improving,
    Stable,
    Degrading,
}

/// Relative change between history halves that counts as a trend.
const TREND_THRESHOLD: f64 = 0.05;
const MULTIPLIER_STEP_UP: f64 = 1.10;
const MULTIPLIER_STEP_DOWN: f64 = 0.90;

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    history: VecDeque<f64>,
    capacity: usize,
    peak_frame_ms: f64,
    multiplier: f64,
    trend: PerformanceTrend,
    emergency: bool,
    memory_mb: f64,
    last_adjust: f64,
}

impl AdaptiveController {
    pub fn new(config: &SchedulerConfig, now: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(config.frame_history),
            capacity: config.frame_history.max(2),
            peak_frame_ms: 0.0,
            multiplier: 1.0,
            trend: PerformanceTrend::Stable,
            emergency: false,
            memory_mb: 0.0,
            last_adjust: now,
        }
    }

    pub fn record_frame(&mut self, frame_ms: f64) {
        if !frame_ms.is_finite() || frame_ms < 0.0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(frame_ms);
        self.peak_frame_ms = self.peak_frame_ms.max(frame_ms);
    }

    pub fn report_memory(&mut self, memory_mb: f64) {
        if memory_mb.is_finite() && memory_mb >= 0.0 {
            self.memory_mb = memory_mb;
        }
    }

    pub fn average_frame_ms(&self) -> f64 {
        average(self.history.iter().copied())
    }

    pub fn peak_frame_ms(&self) -> f64 {
        self.peak_frame_ms
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn trend(&self) -> PerformanceTrend {
        self.trend
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_mb
    }

    /// Per-tick multiplier from the current average frame time. Forced low
    /// while memory is above the critical threshold.
    pub fn performance_multiplier(&self, config: &SchedulerConfig) -> f64 {
        if self.memory_mb >= config.memory_critical_mb {
            return config.emergency_multiplier;
        }
        if self.history.is_empty() {
            return 1.0;
        }
        let avg = self.average_frame_ms();
        if avg > config.target_frame_ms * 1.1 {
            0.75
        } else if avg < config.target_frame_ms * 0.75 {
            1.25
        } else {
            1.0
        }
    }

    /// Combined factor applied to the base task quota. In emergency mode the
    /// pinned multiplier stands alone.
    pub fn quota_multiplier(&self, config: &SchedulerConfig) -> f64 {
        if self.emergency {
            self.multiplier
        } else {
            self.multiplier * self.performance_multiplier(config)
        }
    }

    /// Run the slow adaptive pass if its interval has elapsed.
    /// Returns `true` when an adjustment pass ran.
    pub fn maybe_adjust(&mut self, now: f64, config: &SchedulerConfig) -> bool {
        if now - self.last_adjust < config.adaptive_interval {
            return false;
        }
        self.last_adjust = now;

        self.trend = self.classify_trend();
        match self.trend {
            PerformanceTrend::Improving => {
                self.multiplier = (self.multiplier * MULTIPLIER_STEP_UP).min(config.max_multiplier)
            }
            PerformanceTrend::Degrading => {
                self.multiplier =
                    (self.multiplier * MULTIPLIER_STEP_DOWN).max(config.min_multiplier)
            }
            PerformanceTrend::Stable => {}
        }

        let avg = self.average_frame_ms();
        if self.memory_mb >= config.memory_critical_mb || avg >= config.frame_critical_ms {
            if !self.emergency {
                log::warn!(
                    "scheduler entering emergency mode (memory {:.0} MB, avg frame {:.2} ms)",
                    self.memory_mb,
                    avg
                );
            }
            self.emergency = true;
        } else if self.emergency
            && self.memory_mb < config.memory_warning_mb
            && avg < config.frame_warning_ms
        {
            log::info!("scheduler leaving emergency mode");
            self.emergency = false;
            self.multiplier = 1.0_f64.clamp(config.min_multiplier, config.max_multiplier);
        }
        if self.emergency {
            self.multiplier = config.emergency_multiplier;
        }
        true
    }

    fn classify_trend(&self) -> PerformanceTrend {
        if self.history.len() < 4 {
            return PerformanceTrend::Stable;
        }
        let half = self.history.len() / 2;
        let older = average(self.history.iter().take(half).copied());
        let recent = average(self.history.iter().skip(half).copied());
        if older <= 0.0 {
            return PerformanceTrend::Stable;
        }
        if recent < older * (1.0 - TREND_THRESHOLD) {
            PerformanceTrend::Improving
        } else if recent > older * (1.0 + TREND_THRESHOLD) {
            PerformanceTrend::Degrading
        } else {
            PerformanceTrend::Stable
        }
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
