//! Failure detection.
//!
//! Each endpoint owns one detector, fed every time a strictly newer state
//! for that endpoint is accepted. The detector turns heartbeat arrival
//! timing into a suspicion level; once the level crosses the configured
//! threshold the endpoint is convicted.
//!
//! The default model is phi-accrual over an exponential inter-arrival
//! distribution: suspicion grows linearly with the time since the last
//! heartbeat, scaled by the mean of recent inter-arrival intervals.

use crate::config::FailureDetectorConfig;
use std::collections::VecDeque;
use std::f64::consts::LOG10_E;

/// Suspicion model for a single peer.
///
/// Implementations never reject samples; ordering of declared times is
/// enforced upstream before `record` is called.
pub trait FailureDetector: Send + Sync {
    /// Ingest one heartbeat: the peer's declared logical time and the local
    /// arrival time (ms since epoch).
    fn record(&mut self, declared_time: i64, now_ms: u64);

    /// Whether the peer should be declared dead at `now_ms`.
    fn should_convict(&self, now_ms: u64) -> bool;
}

/// Builds one independent detector per endpoint.
pub trait FailureDetectorFactory: Send + Sync {
    fn create(&self) -> Box<dyn FailureDetector>;
}

/// Phi-accrual failure detector.
#[derive(Debug, Clone)]
pub struct PhiAccrualFailureDetector {
    threshold: f64,
    window_size: usize,
    min_interval: f64,
    max_interval: f64,
    bootstrap_interval: f64,
    /// Inter-arrival intervals in milliseconds, oldest first
    intervals: VecDeque<f64>,
    /// Sum of `intervals`, kept to avoid re-summing on every query
    sum: f64,
    last_arrival: Option<u64>,
    last_declared: Option<i64>,
}

impl PhiAccrualFailureDetector {
    pub fn new(config: &FailureDetectorConfig) -> Self {
        Self {
            threshold: config.convict_threshold,
            window_size: config.window_size.max(1),
            min_interval: config.min_interval_ms as f64,
            max_interval: config.max_interval_ms.max(config.min_interval_ms) as f64,
            bootstrap_interval: config.bootstrap_interval_ms.max(1) as f64,
            intervals: VecDeque::new(),
            sum: 0.0,
            last_arrival: None,
            last_declared: None,
        }
    }

    /// Current suspicion level. Zero until the first heartbeat arrives.
    pub fn phi(&self, now_ms: u64) -> f64 {
        let Some(last) = self.last_arrival else {
            return 0.0;
        };
        let elapsed = now_ms.saturating_sub(last) as f64;
        (elapsed / self.mean_interval()) * LOG10_E
    }

    /// Mean inter-arrival interval in milliseconds.
    pub fn mean_interval(&self) -> f64 {
        if self.intervals.is_empty() {
            self.bootstrap_interval
        } else {
            (self.sum / self.intervals.len() as f64).max(1.0)
        }
    }

    pub fn sample_count(&self) -> usize {
        self.intervals.len()
    }

    /// Declared time of the most recent heartbeat.
    pub fn last_declared(&self) -> Option<i64> {
        self.last_declared
    }

    fn push_interval(&mut self, interval: f64) {
        let clamped = interval.clamp(self.min_interval, self.max_interval);
        self.intervals.push_back(clamped);
        self.sum += clamped;
        while self.intervals.len() > self.window_size {
            if let Some(evicted) = self.intervals.pop_front() {
                self.sum -= evicted;
            }
        }
    }
}

impl FailureDetector for PhiAccrualFailureDetector {
    fn record(&mut self, declared_time: i64, now_ms: u64) {
        if let Some(last) = self.last_arrival {
            self.push_interval(now_ms.saturating_sub(last) as f64);
        }
        self.last_arrival = Some(now_ms);
        self.last_declared = Some(declared_time);
    }

    fn should_convict(&self, now_ms: u64) -> bool {
        self.phi(now_ms) > self.threshold
    }
}

/// Factory for [`PhiAccrualFailureDetector`].
#[derive(Debug, Clone, Default)]
pub struct PhiAccrualFactory {
    config: FailureDetectorConfig,
}

impl PhiAccrualFactory {
    pub fn new(config: FailureDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FailureDetectorConfig {
        &self.config
    }
}

impl FailureDetectorFactory for PhiAccrualFactory {
    fn create(&self) -> Box<dyn FailureDetector> {
        Box::new(PhiAccrualFailureDetector::new(&self.config))
    }
}
