//! Metric registry shared by every VU
//!
//! Four metric kinds, aggregated the way k6 aggregates them:
//! - counters keep a running sum (`count`, `rate` per second)
//! - gauges keep the last, smallest and largest value
//! - rates keep how many samples were non-zero (`rate`, `passes`, `fails`)
//! - trends keep every sample for percentiles

use crate::report::{CheckSummary, MetricSummary, ThresholdOutcome};
use crate::thresholds::{Aggregation, Threshold};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
pub const CHECKS: &str = "checks";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const SUCCESS_RATE: &str = "success_rate";
pub const ANALYSIS_DURATION: &str = "analysis_duration";

const TREND_PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

/// What a metric's numbers measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Default,
    Time, // milliseconds
    Data, // bytes
}

const KNOWN_METRICS: &[(&str, MetricKind, ValueType)] = &[
    (HTTP_REQS, MetricKind::Counter, ValueType::Default),
    (HTTP_REQ_DURATION, MetricKind::Trend, ValueType::Time),
    (HTTP_REQ_FAILED, MetricKind::Rate, ValueType::Default),
    (ITERATIONS, MetricKind::Counter, ValueType::Default),
    (ITERATION_DURATION, MetricKind::Trend, ValueType::Time),
    (VUS, MetricKind::Gauge, ValueType::Default),
    (VUS_MAX, MetricKind::Gauge, ValueType::Default),
    (CHECKS, MetricKind::Rate, ValueType::Default),
    (DATA_RECEIVED, MetricKind::Counter, ValueType::Data),
    (DATA_SENT, MetricKind::Counter, ValueType::Data),
    (SUCCESS_RATE, MetricKind::Rate, ValueType::Default),
    (ANALYSIS_DURATION, MetricKind::Trend, ValueType::Time),
];

pub fn kind_of(name: &str) -> Option<MetricKind> {
    KNOWN_METRICS
        .iter()
        .find(|(known, _, _)| *known == name)
        .map(|(_, kind, _)| *kind)
}

/// One finished HTTP call
#[derive(Debug, Clone, Copy)]
pub struct HttpSample {
    pub duration: Duration,
    pub status: Option<u16>, // None when no response arrived
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

impl HttpSample {
    /// No response, or a status outside 200..=399
    pub fn failed(&self) -> bool {
        !matches!(self.status, Some(200..=399))
    }
}

#[derive(Debug, Clone)]
enum Sink {
    Counter { sum: f64, samples: u64 },
    Gauge { value: f64, min: f64, max: f64, seen: bool },
    Rate { passes: u64, total: u64 },
    Trend { samples: Vec<f64> },
}

impl Sink {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Sink::Counter { sum: 0.0, samples: 0 },
            MetricKind::Gauge => Sink::Gauge {
                value: 0.0,
                min: 0.0,
                max: 0.0,
                seen: false,
            },
            MetricKind::Rate => Sink::Rate { passes: 0, total: 0 },
            MetricKind::Trend => Sink::Trend { samples: Vec::new() },
        }
    }

    fn add(&mut self, sample: f64) {
        match self {
            Sink::Counter { sum, samples } => {
                *sum += sample;
                *samples += 1;
            }
            Sink::Gauge { value, min, max, seen } => {
                *value = sample;
                if *seen {
                    *min = min.min(sample);
                    *max = max.max(sample);
                } else {
                    *min = sample;
                    *max = sample;
                    *seen = true;
                }
            }
            Sink::Rate { passes, total } => {
                *total += 1;
                if sample != 0.0 {
                    *passes += 1;
                }
            }
            Sink::Trend { samples } => samples.push(sample),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Sink::Counter { samples, .. } => *samples == 0,
            Sink::Gauge { seen, .. } => !*seen,
            Sink::Rate { total, .. } => *total == 0,
            Sink::Trend { samples } => samples.is_empty(),
        }
    }

    fn samples(&self) -> u64 {
        match self {
            Sink::Counter { samples, .. } => *samples,
            Sink::Gauge { seen, .. } => u64::from(*seen),
            Sink::Rate { total, .. } => *total,
            Sink::Trend { samples } => samples.len() as u64,
        }
    }

    fn aggregate(&self, aggregation: Aggregation, elapsed_secs: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        match (self, aggregation) {
            (Sink::Counter { sum, .. }, Aggregation::Count) => Some(*sum),
            (Sink::Counter { sum, .. }, Aggregation::Rate) => Some(per_second(*sum, elapsed_secs)),
            (Sink::Gauge { value, .. }, Aggregation::Value) => Some(*value),
            (Sink::Gauge { min, .. }, Aggregation::Min) => Some(*min),
            (Sink::Gauge { max, .. }, Aggregation::Max) => Some(*max),
            (Sink::Rate { passes, total }, Aggregation::Rate) => {
                Some(*passes as f64 / *total as f64)
            }
            (Sink::Trend { samples }, aggregation) => {
                let mut sorted = samples.clone();
                sorted.sort_by(f64::total_cmp);
                trend_aggregate(&sorted, aggregation)
            }
            _ => None,
        }
    }

    fn values(&self, elapsed_secs: f64) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        if self.is_empty() {
            return values;
        }
        match self {
            Sink::Counter { sum, .. } => {
                values.insert("count".to_string(), *sum);
                values.insert("rate".to_string(), per_second(*sum, elapsed_secs));
            }
            Sink::Gauge { value, min, max, .. } => {
                values.insert("value".to_string(), *value);
                values.insert("min".to_string(), *min);
                values.insert("max".to_string(), *max);
            }
            Sink::Rate { passes, total } => {
                values.insert("rate".to_string(), *passes as f64 / *total as f64);
                values.insert("passes".to_string(), *passes as f64);
                values.insert("fails".to_string(), (*total - *passes) as f64);
            }
            Sink::Trend { samples } => {
                let mut sorted = samples.clone();
                sorted.sort_by(f64::total_cmp);
                let mut aggregations = vec![
                    Aggregation::Avg,
                    Aggregation::Min,
                    Aggregation::Med,
                    Aggregation::Max,
                ];
                aggregations.extend(TREND_PERCENTILES.iter().map(|p| Aggregation::Percentile(*p)));
                for aggregation in aggregations {
                    if let Some(v) = trend_aggregate(&sorted, aggregation) {
                        values.insert(aggregation.to_string(), v);
                    }
                }
            }
        }
        values
    }
}

fn per_second(sum: f64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        sum / elapsed_secs
    } else {
        0.0
    }
}

fn trend_aggregate(sorted: &[f64], aggregation: Aggregation) -> Option<f64> {
    let first = *sorted.first()?;
    let last = *sorted.last()?;
    match aggregation {
        Aggregation::Avg => Some(sorted.iter().sum::<f64>() / sorted.len() as f64),
        Aggregation::Min => Some(first),
        Aggregation::Max => Some(last),
        Aggregation::Med => Some(percentile(sorted, 50.0)),
        Aggregation::Percentile(p) => Some(percentile(sorted, p)),
        _ => None,
    }
}

/// Linear interpolation between the closest ranks. `sorted` must be
/// ascending and non-empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

#[derive(Debug)]
struct Entry {
    kind: MetricKind,
    contains: ValueType,
    sink: Sink,
}

#[derive(Debug, Default)]
struct Registry {
    entries: BTreeMap<&'static str, Entry>,
    checks: Vec<CheckSummary>, // in order of first use
}

/// Thread-safe metric store
#[derive(Debug)]
pub struct Metrics {
    registry: Mutex<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let entries = KNOWN_METRICS
            .iter()
            .map(|(name, kind, contains)| {
                (
                    *name,
                    Entry {
                        kind: *kind,
                        contains: *contains,
                        sink: Sink::new(*kind),
                    },
                )
            })
            .collect();
        Self {
            registry: Mutex::new(Registry {
                entries,
                checks: Vec::new(),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sample to a counter, gauge or trend
    pub fn add(&self, name: &str, value: f64) {
        match self.registry().entries.get_mut(name) {
            Some(entry) => entry.sink.add(value),
            None => tracing::warn!("Sample for unknown metric '{}' dropped", name),
        }
    }

    pub fn add_bool(&self, name: &str, value: bool) {
        self.add(name, if value { 1.0 } else { 0.0 });
    }

    pub fn add_duration(&self, name: &str, value: Duration) {
        self.add(name, value.as_secs_f64() * 1000.0);
    }

    /// Record a named check; returns `passed` so calls can be chained
    pub fn check(&self, name: &str, passed: bool) -> bool {
        let mut registry = self.registry();
        match registry.checks.iter_mut().find(|c| c.name == name) {
            Some(check) => check.record(passed),
            None => {
                let mut check = CheckSummary::new(name);
                check.record(passed);
                registry.checks.push(check);
            }
        }
        if let Some(entry) = registry.entries.get_mut(CHECKS) {
            entry.sink.add(if passed { 1.0 } else { 0.0 });
        }
        passed
    }

    pub fn record_http(&self, sample: &HttpSample) {
        let mut registry = self.registry();
        let mut add = |name: &str, value: f64| {
            if let Some(entry) = registry.entries.get_mut(name) {
                entry.sink.add(value);
            }
        };
        add(HTTP_REQS, 1.0);
        add(HTTP_REQ_DURATION, sample.duration.as_secs_f64() * 1000.0);
        add(HTTP_REQ_FAILED, if sample.failed() { 1.0 } else { 0.0 });
        add(DATA_SENT, sample.bytes_sent as f64);
        add(DATA_RECEIVED, sample.bytes_received as f64);
    }

    /// Number of samples a metric has received (a gauge counts once)
    pub fn samples(&self, name: &str) -> u64 {
        self.registry()
            .entries
            .get(name)
            .map_or(0, |entry| entry.sink.samples())
    }

    /// Summaries of every metric that received samples or carries a
    /// threshold, with the thresholds evaluated, plus per-check counts
    pub fn snapshot(
        &self,
        thresholds: &[Threshold],
        elapsed: Duration,
    ) -> (BTreeMap<String, MetricSummary>, Vec<CheckSummary>) {
        let registry = self.registry();
        let elapsed_secs = elapsed.as_secs_f64();
        let mut metrics = BTreeMap::new();

        for (name, entry) in &registry.entries {
            let own: Vec<&Threshold> = thresholds.iter().filter(|t| t.metric == *name).collect();
            if entry.sink.is_empty() && own.is_empty() {
                continue;
            }
            let outcomes = own
                .iter()
                .map(|t| {
                    let observed = entry.sink.aggregate(t.expr.aggregation, elapsed_secs);
                    (t.expr.to_string(), ThresholdOutcome { ok: t.expr.passes(observed) })
                })
                .collect();
            metrics.insert(
                name.to_string(),
                MetricSummary {
                    kind: entry.kind,
                    contains: entry.contains,
                    values: entry.sink.values(elapsed_secs),
                    thresholds: outcomes,
                },
            );
        }
        (metrics, registry.checks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert!((percentile(&sorted, 50.0) - 50.5).abs() < 1e-9);
        assert!((percentile(&sorted, 95.0) - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 100.0);
        assert_eq!(percentile(&[42.0], 99.0), 42.0);
    }

    #[test]
    fn test_trend_values() {
        let metrics = Metrics::new();
        for ms in [100.0, 200.0, 300.0, 400.0] {
            metrics.add(ANALYSIS_DURATION, ms);
        }
        let (summaries, _) = metrics.snapshot(&[], secs(10));
        let values = &summaries[ANALYSIS_DURATION].values;
        assert_eq!(values["avg"], 250.0);
        assert_eq!(values["min"], 100.0);
        assert_eq!(values["max"], 400.0);
        assert_eq!(values["med"], 250.0);
        assert!(values.contains_key("p(95)"));
        assert!(values.contains_key("p(99)"));
    }

    #[test]
    fn test_rate_and_counter_values() {
        let metrics = Metrics::new();
        metrics.add_bool(SUCCESS_RATE, true);
        metrics.add_bool(SUCCESS_RATE, true);
        metrics.add_bool(SUCCESS_RATE, true);
        metrics.add_bool(SUCCESS_RATE, false);
        metrics.add(ITERATIONS, 1.0);
        metrics.add(ITERATIONS, 1.0);

        let (summaries, _) = metrics.snapshot(&[], secs(4));
        let rate = &summaries[SUCCESS_RATE].values;
        assert_eq!(rate["rate"], 0.75);
        assert_eq!(rate["passes"], 3.0);
        assert_eq!(rate["fails"], 1.0);

        let iterations = &summaries[ITERATIONS].values;
        assert_eq!(iterations["count"], 2.0);
        assert_eq!(iterations["rate"], 0.5);
    }

    #[test]
    fn test_gauge_tracks_extremes() {
        let metrics = Metrics::new();
        for v in [3.0, 10.0, 1.0, 5.0] {
            metrics.add(VUS, v);
        }
        let (summaries, _) = metrics.snapshot(&[], secs(1));
        let values = &summaries[VUS].values;
        assert_eq!(values["value"], 5.0);
        assert_eq!(values["min"], 1.0);
        assert_eq!(values["max"], 10.0);
    }

    #[test]
    fn test_untouched_metrics_are_omitted() {
        let metrics = Metrics::new();
        metrics.add(HTTP_REQS, 1.0);
        let (summaries, checks) = metrics.snapshot(&[], secs(1));
        assert!(summaries.contains_key(HTTP_REQS));
        assert!(!summaries.contains_key(ANALYSIS_DURATION));
        assert!(!summaries.contains_key(SUCCESS_RATE));
        assert!(checks.is_empty());
    }

    #[test]
    fn test_thresholds_evaluated() {
        let metrics = Metrics::new();
        metrics.add_bool(SUCCESS_RATE, true);
        metrics.add_bool(SUCCESS_RATE, false);
        metrics.add(HTTP_REQ_DURATION, 500.0);

        let thresholds: Vec<Threshold> = [
            "http_req_duration=p(95)<120000",
            "success_rate=rate>0.5",
            "analysis_duration=avg<1000",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let (summaries, _) = metrics.snapshot(&thresholds, secs(1));
        assert!(summaries[HTTP_REQ_DURATION].thresholds["p(95)<120000"].ok);
        assert!(!summaries[SUCCESS_RATE].thresholds["rate>0.5"].ok);
        // no samples, still reported so the failure is visible
        assert!(!summaries[ANALYSIS_DURATION].thresholds["avg<1000"].ok);
        assert!(summaries[ANALYSIS_DURATION].values.is_empty());
    }

    #[test]
    fn test_checks_counted_per_name() {
        let metrics = Metrics::new();
        assert!(metrics.check("homepage loads", true));
        assert!(!metrics.check("homepage loads", false));
        metrics.check("has results", true);

        let (summaries, checks) = metrics.snapshot(&[], secs(1));
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].name, "homepage loads");
        assert_eq!((checks[0].passes, checks[0].fails), (1, 1));
        assert_eq!((checks[1].passes, checks[1].fails), (1, 0));
        assert!((summaries[CHECKS].values["rate"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_http_sample_failure() {
        let sample = |status| HttpSample {
            duration: Duration::from_millis(10),
            status,
            bytes_sent: 0,
            bytes_received: 0,
        };
        assert!(!sample(Some(200)).failed());
        assert!(!sample(Some(302)).failed());
        assert!(sample(Some(404)).failed());
        assert!(sample(Some(503)).failed());
        assert!(sample(None).failed());
    }

    #[test]
    fn test_record_http() {
        let metrics = Metrics::new();
        metrics.record_http(&HttpSample {
            duration: Duration::from_millis(250),
            status: Some(500),
            bytes_sent: 10,
            bytes_received: 2048,
        });
        let (summaries, _) = metrics.snapshot(&[], secs(1));
        assert_eq!(summaries[HTTP_REQS].values["count"], 1.0);
        assert_eq!(summaries[HTTP_REQ_DURATION].values["avg"], 250.0);
        assert_eq!(summaries[HTTP_REQ_FAILED].values["passes"], 1.0);
        assert_eq!(summaries[DATA_RECEIVED].values["count"], 2048.0);
        assert_eq!(summaries[DATA_SENT].values["count"], 10.0);
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(kind_of(SUCCESS_RATE), Some(MetricKind::Rate));
        assert_eq!(kind_of(ANALYSIS_DURATION), Some(MetricKind::Trend));
        assert_eq!(kind_of("nope"), None);
    }
}
