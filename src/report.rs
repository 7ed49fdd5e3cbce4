use crate::metrics::{MetricKind, ValueType};
use crate::stages::Stage;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything known about a finished run. This is what the summary hook
/// reads and what gets dumped to the JSON report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub options: ReportOptions,
    pub state: RunState,
    pub root_group: Group,
    pub metrics: BTreeMap<String, MetricSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub stages: Vec<Stage>,
    pub thresholds: BTreeMap<String, Vec<String>>, // metric -> expressions
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunState {
    pub test_run_duration_ms: f64,
    pub started_at: String, // RFC 3339
    pub interrupted: bool, // stopped by Ctrl+C
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub name: String,
    pub checks: Vec<CheckSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passes: 0,
            fails: 0,
        }
    }

    pub fn record(&mut self, passed: bool) {
        if passed {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub contains: ValueType,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, ThresholdOutcome>,
}

impl MetricSummary {
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub ok: bool,
}

impl Report {
    /// A metric that received samples. Metrics listed only because a
    /// threshold names them are skipped.
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name).filter(|m| !m.values.is_empty())
    }

    pub fn value(&self, metric: &str, key: &str) -> Option<f64> {
        self.metric(metric).and_then(|m| m.value(key))
    }

    pub fn duration_secs(&self) -> f64 {
        self.state.test_run_duration_ms / 1000.0
    }

    /// (metric, expression, ok) for every evaluated threshold
    pub fn threshold_results(&self) -> Vec<(&str, &str, bool)> {
        self.metrics
            .iter()
            .flat_map(|(name, metric)| {
                metric
                    .thresholds
                    .iter()
                    .map(move |(expr, outcome)| (name.as_str(), expr.as_str(), outcome.ok))
            })
            .collect()
    }

    pub fn thresholds_passed(&self) -> bool {
        self.threshold_results().iter().all(|(_, _, ok)| *ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_partial_report() {
        let report: Report = serde_json::from_value(json!({
            "metrics": {
                "success_rate": {
                    "type": "rate",
                    "values": { "rate": 0.75, "passes": 3.0, "fails": 1.0 },
                    "thresholds": { "rate>0.5": { "ok": true } }
                }
            },
            "state": { "testRunDurationMs": 1500.0 }
        }))
        .unwrap();

        assert_eq!(report.value("success_rate", "rate"), Some(0.75));
        assert_eq!(report.duration_secs(), 1.5);
        assert!(report.metric("analysis_duration").is_none());
        assert!(report.thresholds_passed());
    }

    #[test]
    fn test_metric_without_samples_is_hidden() {
        let report: Report = serde_json::from_value(json!({
            "metrics": {
                "analysis_duration": {
                    "type": "trend",
                    "contains": "time",
                    "values": {},
                    "thresholds": { "avg<1000": { "ok": false } }
                }
            }
        }))
        .unwrap();

        assert!(report.metric("analysis_duration").is_none());
        assert!(!report.thresholds_passed());
        assert_eq!(
            report.threshold_results(),
            vec![("analysis_duration", "avg<1000", false)]
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut report = Report::default();
        report.state.test_run_duration_ms = 2000.0;
        report.metrics.insert(
            "iterations".to_string(),
            MetricSummary {
                kind: MetricKind::Counter,
                contains: ValueType::Default,
                values: BTreeMap::from([("count".to_string(), 4.0)]),
                thresholds: BTreeMap::new(),
            },
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["state"]["testRunDurationMs"], json!(2000.0));
        assert_eq!(value["metrics"]["iterations"]["type"], json!("counter"));
        assert_eq!(value["metrics"]["iterations"]["contains"], json!("default"));
        assert_eq!(value["metrics"]["iterations"]["values"]["count"], json!(4.0));
        assert!(value["metrics"]["iterations"].get("thresholds").is_none());
    }
}
