//! End-of-test summary: console report with verdicts, a k6-style text
//! summary, a standalone HTML page and the raw JSON dump.
//!
//! Nothing here influences pass/fail, which is decided by the thresholds
//! alone.

use crate::config::Config;
use crate::errors::{LoadTestError, Result};
use crate::lifecycle::rule;
use crate::metrics::{
    MetricKind, ValueType, ANALYSIS_DURATION, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    ITERATIONS, SUCCESS_RATE, VUS_MAX,
};
use crate::report::{MetricSummary, Report};

use std::fmt::{self, Write};
use std::path::PathBuf;

const EXCELLENT_SUCCESS_PCT: f64 = 70.0;
const ACCEPTABLE_SUCCESS_PCT: f64 = 50.0;
const FAST_AVG_SECS: f64 = 30.0;
const SLOW_AVG_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessVerdict {
    Excellent,
    Acceptable,
    Poor,
}

impl SuccessVerdict {
    /// Compares the percentage as printed, i.e. rounded to two decimals
    pub fn from_rate(rate: f64) -> Self {
        let pct = round2(rate * 100.0);
        if pct >= EXCELLENT_SUCCESS_PCT {
            SuccessVerdict::Excellent
        } else if pct >= ACCEPTABLE_SUCCESS_PCT {
            SuccessVerdict::Acceptable
        } else {
            SuccessVerdict::Poor
        }
    }
}

impl fmt::Display for SuccessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuccessVerdict::Excellent => "EXCELLENT! System handled heavy load well!",
            SuccessVerdict::Acceptable => "ACCEPTABLE. System struggled but survived.",
            SuccessVerdict::Poor => "POOR. System was overwhelmed by the load.",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyVerdict {
    Fast,
    Slowed,
    VerySlow,
}

impl LatencyVerdict {
    pub fn from_avg_secs(avg_secs: f64) -> Self {
        if avg_secs < FAST_AVG_SECS {
            LatencyVerdict::Fast
        } else if avg_secs < SLOW_AVG_SECS {
            LatencyVerdict::Slowed
        } else {
            LatencyVerdict::VerySlow
        }
    }
}

impl fmt::Display for LatencyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LatencyVerdict::Fast => "⚡ Still fast under heavy load!",
            LatencyVerdict::Slowed => "🐢 Slowed down under pressure (expected).",
            LatencyVerdict::VerySlow => "🐌 Very slow - system was heavily loaded.",
        })
    }
}

/// Everything the summary hook produces
#[derive(Debug, Clone)]
pub struct SummaryOutput {
    pub console: String,
    pub text_summary: String,
    pub files: Vec<(PathBuf, String)>,
}

impl SummaryOutput {
    pub fn write_files(&self) -> Result<()> {
        for (path, contents) in &self.files {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| LoadTestError::Artifact {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(path, contents).map_err(|source| LoadTestError::Artifact {
                path: path.clone(),
                source,
            })?;
            tracing::info!("Wrote {}", path.display());
        }
        Ok(())
    }
}

pub fn handle_summary(report: &Report, config: &Config) -> Result<SummaryOutput> {
    let mut files = Vec::new();
    if let Some(path) = &config.html_report {
        files.push((path.clone(), html_report(report, &config.title)));
    }
    if let Some(path) = &config.json_report {
        files.push((path.clone(), json_report(report)?));
    }
    Ok(SummaryOutput {
        console: console_report(report, &config.namespace),
        text_summary: text_summary(report, " "),
        files,
    })
}

/// The narrated summary. Each section is printed only when its metric
/// has data.
pub fn console_report(report: &Report, namespace: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "AGGRESSIVE LOAD TEST SUMMARY");
    let _ = writeln!(out, "{}\n", rule());

    let total_requests = report.value(HTTP_REQS, "count");
    if let Some(total) = total_requests {
        let _ = writeln!(out, "Total HTTP Requests: {}", total);
        let iterations = report.value(ITERATIONS, "count").unwrap_or(0.0);
        let _ = writeln!(out, "Complete Analyses: {}", iterations);
    }

    if report.metric(HTTP_REQ_FAILED).is_some() {
        let failed = report.value(HTTP_REQ_FAILED, "passes").unwrap_or(0.0);
        let total = total_requests.unwrap_or(0.0);
        let failure_pct = if total > 0.0 { failed / total * 100.0 } else { 0.0 };
        let _ = writeln!(out, "Failed Requests: {} ({:.2}%)", failed, failure_pct);
    }

    if let Some(rate) = report.value(SUCCESS_RATE, "rate") {
        let _ = writeln!(out, "\nAnalysis Success Rate: {:.2}%", rate * 100.0);
        let _ = writeln!(out, "{}", SuccessVerdict::from_rate(rate));
    }

    if let Some(analysis) = report.metric(ANALYSIS_DURATION) {
        let secs = |key: &str| analysis.value(key).unwrap_or(0.0) / 1000.0;
        let _ = writeln!(out, "\n⏱ Analysis Performance Under Load:");
        let _ = writeln!(out, "   Average:  {:.2}s", secs("avg"));
        let _ = writeln!(out, "   Minimum:  {:.2}s", secs("min"));
        let _ = writeln!(out, "   Maximum:  {:.2}s", secs("max"));
        let _ = writeln!(out, "   P95:      {:.2}s", secs("p(95)"));
        let _ = writeln!(out, "   P99:      {:.2}s", secs("p(99)"));
        let _ = writeln!(out, "   {}", LatencyVerdict::from_avg_secs(secs("avg")));
    }

    if let Some(http) = report.metric(HTTP_REQ_DURATION) {
        let secs = |key: &str| http.value(key).unwrap_or(0.0) / 1000.0;
        let _ = writeln!(out, "\nHTTP Performance:");
        let _ = writeln!(out, "   Avg Response: {:.2}s", secs("avg"));
        let _ = writeln!(out, "   P95 Response: {:.2}s", secs("p(95)"));
        let _ = writeln!(out, "   P99 Response: {:.2}s", secs("p(99)"));
    }

    if let Some(peak) = report.value(VUS_MAX, "value") {
        let _ = writeln!(out, "\n👥 Peak Concurrent Users: {}", peak);
    }

    if let Some(iterations) = report.value(ITERATIONS, "count") {
        let duration = report.duration_secs();
        let throughput = if duration > 0.0 { iterations / duration } else { 0.0 };
        let _ = writeln!(out, "\nThroughput: {:.2} analyses/second", throughput);
    }

    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "POST-TEST ACTIONS:");
    let _ = writeln!(out, "   1. Check if HPA scaled: kubectl get hpa -n {}", namespace);
    let _ = writeln!(out, "   2. Verify all pods healthy: kubectl get pods -n {}", namespace);
    let _ = writeln!(out, "   3. Check resource usage: kubectl top pods -n {}", namespace);
    let _ = writeln!(out, "   4. Review pod logs for errors");
    let _ = writeln!(out, "   5. Watch HPA scale back down (takes ~5 minutes)");
    let _ = writeln!(out, "{}", rule());
    out
}

/// Checks, then one dotted line per metric, the way k6 ends a run
pub fn text_summary(report: &Report, indent: &str) -> String {
    let mut out = String::new();
    let pad = format!("{}    ", indent);

    if !report.root_group.checks.is_empty() {
        let _ = writeln!(out);
        for check in &report.root_group.checks {
            let mark = if check.fails == 0 { "✓" } else { "✗" };
            let _ = writeln!(out, "{}{} {}", pad, mark, check.name);
            if check.fails > 0 {
                let total = check.passes + check.fails;
                let _ = writeln!(
                    out,
                    "{}  ↳  {}% - ✓ {} / ✗ {}",
                    pad,
                    check.passes * 100 / total,
                    check.passes,
                    check.fails
                );
            }
        }
    }

    let _ = writeln!(out);
    let width = report.metrics.keys().map(|k| k.len()).max().unwrap_or(0) + 3;
    for (name, metric) in &report.metrics {
        let marker = if metric.thresholds.is_empty() {
            "  "
        } else if metric.thresholds.values().all(|t| t.ok) {
            "✓ "
        } else {
            "✗ "
        };
        let dots = ".".repeat(width.saturating_sub(name.len()));
        let _ = writeln!(
            out,
            "{}  {}{}{}: {}",
            indent,
            marker,
            name,
            dots,
            format_metric(metric)
        );
    }

    let _ = writeln!(
        out,
        "\n{}  running ({}), {} complete iterations{}",
        indent,
        format_time(report.state.test_run_duration_ms),
        report.value(ITERATIONS, "count").unwrap_or(0.0),
        if report.state.interrupted { ", interrupted" } else { "" }
    );
    out
}

pub fn json_report(report: &Report) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Standalone page with inline CSS
pub fn html_report(report: &Report, title: &str) -> String {
    let success_rate = report.value(SUCCESS_RATE, "rate");
    let success_class = match success_rate.map(SuccessVerdict::from_rate) {
        Some(SuccessVerdict::Excellent) => "good",
        Some(SuccessVerdict::Acceptable) => "warn",
        Some(SuccessVerdict::Poor) => "bad",
        None => "",
    };
    let thresholds_class = if report.thresholds_passed() { "good" } else { "bad" };
    let thresholds_passed = report.threshold_results().iter().filter(|(_, _, ok)| *ok).count();
    let thresholds_total = report.threshold_results().len();

    let card = |label: &str, value: String, class: &str| {
        format!(
            "  <div class=\"stat-card {}\">\n    <div class=\"label\">{}</div>\n    <div class=\"value\">{}</div>\n  </div>",
            class, label, value
        )
    };
    let or_na = |value: Option<String>| value.unwrap_or_else(|| "n/a".to_string());

    let cards = [
        card(
            "Total Requests",
            or_na(report.value(HTTP_REQS, "count").map(|v| v.to_string())),
            "",
        ),
        card(
            "Failed Requests",
            or_na(report.value(HTTP_REQ_FAILED, "passes").map(|v| v.to_string())),
            "",
        ),
        card(
            "Success Rate",
            or_na(success_rate.map(|r| format!("{:.2}%", r * 100.0))),
            success_class,
        ),
        card(
            "Avg Analysis",
            or_na(report.value(ANALYSIS_DURATION, "avg").map(format_time)),
            "",
        ),
        card(
            "P95 Response",
            or_na(report.value(HTTP_REQ_DURATION, "p(95)").map(format_time)),
            "",
        ),
        card(
            "Peak VUs",
            or_na(report.value(VUS_MAX, "value").map(|v| v.to_string())),
            "",
        ),
        card(
            "Thresholds",
            format!("{}/{}", thresholds_passed, thresholds_total),
            thresholds_class,
        ),
    ]
    .join("\n");

    let check_rows = report
        .root_group
        .checks
        .iter()
        .map(|c| {
            let class = if c.fails == 0 { "ok" } else { "err" };
            format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td></tr>",
                class,
                html_escape(&c.name),
                c.passes,
                c.fails
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let threshold_rows = report
        .threshold_results()
        .iter()
        .map(|(metric, expr, ok)| {
            format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td></tr>",
                if *ok { "ok" } else { "err" },
                html_escape(metric),
                html_escape(expr),
                if *ok { "PASS" } else { "FAIL" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let metric_rows = report
        .metrics
        .iter()
        .filter(|(_, m)| !m.values.is_empty())
        .map(|(name, m)| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(name),
                kind_name(m.kind),
                html_escape(&format_metric(m))
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
  body {{
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
    margin: 0; padding: 2rem; background: #0f172a; color: #e2e8f0; line-height: 1.5;
  }}
  h1 {{ font-size: 1.75rem; color: #f1f5f9; margin: 0 0 0.25rem; }}
  h2 {{ font-size: 1.125rem; color: #94a3b8; text-transform: uppercase;
        margin: 2rem 0 0.75rem; border-bottom: 1px solid #1e293b; padding-bottom: 0.5rem; }}
  .meta {{ color: #64748b; font-size: 0.875rem; margin-bottom: 2rem; }}
  .meta span {{ margin-right: 1.5rem; }}
  .stats-grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 1rem; }}
  .stat-card {{ background: #1e293b; border: 1px solid #334155; border-radius: 0.5rem; padding: 1rem 1.25rem; }}
  .stat-card .label {{ font-size: 0.75rem; text-transform: uppercase; color: #64748b; }}
  .stat-card .value {{ font-size: 1.5rem; font-weight: 700; color: #f1f5f9; }}
  .stat-card.good .value {{ color: #34d399; }}
  .stat-card.warn .value {{ color: #fbbf24; }}
  .stat-card.bad .value {{ color: #f87171; }}
  table {{ width: 100%; border-collapse: collapse; font-size: 0.8125rem; background: #1e293b; margin-bottom: 2rem; }}
  th {{ padding: 0.625rem 0.875rem; text-align: left; color: #94a3b8; font-size: 0.75rem; text-transform: uppercase; }}
  td {{ padding: 0.5rem 0.875rem; border-top: 1px solid #334155; color: #cbd5e1; }}
  tr.ok td {{ border-left: 3px solid #34d399; }}
  tr.err td {{ border-left: 3px solid #f87171; color: #fca5a5; }}
  footer {{ margin-top: 3rem; color: #475569; font-size: 0.8125rem; }}
</style>
</head>
<body>
<h1>{title}</h1>
<div class="meta">
  <span>Started: {started}</span>
  <span>Duration: {duration}</span>{interrupted}
</div>

<h2>Summary</h2>
<div class="stats-grid">
{cards}
</div>

<h2>Thresholds</h2>
<table>
  <thead><tr><th>Metric</th><th>Condition</th><th>Result</th></tr></thead>
  <tbody>
{threshold_rows}
  </tbody>
</table>

<h2>Checks</h2>
<table>
  <thead><tr><th>Check</th><th>Passes</th><th>Fails</th></tr></thead>
  <tbody>
{check_rows}
  </tbody>
</table>

<h2>Metrics</h2>
<table>
  <thead><tr><th>Metric</th><th>Type</th><th>Values</th></tr></thead>
  <tbody>
{metric_rows}
  </tbody>
</table>

<footer>Generated by rampload &bull; {started}</footer>
</body>
</html>
"#,
        title = html_escape(title),
        started = html_escape(&report.state.started_at),
        duration = format_time(report.state.test_run_duration_ms),
        interrupted = if report.state.interrupted { "\n  <span>Interrupted</span>" } else { "" },
        cards = cards,
        threshold_rows = threshold_rows,
        check_rows = check_rows,
        metric_rows = metric_rows,
    )
}

/*---------= Formatting helpers =----------*/

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn kind_name(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        MetricKind::Gauge => "gauge",
        MetricKind::Rate => "rate",
        MetricKind::Trend => "trend",
    }
}

/// One-line rendering of a metric's values
fn format_metric(metric: &MetricSummary) -> String {
    let get = |key: &str| metric.value(key).unwrap_or(0.0);
    let fmt_value = |v: f64| match metric.contains {
        ValueType::Time => format_time(v),
        ValueType::Data => format_data(v),
        ValueType::Default => trim_float(v),
    };
    match metric.kind {
        MetricKind::Counter => {
            format!("{} {}/s", fmt_value(get("count")), fmt_value(get("rate")))
        }
        MetricKind::Gauge => format!(
            "{} min={} max={}",
            fmt_value(get("value")),
            fmt_value(get("min")),
            fmt_value(get("max"))
        ),
        MetricKind::Rate => format!(
            "{:.2}% ✓ {} ✗ {}",
            get("rate") * 100.0,
            get("passes"),
            get("fails")
        ),
        MetricKind::Trend => {
            let mut values: Vec<_> = metric.values.iter().collect();
            values.sort_by(|a, b| (trend_order(a.0), a.0).cmp(&(trend_order(b.0), b.0)));
            values
                .into_iter()
                .map(|(key, v)| format!("{}={}", key, fmt_value(*v)))
                .collect::<Vec<_>>()
                .join(" ")
        }
    }
}

// avg, min, med, max, then percentiles
fn trend_order(key: &str) -> u8 {
    match key {
        "avg" => 0,
        "min" => 1,
        "med" => 2,
        "max" => 3,
        _ => 4,
    }
}

/// Milliseconds as µs, ms or s
pub fn format_time(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

fn format_data(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", trim_float(value), UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value)
    } else {
        format!("{:.2}", value)
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
