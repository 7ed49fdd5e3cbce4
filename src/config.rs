use crate::errors::{LoadTestError, Result};
use crate::metrics;
use crate::stages::{Schedule, Stage};
use crate::thresholds::Threshold;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://fraudbuster.local";
pub const DEFAULT_TARGET: &str =
    "https://www.amazon.sg/Sony-WH-CH720N-Canceling-Headphones-Microphone/dp/B0BS1QCFHX/?th=1";
pub const DEFAULT_FORM_FIELD: &str = "amazon_url";
pub const DEFAULT_NAMESPACE: &str = "fraud-buster";
pub const DEFAULT_TITLE: &str = "Fraud Buster - Aggressive Load Test Report";

// Error messages
const ERR_NO_STAGES: &str = "At least one stage is required";
const ERR_EMPTY_SCHEDULE: &str = "Stages must add up to more than 0s";
const ERR_NO_TARGETS: &str = "At least one target URL is required";
const ERR_INVALID_THREADS: &str = "Invalid number of threads";
const ERR_INVALID_TIMEOUT: &str = "Analysis timeout must be greater than 0";
const ERR_EMPTY_FORM_FIELD: &str = "Form field name must not be empty";

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rampload",
    version,
    about = "Ramps virtual users through timed stages against one endpoint and reports the results",
    after_help = "Durations can be specified like: 500ms, 10s, 1m, 1h\n\
                  Stages are <duration>:<target>, thresholds are <metric>=<expression>"
)]
pub struct Args {
    /// Endpoint receiving the GET and the form POST
    #[arg(short = 'u', long, value_name = "URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Candidate URL submitted in the form (repeatable, one is picked per iteration)
    #[arg(long = "target", value_name = "URL")]
    pub targets: Vec<String>,

    /// Ramp stage, e.g. 30s:50 (repeatable, replaces the default profile)
    #[arg(short = 's', long = "stage", value_name = "DURATION:VUS")]
    pub stages: Vec<Stage>,

    /// Pass/fail condition, e.g. 'success_rate=rate>0.5' (repeatable, replaces the defaults)
    #[arg(long = "threshold", value_name = "METRIC=EXPR")]
    pub thresholds: Vec<Threshold>,

    /// Name of the form field carrying the target URL
    #[arg(long, default_value = DEFAULT_FORM_FIELD)]
    pub form_field: String,

    /// Pause between the page load and the form submission
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub think_time: Duration,

    /// Pause after the form submission
    #[arg(long, value_parser = parse_duration, default_value = "2s")]
    pub cooldown_time: Duration,

    /// Wait ceiling for the form submission response
    #[arg(short = 'T', long, value_parser = parse_duration, default_value = "120s")]
    pub analysis_timeout: Duration,

    /// Timeout for establishing a connection to the host
    #[arg(short = 'C', long, value_parser = parse_duration, default_value = "20s")]
    pub connect_timeout: Duration,

    /// How long running iterations may take to finish once the run ends
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub graceful_stop: Duration,

    /// Runtime worker threads (defaults to the number of CPUs)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Kubernetes namespace used in the printed watch commands
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Title of the HTML report
    #[arg(long, default_value = DEFAULT_TITLE)]
    pub title: String,

    #[arg(long, value_name = "PATH", default_value = "summary.html")]
    pub html_report: PathBuf,

    #[arg(long, value_name = "PATH", default_value = "summary.json")]
    pub json_report: PathBuf,

    /// Print the summary only, do not write report files
    #[arg(long)]
    pub no_reports: bool,

    /// Start even if the host does not accept TCP connections
    #[arg(long)]
    pub skip_preflight: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub targets: Vec<String>,
    pub schedule: Schedule,
    pub thresholds: Vec<Threshold>,
    pub form_field: String,

    pub think_time: Duration, // pause after the GET
    pub cooldown_time: Duration, // pause after the POST
    pub analysis_timeout: Duration, // wait ceiling for the POST only
    pub connection_timeout: Duration, // establishing a connection, applies to both requests
    pub graceful_stop: Duration,
    pub threads: usize,

    pub namespace: String,
    pub title: String,
    pub html_report: Option<PathBuf>,
    pub json_report: Option<PathBuf>,
    pub preflight: bool,
    pub verbose: bool,
}

// Mirrors the profile the tool was written for
impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            targets: vec![DEFAULT_TARGET.to_string()],
            schedule: default_schedule(),
            thresholds: default_thresholds(),
            form_field: DEFAULT_FORM_FIELD.to_string(),
            think_time: Duration::from_secs(1),
            cooldown_time: Duration::from_secs(2),
            analysis_timeout: Duration::from_secs(120),
            connection_timeout: Duration::from_secs(20),
            graceful_stop: Duration::from_secs(30),
            threads: default_threads(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            title: DEFAULT_TITLE.to_string(),
            html_report: Some(PathBuf::from("summary.html")),
            json_report: Some(PathBuf::from("summary.json")),
            preflight: true,
            verbose: false,
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = LoadTestError;

    fn try_from(args: Args) -> Result<Self> {
        let defaults = Config::default();
        let config = Config {
            base_url: args.base_url,
            targets: if args.targets.is_empty() { defaults.targets } else { args.targets },
            schedule: if args.stages.is_empty() {
                defaults.schedule
            } else {
                Schedule::new(args.stages)
            },
            thresholds: if args.thresholds.is_empty() {
                defaults.thresholds
            } else {
                args.thresholds
            },
            form_field: args.form_field,
            think_time: args.think_time,
            cooldown_time: args.cooldown_time,
            analysis_timeout: args.analysis_timeout,
            connection_timeout: args.connect_timeout,
            graceful_stop: args.graceful_stop,
            threads: args.threads.unwrap_or(defaults.threads),
            namespace: args.namespace,
            title: args.title,
            html_report: (!args.no_reports).then_some(args.html_report),
            json_report: (!args.no_reports).then_some(args.json_report),
            preflight: !args.skip_preflight,
            verbose: args.verbose,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /*-------------------- Public Functions -------------------*/
    /// Parse the process arguments. Help, version and malformed flags are
    /// handled by clap, which exits on its own.
    pub fn parse() -> Result<Config> {
        Config::try_from(Args::parse())
    }

    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| LoadTestError::config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(LoadTestError::config(format!(
                "Invalid URL scheme '{}', only 'http' and 'https' are supported",
                base.scheme()
            )));
        }
        if base.host_str().is_none() {
            return Err(LoadTestError::config("Base URL does not have a valid hostname"));
        }

        if self.targets.is_empty() {
            return Err(LoadTestError::config(ERR_NO_TARGETS));
        }
        for target in &self.targets {
            Url::parse(target)
                .map_err(|e| LoadTestError::config(format!("Invalid target '{}': {}", target, e)))?;
        }

        if self.schedule.stages().is_empty() {
            return Err(LoadTestError::config(ERR_NO_STAGES));
        }
        if self.schedule.total_duration().is_zero() {
            return Err(LoadTestError::config(ERR_EMPTY_SCHEDULE));
        }

        for threshold in &self.thresholds {
            let kind = metrics::kind_of(&threshold.metric).ok_or_else(|| {
                LoadTestError::config(format!(
                    "Threshold '{}' refers to unknown metric '{}'",
                    threshold,
                    threshold.metric
                ))
            })?;
            if !threshold.expr.aggregation.applies_to(kind) {
                return Err(LoadTestError::config(format!(
                    "Threshold '{}' uses '{}', which {:?} metrics do not produce",
                    threshold,
                    threshold.expr.aggregation,
                    kind
                )));
            }
        }

        if self.threads == 0 {
            return Err(LoadTestError::config(ERR_INVALID_THREADS));
        }
        if self.analysis_timeout.is_zero() {
            return Err(LoadTestError::config(ERR_INVALID_TIMEOUT));
        }
        if self.form_field.trim().is_empty() {
            return Err(LoadTestError::config(ERR_EMPTY_FORM_FIELD));
        }
        Ok(())
    }

    /// `{base_url}/` without doubling the slash
    pub fn endpoint(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}

pub fn default_schedule() -> Schedule {
    Schedule::new(vec![
        Stage::new(Duration::from_secs(30), 50), // warm up
        Stage::new(Duration::from_secs(2 * 60), 100),
        Stage::new(Duration::from_secs(3 * 60), 125), // peak
        Stage::new(Duration::from_secs(60), 0),
    ])
}

pub fn default_thresholds() -> Vec<Threshold> {
    ["http_req_duration=p(95)<120000", "success_rate=rate>0.5"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Parses "500ms", "10s", "1m", "1h". A bare number is seconds.
pub fn parse_duration(duration_str: &str) -> std::result::Result<Duration, String> {
    let error = || format!("Invalid duration '{}'", duration_str);
    if duration_str.is_empty() {
        return Err(error());
    }

    let (value_str, unit) = if let Some(value) = duration_str.strip_suffix("ms") {
        (value, "ms")
    } else if duration_str.ends_with(['s', 'm', 'h']) {
        duration_str.split_at(duration_str.len() - 1)
    } else {
        (duration_str, "s")
    };
    let value: u64 = value_str.parse().map_err(|_| error())?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(error)?),
        "h" => Duration::from_secs(value.checked_mul(60 * 60).ok_or_else(error)?),
        _ => Duration::from_secs(value),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let mut argv = vec!["rampload"];
        argv.extend_from_slice(args);
        let args = Args::try_parse_from(argv).map_err(|e| LoadTestError::config(e.to_string()))?;
        Config::try_from(args)
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("xs").is_err());
        assert!(parse_duration("1.5m").is_err());
        assert!(parse_duration("999999999999999999h").is_err());
        assert!(parse_duration("999999999999999999m").is_err());
    }

    #[test]
    fn test_defaults_match_fraud_buster_profile() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.targets, vec![DEFAULT_TARGET.to_string()]);
        assert_eq!(config.schedule, default_schedule());
        assert_eq!(config.schedule.total_duration(), Duration::from_secs(390));
        assert_eq!(config.analysis_timeout, Duration::from_secs(120));
        assert_eq!(config.think_time, Duration::from_secs(1));
        assert_eq!(config.cooldown_time, Duration::from_secs(2));

        let thresholds: Vec<String> = config.thresholds.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            thresholds,
            vec!["http_req_duration: p(95)<120000", "success_rate: rate>0.5"]
        );
        assert_eq!(config.html_report, Some(PathBuf::from("summary.html")));
        assert_eq!(config.json_report, Some(PathBuf::from("summary.json")));
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "-u",
            "http://localhost:8080/",
            "--target",
            "https://example.com/a",
            "--target",
            "https://example.com/b",
            "-s",
            "5s:2",
            "-s",
            "5s:0",
            "--threshold",
            "analysis_duration=avg<30000",
            "--think-time",
            "0",
            "--no-reports",
        ])
        .unwrap();

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.schedule.stages().len(), 2);
        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.think_time, Duration::ZERO);
        assert_eq!(config.endpoint(), "http://localhost:8080/");
        assert!(config.html_report.is_none());
        assert!(config.json_report.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["-u", "ftp://example.com"]).is_err());
        assert!(parse(&["-u", "not a url"]).is_err());
        assert!(parse(&["--target", "nope"]).is_err());
        assert!(parse(&["-s", "0s:10"]).is_err());
        assert!(parse(&["--threshold", "made_up=avg<1"]).is_err());
        assert!(parse(&["--threshold", "success_rate=p(95)<1"]).is_err());
        assert!(parse(&["-t", "0"]).is_err());
        assert!(parse(&["-T", "0s"]).is_err());
        assert!(parse(&["--form-field", " "]).is_err());
        assert!(parse(&["--graceful-stop", "999999999999999999h"]).is_err());
    }

    #[test]
    fn test_endpoint() {
        let config = Config::default();
        assert_eq!(config.endpoint(), "http://fraudbuster.local/");
    }
}
