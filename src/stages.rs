//! Ramp stages and the VU schedule they describe

use crate::config::parse_duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A time window with a VU count the scheduler must reach by its end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

// "30s:50", "2m:100"
impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration_str, target_str) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid stage '{}', expected <duration>:<target>", s))?;
        let duration = parse_duration(duration_str.trim())?;
        let target = target_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid stage target '{}'", target_str))?;
        Ok(Stage { duration, target })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", format_offset(self.duration), self.target)
    }
}

/// Ordered ramp profile. VU count starts at 0 and moves linearly towards
/// each stage's target across that stage's duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    stages: Vec<Stage>,
}

impl Schedule {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target VU count `elapsed` into the run. Past the end of the schedule
    /// the last stage's target holds.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut stage_start = Duration::ZERO;
        let mut prev_target = 0usize;
        for stage in &self.stages {
            if elapsed < stage_start + stage.duration {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - prev_target as f64;
                return (prev_target as f64 + diff * progress) as usize;
            }
            stage_start += stage.duration;
            prev_target = stage.target;
        }
        prev_target
    }

    /// One entry per stage: time window, target and a short label
    pub fn phases(&self) -> Vec<Phase> {
        let max = self.max_target();
        let last = self.stages.len().saturating_sub(1);
        let mut start = Duration::ZERO;
        let mut prev_target = 0usize;
        let mut phases = Vec::with_capacity(self.stages.len());

        for (i, stage) in self.stages.iter().enumerate() {
            let end = start + stage.duration;
            let label = if i == last && stage.target == 0 {
                PhaseLabel::Finish
            } else if i == 0 {
                PhaseLabel::WarmUp
            } else if stage.target == max {
                PhaseLabel::Peak
            } else if stage.target > prev_target {
                PhaseLabel::Increasing
            } else if stage.target < prev_target {
                PhaseLabel::Easing
            } else {
                PhaseLabel::Steady
            };
            phases.push(Phase {
                start,
                end,
                target: stage.target,
                label,
            });
            start = end;
            prev_target = stage.target;
        }
        phases
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseLabel {
    WarmUp,
    Increasing,
    Peak,
    Steady,
    Easing,
    Finish,
}

impl fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PhaseLabel::WarmUp => "warm up",
            PhaseLabel::Increasing => "pushing hard",
            PhaseLabel::Peak => "MAXIMUM LOAD!",
            PhaseLabel::Steady => "holding steady",
            PhaseLabel::Easing => "easing off",
            PhaseLabel::Finish => "finish",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub start: Duration,
    pub end: Duration,
    pub target: usize,
    pub label: PhaseLabel,
}

impl Phase {
    /// "0-30s", "30s-2.5m"
    pub fn window(&self) -> String {
        let start = if self.start.is_zero() {
            "0".to_string()
        } else {
            format_offset(self.start)
        };
        format!("{}-{}", start, format_offset(self.end))
    }
}

/// Seconds below a minute, otherwise minutes with at most one decimal
pub fn format_offset(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        return format!("{}ms", ms);
    }
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{}s", trim_decimal(secs));
    }
    if secs < 3600.0 {
        return format!("{}m", trim_decimal(secs / 60.0));
    }
    format!("{}h", trim_decimal(secs / 3600.0))
}

fn trim_decimal(value: f64) -> String {
    let s = format!("{:.1}", value);
    s.strip_suffix(".0").map(str::to_string).unwrap_or(s)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_profile() -> Schedule {
        Schedule::new(vec![
            Stage::new(Duration::from_secs(30), 50),
            Stage::new(Duration::from_secs(120), 100),
            Stage::new(Duration::from_secs(180), 125),
            Stage::new(Duration::from_secs(60), 0),
        ])
    }

    #[test]
    fn test_parse_stage() {
        let stage: Stage = "30s:50".parse().unwrap();
        assert_eq!(stage, Stage::new(Duration::from_secs(30), 50));

        let stage: Stage = "2m:100".parse().unwrap();
        assert_eq!(stage, Stage::new(Duration::from_secs(120), 100));

        assert!("30s".parse::<Stage>().is_err());
        assert!("30s:-1".parse::<Stage>().is_err());
        assert!("xs:10".parse::<Stage>().is_err());
    }

    #[test]
    fn test_target_interpolation() {
        let schedule = default_profile();

        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(Duration::from_secs(15)), 25);
        assert_eq!(schedule.target_at(Duration::from_secs(30)), 50);
        assert_eq!(schedule.target_at(Duration::from_secs(90)), 75);
        assert_eq!(schedule.target_at(Duration::from_secs(150)), 100);
        assert_eq!(schedule.target_at(Duration::from_secs(330)), 125);
        assert_eq!(schedule.target_at(Duration::from_secs(360)), 62);
    }

    #[test]
    fn test_target_after_schedule_holds_last() {
        let schedule = Schedule::new(vec![Stage::new(Duration::from_secs(10), 40)]);
        assert_eq!(schedule.target_at(Duration::from_secs(100)), 40);
        assert_eq!(default_profile().target_at(Duration::from_secs(1000)), 0);
    }

    #[test]
    fn test_zero_length_stage_jumps() {
        let schedule = Schedule::new(vec![
            Stage::new(Duration::ZERO, 10),
            Stage::new(Duration::from_secs(10), 10),
        ]);
        assert_eq!(schedule.target_at(Duration::ZERO), 10);
        assert_eq!(schedule.target_at(Duration::from_secs(5)), 10);
    }

    #[test]
    fn test_totals() {
        let schedule = default_profile();
        assert_eq!(schedule.total_duration(), Duration::from_secs(390));
        assert_eq!(schedule.max_target(), 125);
    }

    #[test]
    fn test_phases() {
        let phases = default_profile().phases();
        let labels: Vec<_> = phases.iter().map(|p| p.label).collect();
        assert_eq!(
            labels,
            vec![
                PhaseLabel::WarmUp,
                PhaseLabel::Increasing,
                PhaseLabel::Peak,
                PhaseLabel::Finish
            ]
        );
        let windows: Vec<_> = phases.iter().map(|p| p.window()).collect();
        assert_eq!(windows, vec!["0-30s", "30s-2.5m", "2.5m-5.5m", "5.5m-6.5m"]);
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(Duration::from_millis(250)), "250ms");
        assert_eq!(format_offset(Duration::from_secs(45)), "45s");
        assert_eq!(format_offset(Duration::from_secs(60)), "1m");
        assert_eq!(format_offset(Duration::from_secs(90)), "1.5m");
        assert_eq!(format_offset(Duration::from_secs(7200)), "2h");
    }
}
