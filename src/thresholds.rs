//! Pass/fail conditions over aggregated metrics
//!
//! A threshold is written `<metric>=<aggregation><operator><value>`, for
//! example `http_req_duration=p(95)<120000` or `success_rate=rate>0.5`.

use crate::metrics::MetricKind;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Count,
    Rate,
    Value,
}

impl Aggregation {
    /// Whether a metric of `kind` produces this aggregate
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Avg
            | Aggregation::Med
            | Aggregation::Percentile(_) => kind == MetricKind::Trend,
            Aggregation::Min | Aggregation::Max => {
                matches!(kind, MetricKind::Trend | MetricKind::Gauge)
            }
            Aggregation::Count => kind == MetricKind::Counter,
            Aggregation::Rate => matches!(kind, MetricKind::Rate | MetricKind::Counter),
            Aggregation::Value => kind == MetricKind::Gauge,
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "med" => Ok(Aggregation::Med),
            "count" => Ok(Aggregation::Count),
            "rate" => Ok(Aggregation::Rate),
            "value" => Ok(Aggregation::Value),
            _ => {
                let p = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.parse::<f64>().ok())
                    .ok_or_else(|| format!("Unknown aggregation '{}'", s))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("Percentile out of range in '{}'", s));
                }
                Ok(Aggregation::Percentile(p))
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    fn symbol(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    fn apply(&self, observed: f64, bound: f64) -> bool {
        match self {
            Operator::Lt => observed < bound,
            Operator::Le => observed <= bound,
            Operator::Gt => observed > bound,
            Operator::Ge => observed >= bound,
            Operator::Eq => observed == bound,
            Operator::Ne => observed != bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub op: Operator,
    pub value: f64,
}

impl ThresholdExpr {
    /// A metric without samples never satisfies a threshold
    pub fn passes(&self, observed: Option<f64>) -> bool {
        observed.is_some_and(|v| self.op.apply(v, self.value))
    }
}

impl FromStr for ThresholdExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let pos = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| format!("Missing comparison operator in '{}'", s))?;
        let (lhs, rest) = compact.split_at(pos);

        // two-character operators first
        let (op, rhs) = [
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ]
        .iter()
        .find_map(|(symbol, op)| rest.strip_prefix(symbol).map(|rhs| (*op, rhs)))
        .ok_or_else(|| format!("Invalid comparison operator in '{}'", s))?;

        let aggregation = lhs.parse()?;
        let value = rhs
            .parse::<f64>()
            .map_err(|_| format!("Invalid threshold value '{}' in '{}'", rhs, s))?;
        Ok(ThresholdExpr { aggregation, op, value })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.op.symbol(), self.value)
    }
}

/// A condition on one metric
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expr: ThresholdExpr,
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (metric, expr) = s
            .split_once('=')
            .ok_or_else(|| format!("Invalid threshold '{}', expected <metric>=<expression>", s))?;
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(format!("Missing metric name in '{}'", s));
        }
        Ok(Threshold {
            metric: metric.to_string(),
            expr: expr.parse()?,
        })
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expr)
    }
}
