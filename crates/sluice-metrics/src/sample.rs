//! Metric sample value types.

use std::fmt;
use std::time::Instant;

/// Unit attached to a metric sample, carried through to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
    Milliseconds,
    Percent,
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricUnit::Count => "Count",
            MetricUnit::Milliseconds => "Milliseconds",
            MetricUnit::Percent => "Percent",
        };
        f.write_str(s)
    }
}

/// One recorded observation. Samples are immutable once published into
/// the ingress channel.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: Instant,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            timestamp: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_display_names() {
        assert_eq!(MetricUnit::Count.to_string(), "Count");
        assert_eq!(MetricUnit::Milliseconds.to_string(), "Milliseconds");
        assert_eq!(MetricUnit::Percent.to_string(), "Percent");
    }
}
