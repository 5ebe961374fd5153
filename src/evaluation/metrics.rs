use serde::{Deserialize, Serialize};

/// The outcome of evaluating the global model on one holdout set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    values: Vec<(String, f64)>,
    summary: String,
}

impl MetricReport {
    /// Creates a new `MetricReport`.
    ///
    /// # Arguments
    /// * `values` - The named metric values, the last one is the key metric.
    /// * `summary` - A free form auxiliary report.
    pub fn new(values: Vec<(String, f64)>, summary: impl Into<String>) -> Self {
        Self {
            values,
            summary: summary.into(),
        }
    }

    pub fn values(&self) -> &[(String, f64)] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find_map(|(n, v)| (n == name).then_some(*v))
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// The metric rounds are ranked by, the last listed value.
    pub fn key_metric(&self) -> Option<f64> {
        self.values.last().map(|(_, v)| *v)
    }

    /// Formats every value the way the round summary line shows them.
    pub fn format_values(&self) -> String {
        self.values
            .iter()
            .map(|(_, v)| format!("{v:05.4}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
