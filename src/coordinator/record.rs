use crate::{evaluation::MetricReport, execution::SessionFailure};

/// How a round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The global state was replaced by the aggregate of the contributors.
    Completed,
    /// The global state was replaced by the aggregate, but evaluating or
    /// checkpointing it failed.
    Unreported { reason: String },
    /// The round was skipped, the global state is unchanged.
    Failed { reason: String },
}

/// The log entry of one executed round, immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    round: usize,
    sampled: Vec<usize>,
    sample_counts: Vec<usize>,
    excluded: Vec<(usize, SessionFailure)>,
    metrics: Vec<(String, MetricReport)>,
    outcome: RoundOutcome,
}

impl RoundRecord {
    /// Creates the record of a round whose aggregate became the new global state.
    ///
    /// # Arguments
    /// * `round` - The round number.
    /// * `sampled` - The ascending indices of the sampled sessions.
    /// * `sample_counts` - The sample count of every sampled session, parallel to `sampled`.
    /// * `excluded` - The sampled sessions left out of aggregation and why.
    /// * `metrics` - The report of every holdout set, in registration order.
    pub(crate) fn completed(
        round: usize,
        sampled: Vec<usize>,
        sample_counts: Vec<usize>,
        excluded: Vec<(usize, SessionFailure)>,
        metrics: Vec<(String, MetricReport)>,
    ) -> Self {
        Self {
            round,
            sampled,
            sample_counts,
            excluded,
            metrics,
            outcome: RoundOutcome::Completed,
        }
    }

    /// Creates the record of an aggregated round whose evaluation or checkpoint failed.
    ///
    /// `metrics` holds the reports gathered before the failure.
    pub(crate) fn unreported(
        round: usize,
        sampled: Vec<usize>,
        sample_counts: Vec<usize>,
        excluded: Vec<(usize, SessionFailure)>,
        metrics: Vec<(String, MetricReport)>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            round,
            sampled,
            sample_counts,
            excluded,
            metrics,
            outcome: RoundOutcome::Unreported {
                reason: reason.into(),
            },
        }
    }

    /// Creates the record of a skipped round, it carries no metrics.
    pub(crate) fn failed(
        round: usize,
        sampled: Vec<usize>,
        sample_counts: Vec<usize>,
        excluded: Vec<(usize, SessionFailure)>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            round,
            sampled,
            sample_counts,
            excluded,
            metrics: Vec::new(),
            outcome: RoundOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn sampled(&self) -> &[usize] {
        &self.sampled
    }

    pub fn sample_counts(&self) -> &[usize] {
        &self.sample_counts
    }

    pub fn excluded(&self) -> &[(usize, SessionFailure)] {
        &self.excluded
    }

    /// The sampled sessions that took part in aggregation, ascending.
    pub fn contributors(&self) -> Vec<usize> {
        if !self.is_aggregated() {
            return Vec::new();
        }

        self.sampled
            .iter()
            .copied()
            .filter(|i| self.excluded.iter().all(|(e, _)| e != i))
            .collect()
    }

    pub fn metrics(&self) -> &[(String, MetricReport)] {
        &self.metrics
    }

    /// Returns the report of the named holdout set, if it was evaluated this round.
    pub fn metric(&self, holdout: &str) -> Option<&MetricReport> {
        self.metrics
            .iter()
            .find_map(|(name, report)| (name == holdout).then_some(report))
    }

    pub fn outcome(&self) -> &RoundOutcome {
        &self.outcome
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RoundOutcome::Completed
    }

    /// Whether the global state took this round's aggregate.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self.outcome, RoundOutcome::Failed { .. })
    }
}

/// The best round of a holdout set, ranked by its key metric.
#[derive(Debug, Clone, PartialEq)]
pub struct BestRound {
    pub holdout: String,
    pub round: usize,
    pub key_metric: f64,
}

/// Picks, for every holdout, the completed round with the largest key metric.
///
/// Ties go to the earliest round. Holdouts that were never evaluated are left out.
///
/// # Arguments
/// * `holdouts` - The holdout names, in the order they're reported.
/// * `history` - The executed rounds.
pub fn best_rounds<'a>(
    holdouts: impl IntoIterator<Item = &'a str>,
    history: &[RoundRecord],
) -> Vec<BestRound> {
    holdouts
        .into_iter()
        .filter_map(|holdout| {
            let mut best: Option<(usize, f64)> = None;

            for record in history.iter().filter(|r| r.is_completed()) {
                let Some(value) = record.metric(holdout).and_then(MetricReport::key_metric) else {
                    continue;
                };

                if best.is_none_or(|(_, max)| value > max) {
                    best = Some((record.round(), value));
                }
            }

            best.map(|(round, key_metric)| BestRound {
                holdout: holdout.to_string(),
                round,
                key_metric,
            })
        })
        .collect()
}
