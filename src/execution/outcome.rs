use std::{fmt, time::Duration};

use crate::learner::LearnerErr;

/// Why a sampled session was left out of aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFailure {
    /// The session never received the round's global state.
    Undelivered,
    /// The local update returned an error.
    Training(LearnerErr),
    /// The local update finished after the round's deadline.
    DeadlineExceeded { elapsed: Duration, deadline: Duration },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undelivered => f.write_str("global state wasn't delivered"),
            Self::Training(e) => write!(f, "local update failed: {e}"),
            Self::DeadlineExceeded { elapsed, deadline } => {
                write!(f, "took {elapsed:?}, deadline is {deadline:?}")
            }
        }
    }
}

/// What came out of running local updates over a round's sampled sessions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchOutcome {
    contributors: Vec<usize>,
    sample_counts: Vec<usize>,
    failures: Vec<(usize, SessionFailure)>,
}

impl DispatchOutcome {
    pub(crate) fn succeeded(&mut self, index: usize, samples: usize) {
        self.contributors.push(index);
        self.sample_counts.push(samples);
    }

    pub(crate) fn failed(&mut self, index: usize, failure: SessionFailure) {
        self.failures.push((index, failure));
    }

    /// The sessions that completed their local update in time, ascending.
    pub fn contributors(&self) -> &[usize] {
        &self.contributors
    }

    /// The sample counts of the contributors, parallel to `contributors`.
    pub fn sample_counts(&self) -> &[usize] {
        &self.sample_counts
    }

    /// The sum of every contributor's sample count.
    pub fn total_samples(&self) -> usize {
        self.sample_counts.iter().sum()
    }

    pub fn failures(&self) -> &[(usize, SessionFailure)] {
        &self.failures
    }

    pub fn excluded(&self) -> Vec<usize> {
        self.failures.iter().map(|(i, _)| *i).collect()
    }
}
