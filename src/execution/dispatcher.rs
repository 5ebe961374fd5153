use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use log::{debug, warn};
use rayon::{ThreadPoolBuilder, prelude::*};

use super::{DispatchOutcome, SessionFailure};
use crate::{
    error::{FederationErr, Result},
    learner::Learner,
    session::ClientSession,
};

/// How the per-client work of a round is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One session after the other on the coordinator's thread.
    Sequential,
    /// Across a bounded pool of worker threads, created for and dropped with each phase.
    Concurrent { workers: NonZeroUsize },
}

/// Runs local updates and evaluations over a round's sampled sessions.
///
/// Every phase waits for all its units to finish before returning, no work is
/// left in flight once a method returns.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    mode: DispatchMode,
    deadline: Option<Duration>,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`.
    ///
    /// # Arguments
    /// * `mode` - Whether to run sessions sequentially or on a worker pool.
    /// * `deadline` - How long after a round's dispatch starts local updates may finish,
    ///   sessions finishing later are excluded.
    pub fn new(mode: DispatchMode, deadline: Option<Duration>) -> Self {
        Self { mode, deadline }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Runs the local update of every sampled session.
    ///
    /// Sessions that fail or miss the deadline are excluded from the outcome and a
    /// warning citing them is emitted, the round goes on with the remaining ones.
    /// The deadline counts from the start of the phase, so time spent waiting for
    /// a worker or for the previous session counts against it.
    ///
    /// # Arguments
    /// * `sessions` - All the registered sessions.
    /// * `sampled` - The strictly ascending indices of the sampled sessions.
    ///
    /// # Returns
    /// The contributors and their sample counts, or `InvalidConfiguration` if
    /// `sampled` isn't a valid selection.
    pub fn run_round<L: Learner>(
        &self,
        sessions: &mut [ClientSession<L>],
        sampled: &[usize],
    ) -> Result<DispatchOutcome> {
        let selected = select(sessions, sampled)?;
        let deadline = self.deadline;
        let phase_start = Instant::now();

        let results = self.execute(selected, |session| {
            let result = session.run_local_update();
            let elapsed = phase_start.elapsed();

            let result = match (result, deadline) {
                (Err(e), _) => Err(SessionFailure::Training(e)),
                (Ok(()), Some(deadline)) if elapsed > deadline => {
                    session.discard_export();
                    Err(SessionFailure::DeadlineExceeded { elapsed, deadline })
                }
                (Ok(()), _) => Ok(()),
            };

            (session.index(), session.sample_count(), result)
        })?;

        let mut outcome = DispatchOutcome::default();
        for (index, samples, result) in results {
            match result {
                Ok(()) => outcome.succeeded(index, samples),
                Err(failure) => {
                    debug!(session = index; "excluded from aggregation: {failure}");
                    outcome.failed(index, failure);
                }
            }
        }

        if !outcome.failures().is_empty() {
            warn!(
                "{} of {} sampled clients excluded from aggregation: {:?}",
                outcome.failures().len(),
                sampled.len(),
                outcome.excluded()
            );
        }

        Ok(outcome)
    }

    /// Runs the local evaluation of every sampled session.
    ///
    /// # Arguments
    /// * `sessions` - All the registered sessions.
    /// * `sampled` - The strictly ascending indices of the sampled sessions.
    ///
    /// # Returns
    /// Each sampled index paired with whether its evaluation succeeded.
    pub fn evaluate_round<L: Learner>(
        &self,
        sessions: &mut [ClientSession<L>],
        sampled: &[usize],
    ) -> Result<Vec<(usize, bool)>> {
        let selected = select(sessions, sampled)?;
        self.execute(selected, |session| {
            (session.index(), session.evaluate_locally())
        })
    }

    /// Applies `work` to every selected session, returning the results in selection order.
    ///
    /// In concurrent mode the worker pool lives only for the duration of this call.
    fn execute<L, T, F>(&self, selected: Vec<&mut ClientSession<L>>, work: F) -> Result<Vec<T>>
    where
        L: Learner,
        T: Send,
        F: Fn(&mut ClientSession<L>) -> T + Sync,
    {
        match self.mode {
            DispatchMode::Sequential => Ok(selected.into_iter().map(work).collect()),
            DispatchMode::Concurrent { workers } => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(workers.get())
                    .thread_name(|i| format!("dispatch-{i}"))
                    .build()
                    .map_err(|e| FederationErr::config(format!("can't build worker pool: {e}")))?;

                Ok(pool.install(|| selected.into_par_iter().map(|s| work(s)).collect()))
            }
        }
    }
}

/// Borrows the sampled sessions mutably and disjointly.
///
/// # Arguments
/// * `sessions` - All the registered sessions.
/// * `sampled` - The indices to select, must be strictly ascending and in range.
fn select<'a, L: Learner>(
    sessions: &'a mut [ClientSession<L>],
    sampled: &[usize],
) -> Result<Vec<&'a mut ClientSession<L>>> {
    if sampled.windows(2).any(|w| w[0] >= w[1]) {
        return Err(FederationErr::config(format!(
            "sampled indices must be strictly ascending, got {sampled:?}"
        )));
    }

    match sampled.last() {
        Some(&last) if last >= sessions.len() => {
            return Err(FederationErr::config(format!(
                "sampled index {last} is out of range for {} sessions",
                sessions.len()
            )));
        }
        _ => {}
    }

    let mut wanted = sampled.iter().copied().peekable();
    let selected = sessions
        .iter_mut()
        .enumerate()
        .filter_map(|(i, session)| {
            wanted.next_if_eq(&i)?;
            Some(session)
        })
        .collect();

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{ScriptedLearner, snapshot};

    fn sessions(learners: Vec<ScriptedLearner>) -> Vec<ClientSession<ScriptedLearner>> {
        let initial = snapshot(&[("w", &[0.])]);

        learners
            .into_iter()
            .enumerate()
            .map(|(i, learner)| {
                let mut session = ClientSession::new(format!("client{i}"), learner);
                session.bind(i);
                session.receive_global_state(&initial).unwrap();
                session
            })
            .collect()
    }

    fn concurrent(workers: usize) -> DispatchMode {
        DispatchMode::Concurrent {
            workers: NonZeroUsize::new(workers).unwrap(),
        }
    }

    #[test]
    fn test_sequential_total_is_sum_of_sampled_counts() {
        let learners = [10, 20, 30, 40].map(ScriptedLearner::new).into();
        let mut sessions = sessions(learners);

        let dispatcher = Dispatcher::new(DispatchMode::Sequential, None);
        let outcome = dispatcher.run_round(&mut sessions, &[1, 3]).unwrap();

        assert_eq!(outcome.contributors(), [1, 3]);
        assert_eq!(outcome.sample_counts(), [20, 40]);
        assert_eq!(outcome.total_samples(), 60);
        assert!(sessions[0].exported().is_none());
        assert!(sessions[1].exported().is_some());
    }

    #[test]
    fn test_concurrent_matches_sequential() {
        let make = || {
            sessions(
                (1..=8)
                    .map(|n| ScriptedLearner::new(n).with_shift(n as f32))
                    .collect(),
            )
        };
        let sampled = [0, 2, 3, 5, 7];

        let mut seq = make();
        let seq_outcome = Dispatcher::new(DispatchMode::Sequential, None)
            .run_round(&mut seq, &sampled)
            .unwrap();

        let mut par = make();
        let par_outcome = Dispatcher::new(concurrent(3), None)
            .run_round(&mut par, &sampled)
            .unwrap();

        assert_eq!(seq_outcome, par_outcome);
        for &i in &sampled {
            assert_eq!(seq[i].exported(), par[i].exported());
        }
    }

    #[test]
    fn test_failed_sessions_are_excluded() {
        let learners = vec![
            ScriptedLearner::new(10),
            ScriptedLearner::new(20).failing(),
            ScriptedLearner::new(30),
        ];
        let mut sessions = sessions(learners);

        let outcome = Dispatcher::new(concurrent(2), None)
            .run_round(&mut sessions, &[0, 1, 2])
            .unwrap();

        assert_eq!(outcome.contributors(), [0, 2]);
        assert_eq!(outcome.total_samples(), 40);
        assert_eq!(outcome.excluded(), [1]);
        assert!(matches!(
            outcome.failures()[0].1,
            SessionFailure::Training(_)
        ));
    }

    #[test]
    fn test_sessions_missing_the_deadline_are_excluded() {
        let learners = vec![
            ScriptedLearner::new(10),
            ScriptedLearner::new(20).with_delay(Duration::from_millis(200)),
        ];
        let mut sessions = sessions(learners);

        let dispatcher = Dispatcher::new(DispatchMode::Sequential, Some(Duration::from_millis(50)));
        let outcome = dispatcher.run_round(&mut sessions, &[0, 1]).unwrap();

        assert_eq!(outcome.contributors(), [0]);
        assert!(matches!(
            outcome.failures()[0],
            (1, SessionFailure::DeadlineExceeded { .. })
        ));
        assert!(sessions[1].exported().is_none());
    }

    #[test]
    fn test_deadline_counts_from_the_phase_start() {
        for mode in [DispatchMode::Sequential, concurrent(1)] {
            let learners = (0..4)
                .map(|_| ScriptedLearner::new(1).with_delay(Duration::from_millis(40)))
                .collect();
            let mut sessions = sessions(learners);

            let dispatcher = Dispatcher::new(mode, Some(Duration::from_millis(100)));
            let outcome = dispatcher.run_round(&mut sessions, &[0, 1, 2, 3]).unwrap();

            // Each update fits in the deadline on its own, the queue behind them doesn't.
            assert!(!outcome.contributors().is_empty(), "{mode:?}");
            assert!(outcome.failures().len() >= 2, "{mode:?}");
            assert!(
                outcome
                    .failures()
                    .iter()
                    .all(|(_, f)| matches!(f, SessionFailure::DeadlineExceeded { .. }))
            );
        }
    }

    #[test]
    fn test_sequential_deadline_excludes_the_tail() {
        let learners = (0..4)
            .map(|_| ScriptedLearner::new(1).with_delay(Duration::from_millis(40)))
            .collect();
        let mut sessions = sessions(learners);

        let dispatcher = Dispatcher::new(DispatchMode::Sequential, Some(Duration::from_millis(100)));
        let outcome = dispatcher.run_round(&mut sessions, &[0, 1, 2, 3]).unwrap();

        assert_eq!(outcome.contributors().first(), Some(&0));
        assert!(outcome.excluded().contains(&3));
        assert!(sessions[3].exported().is_none());
    }

    #[test]
    fn test_all_failed_yields_empty_outcome() {
        let learners = vec![
            ScriptedLearner::new(10).failing(),
            ScriptedLearner::new(20).failing(),
        ];
        let mut sessions = sessions(learners);

        let outcome = Dispatcher::new(DispatchMode::Sequential, None)
            .run_round(&mut sessions, &[0, 1])
            .unwrap();

        assert!(outcome.contributors().is_empty());
        assert_eq!(outcome.total_samples(), 0);
        assert_eq!(outcome.excluded(), [0, 1]);
    }

    #[test]
    fn test_invalid_selection_is_rejected() {
        let mut sessions = sessions((0..3).map(|_| ScriptedLearner::new(1)).collect());
        let dispatcher = Dispatcher::new(DispatchMode::Sequential, None);

        assert!(dispatcher.run_round(&mut sessions, &[2, 1]).is_err());
        assert!(dispatcher.run_round(&mut sessions, &[1, 1]).is_err());
        assert!(dispatcher.run_round(&mut sessions, &[0, 3]).is_err());
    }

    #[test]
    fn test_evaluate_round_reports_flags() {
        let learners = vec![
            ScriptedLearner::new(1),
            ScriptedLearner::new(1).failing(),
            ScriptedLearner::new(1),
        ];
        let mut sessions = sessions(learners);

        let flags = Dispatcher::new(concurrent(2), None)
            .evaluate_round(&mut sessions, &[0, 1, 2])
            .unwrap();
        assert_eq!(flags, [(0, true), (1, false), (2, true)]);
    }
}
