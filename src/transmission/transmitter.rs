use log::{debug, warn};

use super::TransmitReport;
use crate::{
    error::FederationErr, learner::Learner, session::ClientSession, state::ModelSnapshot,
};

/// Copies the coordinator's global snapshot into client sessions.
///
/// Every session receives its own copy, a failed delivery is retried up to the
/// configured budget and never prevents delivery to the remaining sessions.
#[derive(Debug, Clone, Copy)]
pub struct Transmitter {
    retries: usize,
}

impl Transmitter {
    /// Creates a new `Transmitter`.
    ///
    /// # Arguments
    /// * `retries` - How many times a failed delivery is retried before giving up.
    pub fn new(retries: usize) -> Self {
        Self { retries }
    }

    /// Sends the snapshot to every registered session.
    ///
    /// # Arguments
    /// * `sessions` - All the registered sessions.
    /// * `snapshot` - The global snapshot to send.
    ///
    /// # Returns
    /// Which sessions received the snapshot and which didn't.
    pub fn broadcast<L: Learner>(
        &self,
        sessions: &mut [ClientSession<L>],
        snapshot: &ModelSnapshot,
    ) -> TransmitReport {
        let mut report = TransmitReport::default();

        for session in sessions.iter_mut() {
            let index = session.index();
            match self.deliver(session, snapshot) {
                Ok(()) => report.delivered_to(index),
                Err(e) => report.failed(index, e),
            }
        }

        debug!(
            "transmitted global state to {}/{} clients",
            report.delivered().len(),
            sessions.len()
        );
        report
    }

    /// Sends the snapshot only to the sessions at the given indices.
    ///
    /// # Arguments
    /// * `sessions` - All the registered sessions.
    /// * `targets` - The indices of the sessions to send to.
    /// * `snapshot` - The global snapshot to send.
    ///
    /// # Returns
    /// Which sessions received the snapshot and which didn't.
    pub fn transmit<L: Learner>(
        &self,
        sessions: &mut [ClientSession<L>],
        targets: &[usize],
        snapshot: &ModelSnapshot,
    ) -> TransmitReport {
        let mut report = TransmitReport::default();
        let nsessions = sessions.len();

        for &index in targets {
            let Some(session) = sessions.get_mut(index) else {
                let msg = format!("target {index} is out of range for {nsessions} sessions");
                report.failed(index, FederationErr::InvalidConfiguration(msg));
                continue;
            };

            match self.deliver(session, snapshot) {
                Ok(()) => report.delivered_to(index),
                Err(e) => report.failed(index, e),
            }
        }

        debug!(
            "transmitted global state to {}/{} selected clients",
            report.delivered().len(),
            targets.len()
        );
        report
    }

    /// Delivers the snapshot to a single session within the retry budget.
    fn deliver<L: Learner>(
        &self,
        session: &mut ClientSession<L>,
        snapshot: &ModelSnapshot,
    ) -> Result<(), FederationErr> {
        let attempts = self.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let Err(source) = session.receive_global_state(snapshot) else {
                return Ok(());
            };

            if attempt >= attempts {
                warn!(session = session.index(); "giving up delivery after {attempt} attempt(s): {source}");
                return Err(FederationErr::TransmissionFailure {
                    session: session.index(),
                    attempts: attempt,
                    source,
                });
            }

            debug!(session = session.index(); "delivery attempt {attempt} failed: {source}");
        }
    }
}
