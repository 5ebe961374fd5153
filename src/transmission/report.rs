use crate::error::FederationErr;

/// The result of a transmission to a set of sessions.
#[derive(Debug, Default)]
pub struct TransmitReport {
    delivered: Vec<usize>,
    failures: Vec<(usize, FederationErr)>,
}

impl TransmitReport {
    pub(super) fn delivered_to(&mut self, index: usize) {
        self.delivered.push(index);
    }

    pub(super) fn failed(&mut self, index: usize, err: FederationErr) {
        self.failures.push((index, err));
    }

    /// The sessions that received the snapshot, in the order they were targeted.
    pub fn delivered(&self) -> &[usize] {
        &self.delivered
    }

    /// The sessions whose delivery failed, along with the reason.
    pub fn failures(&self) -> &[(usize, FederationErr)] {
        &self.failures
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(i, _)| *i).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
