use std::{error::Error, fmt};

use crate::state::ModelSnapshot;

/// Error returned by a `Learner` whenever one of its operations can't be carried out.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerErr(String);

impl LearnerErr {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for LearnerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for LearnerErr {}

/// The per-client training capability driven by the coordinator.
///
/// The optimizer, the model architecture and the client's private data all
/// live behind this trait, the coordinator only moves parameter snapshots in
/// and out of it.
pub trait Learner: Send {
    /// Handle to a dataset shared by every client in the shared-dataset variant.
    type SharedData: Clone + Send;

    /// Installs the model blueprint, a value the learner owns from now on.
    ///
    /// # Arguments
    /// * `blueprint` - An independent copy of the coordinator's model structure.
    fn setup(&mut self, blueprint: ModelSnapshot);

    /// Attaches the shared dataset handle, only called in the shared-dataset variant.
    fn attach_shared_dataset(&mut self, _shared: Self::SharedData) {}

    /// Overwrites the learner's parameters with the received snapshot.
    ///
    /// # Arguments
    /// * `snapshot` - The global state, paired with the auxiliary state in dual-model runs.
    ///
    /// # Returns
    /// An error if the delivery failed, it may be retried.
    fn receive_state(&mut self, snapshot: &ModelSnapshot) -> Result<(), LearnerErr>;

    /// Runs the private optimization step(s) on the learner's local data.
    fn local_update(&mut self) -> Result<(), LearnerErr>;

    /// Exports the learner's current parameters.
    fn export_state(&self) -> ModelSnapshot;

    /// Evaluates the local model on the learner's own data.
    ///
    /// # Returns
    /// Whether the evaluation succeeded.
    fn evaluate_locally(&mut self) -> bool;

    /// Returns the amount of local samples, used as this client's aggregation weight.
    fn sample_count(&self) -> usize;
}
