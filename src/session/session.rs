use log::debug;

use crate::{
    learner::{Learner, LearnerErr},
    state::ModelSnapshot,
};

/// The coordinator-side handle of one participating client across rounds.
pub struct ClientSession<L: Learner> {
    index: usize,
    name: String,
    sample_count: usize,
    learner: L,
    exported: Option<ModelSnapshot>,
}

impl<L: Learner> ClientSession<L> {
    /// Creates a new `ClientSession`.
    ///
    /// The sample count is read from the learner once and stays fixed from then on.
    ///
    /// # Arguments
    /// * `name` - A human readable name of the client.
    /// * `learner` - The client's learner, owned by this session.
    pub fn new(name: impl Into<String>, learner: L) -> Self {
        let sample_count = learner.sample_count();

        Self {
            index: 0,
            name: name.into(),
            sample_count,
            learner,
            exported: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    /// Binds the session to its position in the coordinator's registry.
    pub(crate) fn bind(&mut self, index: usize) {
        self.index = index;
    }

    /// Installs an independent copy of the model blueprint in the learner.
    pub(crate) fn setup(&mut self, blueprint: ModelSnapshot) {
        self.learner.setup(blueprint);
    }

    pub(crate) fn attach_shared_dataset(&mut self, shared: L::SharedData) {
        self.learner.attach_shared_dataset(shared);
    }

    /// Overwrites the learner's parameters with the given snapshot.
    ///
    /// # Arguments
    /// * `snapshot` - The global snapshot to install.
    ///
    /// # Returns
    /// The learner's error if the delivery failed.
    pub fn receive_global_state(&mut self, snapshot: &ModelSnapshot) -> Result<(), LearnerErr> {
        self.learner.receive_state(snapshot)
    }

    /// Runs the learner's local update and keeps a copy of the resulting parameters.
    ///
    /// A failed update clears the previous export so stale parameters are
    /// never aggregated by mistake.
    ///
    /// # Returns
    /// The learner's error if the update failed.
    pub fn run_local_update(&mut self) -> Result<(), LearnerErr> {
        self.exported = None;
        self.learner.local_update()?;
        self.exported = Some(self.learner.export_state());
        debug!(session = self.index; "local update finished");
        Ok(())
    }

    /// Exports the learner's current parameters.
    pub fn export_state(&self) -> ModelSnapshot {
        self.learner.export_state()
    }

    /// Returns the parameters exported by the last successful local update.
    pub fn exported(&self) -> Option<&ModelSnapshot> {
        self.exported.as_ref()
    }

    /// Drops the export of the last local update, excluding it from aggregation.
    pub(crate) fn discard_export(&mut self) {
        self.exported = None;
    }

    pub fn evaluate_locally(&mut self) -> bool {
        self.learner.evaluate_locally()
    }
}
