/// The optional phases a `Coordinator` runs on top of plain parameter averaging.
///
/// * `S` - The shared dataset handle type, the learner's `SharedData`.
#[derive(Debug, Clone)]
pub struct Capabilities<S> {
    auxiliary: bool,
    shared_dataset: Option<S>,
}

impl<S> Default for Capabilities<S> {
    fn default() -> Self {
        Self::plain()
    }
}

impl<S> Capabilities<S> {
    /// A single global state, averaged every round.
    pub fn plain() -> Self {
        Self {
            auxiliary: false,
            shared_dataset: None,
        }
    }

    /// Carries an auxiliary state through transmission and aggregation in
    /// lockstep with the primary one.
    pub fn dual_model() -> Self {
        Self {
            auxiliary: true,
            shared_dataset: None,
        }
    }

    /// Attaches a dataset handle to every client at registration.
    ///
    /// # Arguments
    /// * `shared` - The handle, each client receives a clone of it.
    pub fn with_shared_dataset(mut self, shared: S) -> Self {
        self.shared_dataset = Some(shared);
        self
    }

    pub fn has_auxiliary(&self) -> bool {
        self.auxiliary
    }

    pub fn shared_dataset(&self) -> Option<&S> {
        self.shared_dataset.as_ref()
    }
}
