use std::fmt;

/// The lifecycle of a `Coordinator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No model has been set up yet.
    Uninitialized,
    /// The global model is set up, waiting for clients to register.
    ModelReady,
    /// Clients are registered, `round` is the last executed (or resumed) round.
    Running { round: usize },
    /// The round budget is exhausted and the final model was broadcast.
    Finished,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::ModelReady => f.write_str("model ready"),
            Self::Running { round } => write!(f, "running (round {round})"),
            Self::Finished => f.write_str("finished"),
        }
    }
}
