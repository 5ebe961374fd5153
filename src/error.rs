use std::{error::Error, fmt, io, path::PathBuf};

use crate::learner::LearnerErr;

/// The crate's result type.
pub type Result<T> = std::result::Result<T, FederationErr>;

/// What made two parameter states incompatible.
#[derive(Debug, Clone, PartialEq)]
pub enum MismatchKind {
    /// The key exists in the global state but not in the session's export.
    MissingKey,
    /// The session exported a key the global state doesn't know about.
    UnexpectedKey,
    /// Both sides hold the key but with different tensor shapes.
    Shape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// The session exported (or omitted) an auxiliary state the coordinator doesn't carry.
    AuxiliaryPresence { expected: bool },
    /// The session has no exported state to contribute.
    NoExport,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => f.write_str("missing key"),
            Self::UnexpectedKey => f.write_str("unexpected key"),
            Self::Shape { expected, got } => {
                write!(f, "shape mismatch: expected {expected:?}, got {got:?}")
            }
            Self::AuxiliaryPresence { expected: true } => {
                f.write_str("auxiliary state expected but missing")
            }
            Self::AuxiliaryPresence { expected: false } => {
                f.write_str("auxiliary state present but not expected")
            }
            Self::NoExport => f.write_str("no exported state"),
        }
    }
}

/// All errors that can occur while coordinating a federation.
#[derive(Debug)]
pub enum FederationErr {
    /// Invalid configuration or a protocol step called out of order, caught before training.
    InvalidConfiguration(String),
    /// A session's local update failed.
    Training { session: usize, source: LearnerErr },
    /// A session's exported state can't be blended with the global state.
    StateShapeMismatch {
        session: usize,
        key: String,
        reason: MismatchKind,
    },
    /// Delivering the global state to a session failed after exhausting its retries.
    TransmissionFailure {
        session: usize,
        attempts: usize,
        source: LearnerErr,
    },
    /// Every sampled session of a round failed, nothing is left to aggregate.
    RoundAggregationImpossible { round: usize, excluded: Vec<usize> },
    /// Reading or writing a checkpoint file failed.
    Checkpoint { path: PathBuf, source: io::Error },
    /// A checkpoint or configuration file couldn't be (de)serialized.
    Serialization(serde_json::Error),
    /// A holdout evaluation couldn't be carried out.
    Evaluation { holdout: String, reason: String },
}

impl fmt::Display for FederationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Training { session, source } => {
                write!(f, "local update of session {session} failed: {source}")
            }
            Self::StateShapeMismatch {
                session,
                key,
                reason,
            } => write!(f, "state of session {session} mismatches at '{key}': {reason}"),
            Self::TransmissionFailure {
                session,
                attempts,
                source,
            } => write!(
                f,
                "transmission to session {session} failed after {attempts} attempt(s): {source}"
            ),
            Self::RoundAggregationImpossible { round, excluded } => write!(
                f,
                "round {round} can't be aggregated, every sampled session failed: {excluded:?}"
            ),
            Self::Checkpoint { path, source } => {
                write!(f, "checkpoint io error at {}: {source}", path.display())
            }
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Evaluation { holdout, reason } => {
                write!(f, "evaluation on '{holdout}' failed: {reason}")
            }
        }
    }
}

impl Error for FederationErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Training { source, .. } | Self::TransmissionFailure { source, .. } => {
                Some(source)
            }
            Self::Checkpoint { source, .. } => Some(source),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FederationErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl FederationErr {
    /// Shorthand for building an `InvalidConfiguration` error.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}
