use serde::{Deserialize, Serialize};

use super::GlobalState;
use crate::error::MismatchKind;

/// Key reported when the presence of the auxiliary state differs between two snapshots.
const AUXILIARY_KEY: &str = "<auxiliary>";

/// The unit of transmission, aggregation and checkpointing.
///
/// Pairs the primary model state with the optional auxiliary sub-model so both
/// travel together, a receiver never observes one without the other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    primary: GlobalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auxiliary: Option<GlobalState>,
}

impl ModelSnapshot {
    /// Creates a new `ModelSnapshot` without an auxiliary state.
    ///
    /// # Arguments
    /// * `primary` - The primary model's state.
    pub fn new(primary: GlobalState) -> Self {
        Self {
            primary,
            auxiliary: None,
        }
    }

    /// Creates a new `ModelSnapshot` carrying an auxiliary state.
    ///
    /// # Arguments
    /// * `primary` - The primary model's state.
    /// * `auxiliary` - The auxiliary sub-model's state.
    pub fn with_auxiliary(primary: GlobalState, auxiliary: GlobalState) -> Self {
        Self {
            primary,
            auxiliary: Some(auxiliary),
        }
    }

    pub fn primary(&self) -> &GlobalState {
        &self.primary
    }

    pub fn auxiliary(&self) -> Option<&GlobalState> {
        self.auxiliary.as_ref()
    }

    pub fn has_auxiliary(&self) -> bool {
        self.auxiliary.is_some()
    }

    pub fn into_parts(self) -> (GlobalState, Option<GlobalState>) {
        (self.primary, self.auxiliary)
    }

    /// Checks that `other` matches this snapshot key by key and shape by shape,
    /// for the primary state and for the auxiliary state if any.
    ///
    /// # Arguments
    /// * `other` - The snapshot to check against this one.
    ///
    /// # Returns
    /// The first offending key and the kind of mismatch, if any.
    pub fn check_compatible(&self, other: &ModelSnapshot) -> Result<(), (String, MismatchKind)> {
        self.primary.check_compatible(&other.primary)?;

        match (&self.auxiliary, &other.auxiliary) {
            (Some(ours), Some(theirs)) => ours.check_compatible(theirs),
            (None, None) => Ok(()),
            (ours, _) => Err((
                AUXILIARY_KEY.to_string(),
                MismatchKind::AuxiliaryPresence {
                    expected: ours.is_some(),
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn state(key: &str, len: usize) -> GlobalState {
        [(key.to_string(), ArrayD::zeros(IxDyn(&[len])))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_auxiliary_presence_mismatch() {
        let dual = ModelSnapshot::with_auxiliary(state("w", 2), state("g", 3));
        let plain = ModelSnapshot::new(state("w", 2));

        let (key, reason) = dual.check_compatible(&plain).unwrap_err();
        assert_eq!(key, AUXILIARY_KEY);
        assert_eq!(reason, MismatchKind::AuxiliaryPresence { expected: true });

        let (_, reason) = plain.check_compatible(&dual).unwrap_err();
        assert_eq!(reason, MismatchKind::AuxiliaryPresence { expected: false });
    }

    #[test]
    fn test_auxiliary_shape_is_checked() {
        let a = ModelSnapshot::with_auxiliary(state("w", 2), state("g", 3));
        let b = ModelSnapshot::with_auxiliary(state("w", 2), state("g", 4));
        assert!(a.check_compatible(&b).is_err());
        assert!(a.check_compatible(&a.clone()).is_ok());
    }

    #[test]
    fn test_plain_snapshot_serializes_without_auxiliary() {
        let snapshot = ModelSnapshot::new(state("w", 1));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("auxiliary"));

        let back: ModelSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
