use std::collections::{BTreeMap, btree_map};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::MismatchKind;

/// An ordered mapping from parameter keys to dense tensors of a fixed shape.
///
/// Keys are kept sorted, so iterating a state always visits the parameters in
/// the same order regardless of how the state was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    params: BTreeMap<String, ArrayD<f32>>,
}

impl GlobalState {
    /// Creates a new empty `GlobalState`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter tensor under `key`.
    ///
    /// # Arguments
    /// * `key` - The name of the parameter.
    /// * `tensor` - The value of the parameter.
    ///
    /// # Returns
    /// The previous tensor under that key, if any.
    pub fn insert(&mut self, key: impl Into<String>, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.params.insert(key.into(), tensor)
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.params.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ArrayD<f32>> {
        self.params.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArrayD<f32>> {
        self.params.iter()
    }

    /// Returns the amount of parameter tensors, not the amount of scalars.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the total amount of scalar parameters across all tensors.
    pub fn numel(&self) -> usize {
        self.params.values().map(ArrayD::len).sum()
    }

    /// Checks that `other` has exactly the same keys and shapes as this state.
    ///
    /// # Arguments
    /// * `other` - The state to check against this one.
    ///
    /// # Returns
    /// The first offending key and the kind of mismatch, if any.
    pub fn check_compatible(&self, other: &GlobalState) -> Result<(), (String, MismatchKind)> {
        for (key, tensor) in &self.params {
            let Some(theirs) = other.params.get(key) else {
                return Err((key.clone(), MismatchKind::MissingKey));
            };

            if tensor.shape() != theirs.shape() {
                let reason = MismatchKind::Shape {
                    expected: tensor.shape().to_vec(),
                    got: theirs.shape().to_vec(),
                };
                return Err((key.clone(), reason));
            }
        }

        if let Some(key) = other.params.keys().find(|k| !self.params.contains_key(*k)) {
            return Err((key.clone(), MismatchKind::UnexpectedKey));
        }

        Ok(())
    }
}

impl FromIterator<(String, ArrayD<f32>)> for GlobalState {
    fn from_iter<T: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: T) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for GlobalState {
    type Item = (String, ArrayD<f32>);
    type IntoIter = btree_map::IntoIter<String, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.into_iter()
    }
}

impl<'a> IntoIterator for &'a GlobalState {
    type Item = (&'a String, &'a ArrayD<f32>);
    type IntoIter = btree_map::Iter<'a, String, ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}
