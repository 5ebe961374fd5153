use ndarray::{Array1, Array2, Axis, concatenate};

use super::MetricReport;
use crate::{
    error::{FederationErr, Result},
    state::GlobalState,
};

/// A held out dataset the global model is evaluated on after every round.
pub trait HoldoutSet: Send {
    /// Evaluates the given global state on this set.
    ///
    /// # Arguments
    /// * `state` - The global model's parameters.
    ///
    /// # Returns
    /// The resulting metrics, or an `Evaluation` error.
    fn evaluate(&mut self, state: &GlobalState) -> Result<MetricReport>;
}

/// A batch of holdout samples.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub labels: Array1<usize>,
    pub metadata: Array2<usize>,
}

/// A `HoldoutSet` that runs the model over a batched loader and scores the
/// concatenated argmax predictions.
///
/// * `D` - Restarts the loader, producing the batches of one full pass.
/// * `F` - The forward pass, maps a state and an input batch to logits.
/// * `M` - Scores predictions against labels and metadata.
pub struct BatchedHoldout<D, F, M> {
    name: String,
    loader: D,
    forward: F,
    metric: M,
}

impl<D, F, M, I> BatchedHoldout<D, F, M>
where
    D: FnMut() -> I,
    I: Iterator<Item = Batch>,
    F: Fn(&GlobalState, &Array2<f32>) -> Array2<f32>,
    M: Fn(&Array1<usize>, &Array1<usize>, &Array2<usize>) -> MetricReport,
{
    /// Creates a new `BatchedHoldout`.
    ///
    /// # Arguments
    /// * `name` - The name of the holdout set, used in error messages.
    /// * `loader` - Produces a fresh pass over the batches each time it's called.
    /// * `forward` - The model's forward pass.
    /// * `metric` - The dataset's metric function.
    pub fn new(name: impl Into<String>, loader: D, forward: F, metric: M) -> Self {
        Self {
            name: name.into(),
            loader,
            forward,
            metric,
        }
    }

    fn evaluation_err(&self, reason: impl Into<String>) -> FederationErr {
        FederationErr::Evaluation {
            holdout: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl<D, F, M, I> HoldoutSet for BatchedHoldout<D, F, M>
where
    D: FnMut() -> I + Send,
    I: Iterator<Item = Batch>,
    F: Fn(&GlobalState, &Array2<f32>) -> Array2<f32> + Send,
    M: Fn(&Array1<usize>, &Array1<usize>, &Array2<usize>) -> MetricReport + Send,
{
    fn evaluate(&mut self, state: &GlobalState) -> Result<MetricReport> {
        let mut predictions = Vec::new();
        let mut labels = Vec::new();
        let mut metadata = Vec::new();

        for batch in (self.loader)() {
            let logits = (self.forward)(state, &batch.inputs);
            if logits.nrows() != batch.labels.len() {
                return Err(self.evaluation_err(format!(
                    "forward produced {} rows for a batch of {} labels",
                    logits.nrows(),
                    batch.labels.len()
                )));
            }

            predictions.push(argmax_rows(&logits));
            labels.push(batch.labels);
            metadata.push(batch.metadata);
        }

        if predictions.is_empty() {
            return Err(self.evaluation_err("loader produced no batches"));
        }

        let concat1 = |parts: &[Array1<usize>]| {
            let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
            concatenate(Axis(0), &views)
        };

        let predictions = concat1(&predictions).map_err(|e| self.evaluation_err(e.to_string()))?;
        let labels = concat1(&labels).map_err(|e| self.evaluation_err(e.to_string()))?;

        let views: Vec<_> = metadata.iter().map(|m| m.view()).collect();
        let metadata =
            concatenate(Axis(0), &views).map_err(|e| self.evaluation_err(e.to_string()))?;

        Ok((self.metric)(&predictions, &labels, &metadata))
    }
}

/// Returns the index of the largest value of every row, the first one on ties.
fn argmax_rows(logits: &Array2<f32>) -> Array1<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max { (i, v) } else { (best, max) }
                })
                .0
        })
        .collect()
}
