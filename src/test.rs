#![cfg(test)]

use std::{thread, time::Duration};

use ndarray::{ArrayD, IxDyn};

use crate::{
    learner::{Learner, LearnerErr},
    state::{GlobalState, ModelSnapshot},
};

/// Builds a state of flat tensors.
pub fn state(entries: &[(&str, &[f32])]) -> GlobalState {
    entries
        .iter()
        .map(|(key, values)| {
            let tensor = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
                .expect("flat shape always matches");
            (key.to_string(), tensor)
        })
        .collect()
}

/// Builds a snapshot without auxiliary state.
pub fn snapshot(entries: &[(&str, &[f32])]) -> ModelSnapshot {
    ModelSnapshot::new(state(entries))
}

/// A learner whose behaviour is fully scripted by the test.
///
/// A local update adds `shift` to every parameter of every state it holds.
pub struct ScriptedLearner {
    samples: usize,
    params: ModelSnapshot,
    shift: f32,
    updates: usize,
    fail_updates_from: Option<usize>,
    failing_deliveries: usize,
    delay: Option<Duration>,
    export: Option<ModelSnapshot>,
    pub shared: Option<String>,
    pub deliveries: usize,
}

impl ScriptedLearner {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            params: ModelSnapshot::default(),
            shift: 0.,
            updates: 0,
            fail_updates_from: None,
            failing_deliveries: 0,
            delay: None,
            export: None,
            shared: None,
            deliveries: 0,
        }
    }

    pub fn with_shift(mut self, shift: f32) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every local update after the first `n` fail.
    pub fn fail_updates_from(&mut self, n: usize) {
        self.fail_updates_from = Some(n);
    }

    pub fn failing(mut self) -> Self {
        self.fail_updates_from = Some(0);
        self
    }

    /// Makes the next `n` deliveries fail.
    pub fn failing_deliveries(mut self, n: usize) -> Self {
        self.failing_deliveries = n;
        self
    }

    /// Makes every export return `params` instead of the learner's parameters.
    pub fn with_export(mut self, params: ModelSnapshot) -> Self {
        self.export = Some(params);
        self
    }
}

fn shifted(state: &GlobalState, shift: f32) -> GlobalState {
    state
        .iter()
        .map(|(k, v)| (k.clone(), v.mapv(|x| x + shift)))
        .collect()
}

impl Learner for ScriptedLearner {
    type SharedData = String;

    fn setup(&mut self, blueprint: ModelSnapshot) {
        self.params = blueprint;
    }

    fn attach_shared_dataset(&mut self, shared: String) {
        self.shared = Some(shared);
    }

    fn receive_state(&mut self, snapshot: &ModelSnapshot) -> Result<(), LearnerErr> {
        if self.failing_deliveries > 0 {
            self.failing_deliveries -= 1;
            return Err(LearnerErr::new("link down"));
        }

        self.deliveries += 1;
        self.params = snapshot.clone();
        Ok(())
    }

    fn local_update(&mut self) -> Result<(), LearnerErr> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        if self.fail_updates_from.is_some_and(|n| self.updates >= n) {
            return Err(LearnerErr::new("diverged"));
        }

        self.updates += 1;
        let primary = shifted(self.params.primary(), self.shift);
        self.params = match self.params.auxiliary() {
            Some(aux) => ModelSnapshot::with_auxiliary(primary, shifted(aux, self.shift)),
            None => ModelSnapshot::new(primary),
        };
        Ok(())
    }

    fn export_state(&self) -> ModelSnapshot {
        self.export.clone().unwrap_or_else(|| self.params.clone())
    }

    fn evaluate_locally(&mut self) -> bool {
        self.fail_updates_from.is_none()
    }

    fn sample_count(&self) -> usize {
        self.samples
    }
}
