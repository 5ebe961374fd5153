#![allow(dead_code)]

use std::{thread, time::Duration};

use federated_orchestration::{
    ClientSession, GlobalState, Learner, LearnerErr, ModelSnapshot,
};
use ndarray::{ArrayD, IxDyn};

/// Builds a state of flat tensors.
pub fn flat(entries: &[(&str, &[f32])]) -> GlobalState {
    entries
        .iter()
        .map(|(key, values)| {
            let tensor = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap();
            (key.to_string(), tensor)
        })
        .collect()
}

/// Returns the values of a flat tensor.
pub fn values(state: &GlobalState, key: &str) -> Vec<f32> {
    state.get(key).unwrap().iter().copied().collect()
}

/// Wraps learners into sessions named `{prefix}{i}`.
pub fn sessions(prefix: &str, learners: Vec<MockLearner>) -> Vec<ClientSession<MockLearner>> {
    learners
        .into_iter()
        .enumerate()
        .map(|(i, learner)| ClientSession::new(format!("{prefix}{i}"), learner))
        .collect()
}

/// An in-memory learner whose local update is a fixed transformation.
///
/// With a target every parameter is set to it, otherwise `shift` is added.
pub struct MockLearner {
    samples: usize,
    params: ModelSnapshot,
    shift: f32,
    target: Option<f32>,
    fail: bool,
    delay: Option<Duration>,
    refused_deliveries: usize,
    pub shared: Option<String>,
}

impl MockLearner {
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            params: ModelSnapshot::default(),
            shift: 0.,
            target: None,
            fail: false,
            delay: None,
            refused_deliveries: 0,
            shared: None,
        }
    }

    pub fn shifting(mut self, shift: f32) -> Self {
        self.shift = shift;
        self
    }

    pub fn converging_to(mut self, target: f32) -> Self {
        self.target = Some(target);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refusing_deliveries(mut self, n: usize) -> Self {
        self.refused_deliveries = n;
        self
    }

    fn updated(&self, state: &GlobalState) -> GlobalState {
        state
            .iter()
            .map(|(key, tensor)| {
                let tensor = match self.target {
                    Some(target) => tensor.mapv(|_| target),
                    None => tensor.mapv(|x| x + self.shift),
                };
                (key.clone(), tensor)
            })
            .collect()
    }
}

impl Learner for MockLearner {
    type SharedData = String;

    fn setup(&mut self, blueprint: ModelSnapshot) {
        self.params = blueprint;
    }

    fn attach_shared_dataset(&mut self, shared: String) {
        self.shared = Some(shared);
    }

    fn receive_state(&mut self, snapshot: &ModelSnapshot) -> Result<(), LearnerErr> {
        if self.refused_deliveries > 0 {
            self.refused_deliveries -= 1;
            return Err(LearnerErr::new("connection reset"));
        }

        self.params = snapshot.clone();
        Ok(())
    }

    fn local_update(&mut self) -> Result<(), LearnerErr> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        if self.fail {
            return Err(LearnerErr::new("loss is nan"));
        }

        let primary = self.updated(self.params.primary());
        self.params = match self.params.auxiliary() {
            Some(aux) => ModelSnapshot::with_auxiliary(primary, self.updated(aux)),
            None => ModelSnapshot::new(primary),
        };
        Ok(())
    }

    fn export_state(&self) -> ModelSnapshot {
        self.params.clone()
    }

    fn evaluate_locally(&mut self) -> bool {
        !self.fail
    }

    fn sample_count(&self) -> usize {
        self.samples
    }
}
