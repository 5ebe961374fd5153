use std::{env, path::Path};

use federated_orchestration::{
    Capabilities, ClientSession, Coordinator, GlobalState, Learner, LearnerErr, ModelSnapshot,
    ServerConfig,
    evaluation::{Batch, BatchedHoldout, HoldoutSet, MetricReport},
};
use log::info;
use ndarray::{Array, Array1, Array2, ArrayD, Axis, Dimension, Ix1, Ix2, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};

const CLIENTS: usize = 8;
const CLASSES: usize = 2;
const FEATURES: usize = 2;

/// A softmax regression trained with plain gradient descent on a private point cloud.
struct ToyLearner {
    inputs: Array2<f32>,
    labels: Array1<usize>,
    params: ModelSnapshot,
    lr: f32,
    steps: usize,
}

impl ToyLearner {
    fn new(inputs: Array2<f32>, labels: Array1<usize>) -> Self {
        Self {
            inputs,
            labels,
            params: ModelSnapshot::default(),
            lr: 0.5,
            steps: 5,
        }
    }

    fn param<D: Dimension>(&self, key: &str) -> Result<Array<f32, D>, LearnerErr> {
        self.params
            .primary()
            .get(key)
            .ok_or_else(|| LearnerErr::new(format!("missing parameter '{key}'")))?
            .clone()
            .into_dimensionality::<D>()
            .map_err(|e| LearnerErr::new(e.to_string()))
    }
}

impl Learner for ToyLearner {
    type SharedData = ();

    fn setup(&mut self, blueprint: ModelSnapshot) {
        self.params = blueprint;
    }

    fn receive_state(&mut self, snapshot: &ModelSnapshot) -> Result<(), LearnerErr> {
        self.params = snapshot.clone();
        Ok(())
    }

    fn local_update(&mut self) -> Result<(), LearnerErr> {
        let mut w = self.param::<Ix2>("w")?;
        let mut b = self.param::<Ix1>("b")?;
        let n = self.labels.len() as f32;

        for _ in 0..self.steps {
            let mut grad = softmax(self.inputs.dot(&w) + &b);
            for (mut row, &label) in grad.rows_mut().into_iter().zip(&self.labels) {
                row[label] -= 1.;
            }
            grad.mapv_inplace(|g| g / n);

            w.scaled_add(-self.lr, &self.inputs.t().dot(&grad));
            b.scaled_add(-self.lr, &grad.sum_axis(Axis(0)));
        }

        self.params = ModelSnapshot::new(GlobalState::from_iter([
            ("w".to_string(), w.into_dyn()),
            ("b".to_string(), b.into_dyn()),
        ]));
        Ok(())
    }

    fn export_state(&self) -> ModelSnapshot {
        self.params.clone()
    }

    fn evaluate_locally(&mut self) -> bool {
        self.param::<Ix2>("w").is_ok()
    }

    fn sample_count(&self) -> usize {
        self.labels.len()
    }
}

fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

fn forward(state: &GlobalState, inputs: &Array2<f32>) -> Array2<f32> {
    let w = state
        .get("w")
        .and_then(|w| w.view().into_dimensionality::<Ix2>().ok());
    let b = state
        .get("b")
        .and_then(|b| b.view().into_dimensionality::<Ix1>().ok());

    match (w, b) {
        (Some(w), Some(b)) => inputs.dot(&w) + &b,
        _ => Array2::zeros((inputs.nrows(), CLASSES)),
    }
}

/// Average accuracy and worst group accuracy, groups are read from the first metadata column.
fn accuracy(preds: &Array1<usize>, labels: &Array1<usize>, metadata: &Array2<usize>) -> MetricReport {
    let groups = metadata.column(0);
    let ngroups = groups.iter().max().map_or(0, |g| g + 1);
    let mut hits = vec![0usize; ngroups];
    let mut totals = vec![0usize; ngroups];

    for ((p, l), &g) in preds.iter().zip(labels).zip(groups) {
        totals[g] += 1;
        if p == l {
            hits[g] += 1;
        }
    }

    let correct: usize = hits.iter().sum();
    let avg = correct as f64 / labels.len().max(1) as f64;
    let worst = hits
        .iter()
        .zip(&totals)
        .filter(|(_, t)| **t > 0)
        .map(|(h, t)| *h as f64 / *t as f64)
        .fold(1., f64::min);

    MetricReport::new(
        vec![("acc_avg".into(), avg), ("acc_wg".into(), worst)],
        format!("{correct}/{} correct", labels.len()),
    )
}

/// Draws `n` points from two gaussian-ish blobs displaced by `shift`.
fn point_cloud(rng: &mut StdRng, n: usize, shift: f32) -> (Array2<f32>, Array1<usize>) {
    let labels: Array1<usize> = (0..n).map(|_| rng.random_range(0..CLASSES)).collect();
    let inputs = Array2::from_shape_fn((n, FEATURES), |(i, _)| {
        let center: f32 = if labels[i] == 0 { -1. } else { 1. };
        center + shift + rng.random_range(-0.8f32..0.8)
    });
    (inputs, labels)
}

fn default_config() -> ServerConfig {
    let mut config = ServerConfig::new(10, 0.5);
    config.mp = true;
    config.seed = Some(0);
    config
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => ServerConfig::from_json_file(Path::new(&path))?,
        None => default_config(),
    };
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or_default());

    let blueprint = ModelSnapshot::new(GlobalState::from_iter([
        ("w".to_string(), ArrayD::zeros(IxDyn(&[FEATURES, CLASSES]))),
        ("b".to_string(), ArrayD::zeros(IxDyn(&[CLASSES]))),
    ]));

    let mut coordinator: Coordinator<ToyLearner> = Coordinator::new(config, Capabilities::plain())?;
    coordinator.setup_model(blueprint, None)?;

    let sessions = (0..CLIENTS)
        .map(|i| {
            let shift = (i as f32 - CLIENTS as f32 / 2.) * 0.05;
            let (inputs, labels) = point_cloud(&mut rng, 20 + 10 * i, shift);
            ClientSession::new(format!("client{i}"), ToyLearner::new(inputs, labels))
        })
        .collect();
    coordinator.register_clients(sessions)?;

    let batches: Vec<_> = (0..4)
        .map(|_| {
            let (inputs, labels) = point_cloud(&mut rng, 32, 0.);
            let metadata = labels.clone().insert_axis(Axis(1));
            Batch {
                inputs,
                labels,
                metadata,
            }
        })
        .collect();
    let holdout = BatchedHoldout::new("holdout", move || batches.clone().into_iter(), forward, accuracy);
    coordinator.register_holdouts([("holdout".to_string(), Box::new(holdout) as Box<dyn HoldoutSet>)]);

    coordinator.fit()?;

    let failed = coordinator.history().iter().filter(|r| !r.is_aggregated()).count();
    info!(
        "finished after round {:03}, {failed} round(s) skipped",
        coordinator.round()
    );

    Ok(())
}
