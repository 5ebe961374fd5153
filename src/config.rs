use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::CheckpointWriter,
    error::{FederationErr, Result},
    execution::DispatchMode,
};

const DEFAULT_TRANSMIT_RETRIES: usize = 2;

fn default_transmit_retries() -> usize {
    DEFAULT_TRANSMIT_RETRIES
}

/// Where and under which name the per-round checkpoints are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    pub dataset_name: String,
    pub experiment_id: u32,
}

impl CheckpointConfig {
    pub fn writer(&self) -> CheckpointWriter {
        CheckpointWriter::new(&self.dir, &self.dataset_name, self.experiment_id)
    }
}

/// The coordinator's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The amount of rounds `fit` runs.
    pub num_rounds: usize,
    /// The fraction of clients sampled every round, in `(0, 1]`.
    pub fraction: f64,
    /// Whether per-client work runs on a worker pool.
    #[serde(default)]
    pub mp: bool,
    /// The worker pool size, defaults to the host's parallelism minus one.
    #[serde(default)]
    pub workers: Option<NonZeroUsize>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Local updates finishing later than this after the round's dispatch started
    /// are excluded from aggregation.
    #[serde(default)]
    pub round_deadline_ms: Option<u64>,
    #[serde(default = "default_transmit_retries")]
    pub transmit_retries: usize,
    /// Whether sampled clients evaluate their local model after updating it.
    #[serde(default)]
    pub evaluate_clients: bool,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

impl ServerConfig {
    /// Creates a new `ServerConfig` with sequential dispatch and no checkpoints.
    ///
    /// # Arguments
    /// * `num_rounds` - The amount of rounds to run.
    /// * `fraction` - The fraction of clients sampled every round.
    pub fn new(num_rounds: usize, fraction: f64) -> Self {
        Self {
            num_rounds,
            fraction,
            mp: false,
            workers: None,
            seed: None,
            round_deadline_ms: None,
            transmit_retries: DEFAULT_TRANSMIT_RETRIES,
            evaluate_clients: false,
            checkpoint: None,
        }
    }

    /// Loads and validates a `ServerConfig` from a JSON file.
    ///
    /// # Arguments
    /// * `path` - The path of the JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| FederationErr::config(format!("cannot read '{}': {e}", path.display())))?;

        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration's invariants.
    ///
    /// # Returns
    /// `InvalidConfiguration` naming the first violated one.
    pub fn validate(&self) -> Result<()> {
        if !(self.fraction > 0. && self.fraction <= 1.) {
            return Err(FederationErr::config(format!(
                "fraction must be in (0, 1], got {}",
                self.fraction
            )));
        }

        if self.num_rounds == 0 {
            return Err(FederationErr::config("num_rounds must be greater than 0"));
        }

        if self.round_deadline_ms == Some(0) {
            return Err(FederationErr::config(
                "round_deadline_ms must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Resolves how per-client work is executed.
    ///
    /// Without an explicit pool size, one unit of the host's parallelism is left
    /// to the coordinator thread.
    pub fn dispatch_mode(&self) -> DispatchMode {
        if !self.mp {
            return DispatchMode::Sequential;
        }

        let workers = self.workers.unwrap_or_else(|| {
            let available = thread::available_parallelism().map_or(1, NonZeroUsize::get);
            NonZeroUsize::new(available.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
        });

        DispatchMode::Concurrent { workers }
    }

    pub fn round_deadline(&self) -> Option<Duration> {
        self.round_deadline_ms.map(Duration::from_millis)
    }
}
