use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use tempfile::NamedTempFile;

use crate::{
    error::{FederationErr, Result},
    state::ModelSnapshot,
};

/// Writes one checkpoint of the global snapshot per round.
///
/// Files are named `{dataset}_{client_set}_{experiment:04}_{round}.json`.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    dataset_name: String,
    experiment_id: u32,
}

impl CheckpointWriter {
    /// Creates a new `CheckpointWriter`.
    ///
    /// # Arguments
    /// * `dir` - The directory the checkpoints are written into.
    /// * `dataset_name` - The name of the dataset being trained on.
    /// * `experiment_id` - The id of this experiment.
    pub fn new(dir: impl Into<PathBuf>, dataset_name: impl Into<String>, experiment_id: u32) -> Self {
        Self {
            dir: dir.into(),
            dataset_name: dataset_name.into(),
            experiment_id,
        }
    }

    /// Returns where the checkpoint of a given round is written.
    ///
    /// # Arguments
    /// * `client_set` - The name of the registered client set.
    /// * `round` - The round number.
    pub fn path_for(&self, client_set: &str, round: usize) -> PathBuf {
        let file = format!(
            "{}_{}_{:04}_{}.json",
            self.dataset_name, client_set, self.experiment_id, round
        );
        self.dir.join(file)
    }

    /// Persists the snapshot of a round, creating the directory if needed.
    ///
    /// The snapshot is written to a temporary file next to the checkpoint and
    /// only renamed into place once fully flushed, a failed write never leaves a
    /// partial checkpoint behind.
    ///
    /// # Arguments
    /// * `client_set` - The name of the registered client set.
    /// * `round` - The round number.
    /// * `snapshot` - The global snapshot, including the auxiliary state if any.
    ///
    /// # Returns
    /// The path of the written file.
    pub fn save(&self, client_set: &str, round: usize, snapshot: &ModelSnapshot) -> Result<PathBuf> {
        let path = self.path_for(client_set, round);
        let io_err = |source| FederationErr::Checkpoint {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;

        let mut writer = BufWriter::new(tmp);
        serde_json::to_writer(&mut writer, snapshot)?;
        writer.flush().map_err(io_err)?;

        let tmp = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!("checkpoint written to {}", path.display());
        Ok(path)
    }
}

/// Loads a snapshot previously written by a `CheckpointWriter`.
///
/// # Arguments
/// * `path` - The checkpoint file.
pub fn load(path: &Path) -> Result<ModelSnapshot> {
    let file = File::open(path).map_err(|source| FederationErr::Checkpoint {
        path: path.to_path_buf(),
        source,
    })?;

    let snapshot = serde_json::from_reader(BufReader::new(file))?;
    Ok(snapshot)
}
