//! Training checkpoints keyed by training step.
//!
//! A checkpoint directory holds at most one `ckpt-<step>.json` file: saving a new
//! checkpoint removes any previous one.

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::metrics::Metric;
use crate::optimization::AdamState;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const CHECKPOINT_PREFIX: &str = "ckpt-";
const CHECKPOINT_EXT: &str = "json";

/// Snapshot of every mutable trainer variable.
///
/// NaN values (loss or metrics not computed yet) are stored as `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    /// Number of training steps executed
    pub step: u64,
    /// Kernel family and hyperparameters
    pub kernel: Kernel,
    /// Training loss of the last step
    pub loss: Option<f64>,
    /// Last values of validation scalar metrics
    pub metrics: BTreeMap<Metric, Option<f64>>,
    /// Optimizer moments and iteration count
    pub optimizer: AdamState,
    /// Number of observations the trainer was built with
    pub n_obs: usize,
    /// Feature dimensionality of observation index points
    pub feature_ndims: usize,
}

impl TrainerCheckpoint {
    /// Check the checkpoint can be restored into a trainer
    /// with given observation count, feature dimensionality and kernel
    pub fn check_compatible(
        &self,
        n_obs: usize,
        feature_ndims: usize,
        kernel: &Kernel,
    ) -> Result<()> {
        if self.n_obs != n_obs || self.feature_ndims != feature_ndims {
            return Err(GpError::CheckpointError(format!(
                "checkpoint at step {} was saved for {} observations with {} features, \
                 got {} observations with {} features",
                self.step, self.n_obs, self.feature_ndims, n_obs, feature_ndims
            )));
        }
        if self.kernel.kind != kernel.kind {
            return Err(GpError::CheckpointError(format!(
                "checkpoint at step {} uses {} kernel, trainer uses {}",
                self.step, self.kernel.kind, kernel.kind
            )));
        }
        if self.optimizer.m.len() != 2 || self.optimizer.v.len() != 2 {
            return Err(GpError::CheckpointError(format!(
                "checkpoint at step {} holds optimizer state for {} parameters",
                self.step,
                self.optimizer.m.len()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum CheckpointState {
    Empty,
    Saved { step: u64, path: PathBuf },
}

/// Keeps the latest checkpoint of a training run in a directory
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    directory: PathBuf,
    state: CheckpointState,
}

impl CheckpointManager {
    /// Manage checkpoints in `directory`, created if missing.
    ///
    /// The latest checkpoint already there, if any, becomes the managed one.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        let state = match Self::scan(&directory)?.into_iter().max() {
            Some((step, path)) => CheckpointState::Saved { step, path },
            None => CheckpointState::Empty,
        };
        Ok(CheckpointManager { directory, state })
    }

    /// Checkpoint directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the latest checkpoint if any
    pub fn latest_checkpoint(&self) -> Option<&Path> {
        match &self.state {
            CheckpointState::Empty => None,
            CheckpointState::Saved { path, .. } => Some(path),
        }
    }

    /// Step of the latest checkpoint if any
    pub fn latest_step(&self) -> Option<u64> {
        match self.state {
            CheckpointState::Empty => None,
            CheckpointState::Saved { step, .. } => Some(step),
        }
    }

    /// Load the latest checkpoint, `None` if there is none
    pub fn restore(&self) -> Result<Option<TrainerCheckpoint>> {
        let Some(path) = self.latest_checkpoint() else {
            return Ok(None);
        };
        let data = fs::read(path)?;
        let ckpt: TrainerCheckpoint = serde_json::from_slice(&data).map_err(|e| {
            GpError::CheckpointError(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Some(ckpt))
    }

    /// Save `ckpt` as the latest checkpoint and remove previous ones
    pub fn save(&mut self, ckpt: &TrainerCheckpoint) -> Result<PathBuf> {
        let path = self.checkpoint_path(ckpt.step);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(ckpt)?)?;
        fs::rename(&tmp, &path)?;

        for (step, old) in Self::scan(&self.directory)? {
            if old != path {
                debug!("Remove checkpoint at step {step}");
                fs::remove_file(old)?;
            }
        }
        info!("Checkpoint saved at step {}: {}", ckpt.step, path.display());
        self.state = CheckpointState::Saved {
            step: ckpt.step,
            path: path.clone(),
        };
        Ok(path)
    }

    fn checkpoint_path(&self, step: u64) -> PathBuf {
        self.directory
            .join(format!("{CHECKPOINT_PREFIX}{step}.{CHECKPOINT_EXT}"))
    }

    /// Checkpoint files found in `directory` with their step
    fn scan(directory: &Path) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = vec![];
        for entry in fs::read_dir(directory)? {
            let path = entry?.path();
            let step = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|name| name.strip_suffix(CHECKPOINT_EXT))
                .and_then(|name| name.strip_suffix('.'))
                .and_then(|step| step.parse::<u64>().ok());
            if let Some(step) = step {
                found.push((step, path));
            }
        }
        Ok(found)
    }
}
