//! Trained model persistence.
//!
//! A trained GP is saved with everything needed to rebuild its regression model:
//! kernel hyperparameters, jitter, observation index points and observations.

use crate::errors::{GpError, Result};
use crate::index_points::IndexPoints;
use crate::kernels::Kernel;
use crate::prior::GpPrior;
use crate::regression::{GpPredictor, GpRegressionModel};

use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File format of a saved model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpFileFormat {
    /// Human readable format
    #[default]
    Json,
    /// Compact binary format
    Binary,
}

impl GpFileFormat {
    /// Name of the model file within a save directory
    pub fn file_name(&self) -> &'static str {
        match self {
            GpFileFormat::Json => "model.json",
            GpFileFormat::Binary => "model.bin",
        }
    }
}

impl fmt::Display for GpFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GpFileFormat::Json => write!(f, "json"),
            GpFileFormat::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for GpFileFormat {
    type Err = GpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(GpFileFormat::Json),
            "binary" | "bin" => Ok(GpFileFormat::Binary),
            _ => Err(GpError::InvalidValueError(format!(
                "Bad file format '{s}', should be json or binary"
            ))),
        }
    }
}

/// A trained GP as saved at the end of training
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedGp {
    pub(crate) kernel: Kernel,
    pub(crate) jitter: f64,
    pub(crate) index_points: IndexPoints,
    pub(crate) observations: Array1<f64>,
    pub(crate) step: u64,
    pub(crate) loss: Option<f64>,
}

impl SavedGp {
    /// Trained kernel
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Jitter added to covariance diagonals
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Observation index points
    pub fn index_points(&self) -> &IndexPoints {
        &self.index_points
    }

    /// Observations
    pub fn observations(&self) -> &Array1<f64> {
        &self.observations
    }

    /// Number of training steps executed before saving
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Training loss of the last step, `NaN` if never trained
    pub fn loss(&self) -> f64 {
        self.loss.unwrap_or(f64::NAN)
    }

    /// GP prior over observation index points
    pub fn prior(&self) -> Result<GpPrior> {
        GpPrior::new(
            self.index_points.clone(),
            self.observations.clone(),
            self.jitter,
        )
    }

    /// Save in `dir` (created if missing) using the given format.
    ///
    /// Returns the path of the model file.
    pub fn save<P: AsRef<Path>>(&self, dir: P, format: GpFileFormat) -> Result<PathBuf> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(format.file_name());
        let bytes = match format {
            GpFileFormat::Json => serde_json::to_vec(self).map_err(GpError::SaveJsonError)?,
            GpFileFormat::Binary => bincode::serialize(self).map_err(GpError::SaveBinaryError)?,
        };
        fs::write(&path, bytes)?;
        info!("Model saved to {}", path.display());
        Ok(path)
    }

    /// Load a model saved in `dir`, whatever its format
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<SavedGp> {
        for format in [GpFileFormat::Json, GpFileFormat::Binary] {
            let path = dir.as_ref().join(format.file_name());
            if path.exists() {
                return Self::load_file(path, format);
            }
        }
        Err(GpError::LoadError(format!(
            "no saved model found in {}",
            dir.as_ref().display()
        )))
    }

    /// Load a model from the given file
    pub fn load_file<P: AsRef<Path>>(path: P, format: GpFileFormat) -> Result<SavedGp> {
        let data = fs::read(path)?;
        let gp = match format {
            GpFileFormat::Json => serde_json::from_slice(&data)?,
            GpFileFormat::Binary => bincode::deserialize(&data)?,
        };
        Ok(gp)
    }
}

impl GpPredictor for SavedGp {
    fn get_model(&self, query: &IndexPoints) -> Result<GpRegressionModel> {
        self.prior()?.regression_model(&self.kernel, query)
    }
}
