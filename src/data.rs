use crate::ScalingArgs;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::read_npy;
use ssegp_gp::{FeatureScaler, IndexPoints, convert_index_points};
use std::fs;
use std::path::Path;

/// Read a `(N, D)` array of feature vectors
pub(crate) fn read_features<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    read_npy(path).with_context(|| format!("cannot read features from {}", path.display()))
}

/// Read a `(N,)` array of targets
pub(crate) fn read_targets<P: AsRef<Path>>(path: P) -> Result<Array1<f64>> {
    let path = path.as_ref();
    read_npy(path).with_context(|| format!("cannot read targets from {}", path.display()))
}

/// Read features, scale them and convert them to index points
pub(crate) fn read_index_points<P: AsRef<Path>>(
    path: P,
    scaler: &FeatureScaler,
) -> Result<IndexPoints> {
    let features = read_features(path)?;
    Ok(convert_index_points(&scaler.transform(&features))?)
}

/// Scaling factor given on the command line or read from a file, if any
pub(crate) fn scaling_factor(args: &ScalingArgs) -> Result<Option<f64>> {
    match (&args.scaling_factor, &args.scaling_file) {
        (Some(factor), _) => Ok(Some(*factor)),
        (None, Some(path)) => Ok(Some(read_scaling_file(path)?)),
        (None, None) => Ok(None),
    }
}

/// Scaler for held-out features: the factor has to be supplied
pub(crate) fn supplied_scaler(args: &ScalingArgs) -> Result<FeatureScaler> {
    let factor = scaling_factor(args)?;
    Ok(FeatureScaler::fit_or_supplied(None::<&Array2<f64>>, factor)?)
}

pub(crate) fn read_scaling_file<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read scaling factor from {}", path.display()))?;
    text.trim()
        .parse()
        .with_context(|| format!("bad scaling factor in {}", path.display()))
}

pub(crate) fn write_scaling_file<P: AsRef<Path>>(path: P, scaler: &FeatureScaler) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, scaler.factor().to_string())
        .with_context(|| format!("cannot write scaling factor to {}", path.display()))
}
