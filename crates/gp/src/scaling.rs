use crate::errors::{GpError, Result};

use ndarray::{Array2, ArrayBase, Data, Ix2};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

/// Global feature scaling: every feature vector is divided by a single factor,
/// the greatest absolute feature value over the training set.
///
/// The factor is computed once on training features and reused unchanged
/// on held-out features.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    factor: f64,
}

impl FeatureScaler {
    /// Scaler with a known factor
    pub fn new(factor: f64) -> Result<Self> {
        if !(factor.is_finite() && factor > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "scaling factor should be finite and positive, got {factor}"
            )));
        }
        Ok(FeatureScaler { factor })
    }

    /// Scaler fitted on training features
    pub fn fit(features: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Self> {
        let abs = features.mapv(f64::abs);
        let factor = *abs.max().map_err(|e| {
            GpError::InvalidValueError(format!("cannot compute scaling factor: {e}"))
        })?;
        Self::new(factor)
    }

    /// Scaler from exactly one of training features or a known factor
    pub fn fit_or_supplied(
        features: Option<&ArrayBase<impl Data<Elem = f64>, Ix2>>,
        factor: Option<f64>,
    ) -> Result<Self> {
        match (features, factor) {
            (Some(features), None) => Self::fit(features),
            (None, Some(factor)) => Self::new(factor),
            (None, None) => Err(GpError::InvalidValueError(
                "Must supply a scaling factor if training data is not supplied.".to_string(),
            )),
            (Some(_), Some(_)) => Err(GpError::InvalidValueError(
                "Supply only one of training data and scaling factor.".to_string(),
            )),
        }
    }

    /// Scaling factor
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Scaled copy of `features`
    pub fn transform(&self, features: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        features.mapv(|v| v / self.factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_fit_and_transform() {
        let train = array![[1., -4.], [2., 3.]];
        let scaler = FeatureScaler::fit(&train).unwrap();
        assert_eq!(4., scaler.factor());
        assert_abs_diff_eq!(array![[0.25, -1.], [0.5, 0.75]], scaler.transform(&train));
        // Held-out data may exceed the training range
        assert_abs_diff_eq!(array![[2., 0.]], scaler.transform(&array![[8., 0.]]));
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(FeatureScaler::fit(&Array2::<f64>::zeros((3, 2))).is_err());
        assert!(FeatureScaler::fit(&Array2::<f64>::zeros((0, 2))).is_err());
        assert!(FeatureScaler::fit(&array![[1., f64::NAN]]).is_err());
    }

    #[test]
    fn test_fit_or_supplied() {
        let train = array![[1., 2.]];
        assert_eq!(
            2.,
            FeatureScaler::fit_or_supplied(Some(&train), None)
                .unwrap()
                .factor()
        );
        assert_eq!(
            5.,
            FeatureScaler::fit_or_supplied(None::<&Array2<f64>>, Some(5.))
                .unwrap()
                .factor()
        );
        assert!(FeatureScaler::fit_or_supplied(Some(&train), Some(5.)).is_err());
        assert!(FeatureScaler::fit_or_supplied(None::<&Array2<f64>>, None).is_err());
    }
}
