//! Conversion of raw feature vectors into GP index points.
//!
//! A kernel over feature vectors of dimensionality `D` declares `D` feature
//! dimensions, so an `(N, D)` matrix of features is laid out as an `(N, D, 1, ..., 1)`
//! tensor carrying `D - 1` trailing singleton axes.

use crate::errors::{GpError, Result};
use ndarray::{Array2, ArrayBase, ArrayD, ArrayView2, ArrayViewD, Data, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

/// An ordered, immutable set of feature vectors sharing the same dimensionality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array2<f64>", into = "Array2<f64>")]
pub struct IndexPoints {
    points: Array2<f64>,
    tensor: ArrayD<f64>,
}

impl IndexPoints {
    /// Build index points from a `(N, D)` array of feature vectors.
    ///
    /// Fails with [`GpError::DegenerateFeatures`] when `D < 1`.
    pub fn new(array: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Self> {
        let (n, d) = array.dim();
        if d < 1 {
            return Err(GpError::DegenerateFeatures(d));
        }
        let points = array.as_standard_layout().into_owned();
        let mut shape = vec![n, d];
        shape.extend(std::iter::repeat(1).take(d - 1));
        let tensor = points
            .clone()
            .into_shape_with_order(IxDyn(&shape))
            .map_err(|e| GpError::ShapeMismatch(e.to_string()))?;
        Ok(IndexPoints { points, tensor })
    }

    /// Number of index points
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    /// Whether there is no index point at all
    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// Feature dimensionality `D` (as declared to the kernel)
    pub fn feature_ndims(&self) -> usize {
        self.points.ncols()
    }

    /// Index points as a `(N, D)` matrix view
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.points.view()
    }

    /// Index points as a `(N, D, 1, ..., 1)` tensor view
    pub fn tensor(&self) -> ArrayViewD<'_, f64> {
        self.tensor.view()
    }
}

impl TryFrom<Array2<f64>> for IndexPoints {
    type Error = GpError;

    fn try_from(array: Array2<f64>) -> Result<Self> {
        IndexPoints::new(&array)
    }
}

impl From<IndexPoints> for Array2<f64> {
    fn from(points: IndexPoints) -> Array2<f64> {
        points.points
    }
}

/// Reshape a `(N, D)` array into index points appropriate for a GP kernel.
///
/// Extends the number of dimensions by `D - 1` singleton axes.
///
/// *Panics* if `D < 1`: degenerate feature vectors are a caller bug.
pub fn convert_index_points(array: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<IndexPoints> {
    assert!(
        array.ncols() >= 1,
        "index points need at least one feature dimension"
    );
    IndexPoints::new(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    #[test]
    fn test_convert_index_points_shape() {
        let x = Array::linspace(0., 11., 12).into_shape_with_order((4, 3)).unwrap();
        let points = convert_index_points(&x).unwrap();
        assert_eq!(&[4, 3, 1, 1], points.tensor().shape());
        assert_eq!(3, points.feature_ndims());
        assert_eq!(4, points.len());
        assert_eq!(x.view(), points.matrix());
        assert_eq!(x[[2, 1]], points.tensor()[[2, 1, 0, 0]]);
    }

    #[test]
    fn test_convert_single_feature() {
        let points = convert_index_points(&array![[0.], [1.], [2.]]).unwrap();
        assert_eq!(&[3, 1], points.tensor().shape());
    }

    #[test]
    fn test_convert_fortran_layout() {
        let x = array![[1., 2.], [3., 4.], [5., 6.]];
        let xt = x.t().to_owned().reversed_axes();
        let points = IndexPoints::new(&xt).unwrap();
        assert_eq!(x.view(), points.matrix());
    }

    #[test]
    #[should_panic(expected = "at least one feature dimension")]
    fn test_convert_degenerate_panics() {
        let x = Array2::<f64>::zeros((3, 0));
        let _ = convert_index_points(&x);
    }

    #[test]
    fn test_new_degenerate_fails() {
        let x = Array2::<f64>::zeros((3, 0));
        assert!(matches!(
            IndexPoints::new(&x),
            Err(GpError::DegenerateFeatures(0))
        ));
    }
}
