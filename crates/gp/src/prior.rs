use crate::errors::{GpError, Result};
use crate::index_points::IndexPoints;
use crate::kernels::Kernel;
use crate::regression::GpRegressionModel;
use crate::utils::{duplicated_rows, pairwise_distances};

use linfa_linalg::{cholesky::*, triangular::*};
use log::warn;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Zero mean Gaussian process prior over a fixed set of observation index points.
///
/// Pairwise distances between observation index points are computed once;
/// the covariance `k(X, X) + jitter * I` is evaluated against whatever kernel
/// hyperparameters are given, so a single prior serves every optimization step.
#[derive(Clone, Debug)]
pub struct GpPrior {
    index_points: IndexPoints,
    observations: Array1<f64>,
    distances: Array2<f64>,
    jitter: f64,
}

impl GpPrior {
    /// Build the prior from observation index points and matched observations.
    pub fn new(index_points: IndexPoints, observations: Array1<f64>, jitter: f64) -> Result<Self> {
        if index_points.len() != observations.len() {
            return Err(GpError::ShapeMismatch(format!(
                "{} index points given for {} observations",
                index_points.len(),
                observations.len()
            )));
        }
        if index_points.is_empty() {
            return Err(GpError::ShapeMismatch(
                "at least one observation is required".to_string(),
            ));
        }
        let distances = pairwise_distances(&index_points.matrix(), &index_points.matrix());
        let n_dup = duplicated_rows(&distances);
        if n_dup > 0 {
            warn!("{n_dup} pairs of observation index points have the same value");
        }
        Ok(GpPrior {
            index_points,
            observations,
            distances,
            jitter,
        })
    }

    /// Observation index points
    pub fn index_points(&self) -> &IndexPoints {
        &self.index_points
    }

    /// Observed values
    pub fn observations(&self) -> &Array1<f64> {
        &self.observations
    }

    /// Jitter added to covariance diagonals
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Lower cholesky factor of `k(X, X) + jitter * I`
    pub(crate) fn covariance_cholesky(&self, kernel: &Kernel) -> Result<Array2<f64>> {
        cholesky_with_jitter(kernel.matrix(&self.distances), self.jitter)
    }

    /// Log probability of the observations under the prior
    pub fn log_prob(&self, kernel: &Kernel) -> Result<f64> {
        let l = self.covariance_cholesky(kernel)?;
        mvn_log_prob(&l, &self.observations)
    }

    /// Negative log marginal likelihood of the observations and its gradient
    /// with respect to `[amplitude, length_scale]`.
    ///
    /// `dNLL/dtheta = 1/2 tr((K^-1 - alpha alpha^t) dK/dtheta)` with `alpha = K^-1 y`.
    pub fn nll_with_gradients(&self, kernel: &Kernel) -> Result<(f64, [f64; 2])> {
        let n = self.observations.len();
        let (k, dk_da, dk_dl) = kernel.matrix_with_gradients(&self.distances);
        let l = cholesky_with_jitter(k, self.jitter)?;

        let y = self.observations.view().insert_axis(Axis(1));
        let z = l.solve_triangular(&y, UPLO::Lower)?;
        let alpha = l.t().solve_triangular(&z, UPLO::Upper)?;

        let nll = 0.5 * z.mapv(|v| v * v).sum()
            + l.diag().mapv(|v| v.ln()).sum()
            + 0.5 * n as f64 * LN_2PI;

        let l_inv = l.solve_triangular(&Array2::<f64>::eye(n), UPLO::Lower)?;
        let w = l_inv.t().dot(&l_inv) - alpha.dot(&alpha.t());
        let grad_a = 0.5 * (&w * &dk_da).sum();
        let grad_l = 0.5 * (&w * &dk_dl).sum();

        if !(nll.is_finite() && grad_a.is_finite() && grad_l.is_finite()) {
            return Err(GpError::NumericalError(format!(
                "non finite likelihood {nll} or gradients [{grad_a}, {grad_l}] with {kernel}"
            )));
        }
        Ok((nll, [grad_a, grad_l]))
    }

    /// Regression model conditioned on the observations, evaluated at `query` points
    pub fn regression_model(
        &self,
        kernel: &Kernel,
        query: &IndexPoints,
    ) -> Result<GpRegressionModel> {
        if query.feature_ndims() != self.index_points.feature_ndims() {
            return Err(GpError::ShapeMismatch(format!(
                "query points have {} features, observation index points have {}",
                query.feature_ndims(),
                self.index_points.feature_ndims()
            )));
        }
        let l = self.covariance_cholesky(kernel)?;
        GpRegressionModel::new(
            *kernel,
            self.jitter,
            l,
            &self.index_points.matrix(),
            &self.observations,
            &query.matrix(),
        )
    }
}

/// Cholesky factor (lower) of `cov + jitter * I`
pub(crate) fn cholesky_with_jitter(mut cov: Array2<f64>, jitter: f64) -> Result<Array2<f64>> {
    cov.diag_mut().mapv_inplace(|v| v + jitter);
    let l = cov.cholesky_into()?;
    if l.iter().any(|v| !v.is_finite()) {
        return Err(GpError::NumericalError(
            "covariance matrix cholesky decomposition is not finite".to_string(),
        ));
    }
    Ok(l)
}

/// Log density of `x` under a zero mean multivariate normal whose covariance
/// has lower cholesky factor `l`
pub(crate) fn mvn_log_prob(
    l: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<f64> {
    let n = x.len();
    let z = l.solve_triangular(&x.view().insert_axis(Axis(1)), UPLO::Lower)?;
    Ok(-0.5 * z.mapv(|v| v * v).sum() - l.diag().mapv(|v| v.ln()).sum() - 0.5 * n as f64 * LN_2PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_points::convert_index_points;
    use crate::kernels::KernelKind;
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use ndarray::{Array, array};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use rand_xoshiro::Xoshiro256Plus;

    fn make_prior(jitter: f64) -> GpPrior {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array::random_using((12, 3), Uniform::<f64>::new(-1., 1.), &mut rng);
        let y = x.map_axis(Axis(1), |r| (2. * r[0]).sin() + r[1] * r[2]);
        GpPrior::new(convert_index_points(&x).unwrap(), y, jitter).unwrap()
    }

    #[test]
    fn test_nll_matches_log_prob() {
        let prior = make_prior(1e-6);
        let kernel = Kernel::new(KernelKind::MaternOneHalf, 1.2, 0.8);
        let (nll, _) = prior.nll_with_gradients(&kernel).unwrap();
        assert_abs_diff_eq!(-prior.log_prob(&kernel).unwrap(), nll, epsilon = 1e-9);
    }

    #[test]
    fn test_nll_single_point() {
        // One observation y ~ N(0, a^2 + jitter)
        let prior = GpPrior::new(
            convert_index_points(&array![[0.3]]).unwrap(),
            array![1.5],
            0.,
        )
        .unwrap();
        let kernel = Kernel::new(KernelKind::MaternOneHalf, 2., 1.);
        let var: f64 = 4.;
        let expected = 0.5 * 1.5 * 1.5 / var + 0.5 * var.ln() + 0.5 * LN_2PI;
        let (nll, grads) = prior.nll_with_gradients(&kernel).unwrap();
        assert_abs_diff_eq!(expected, nll, epsilon = 1e-12);
        // d/da [y^2 / (2 a^2) + ln a] = -y^2 / a^3 + 1 / a
        assert_abs_diff_eq!(-1.5 * 1.5 / 8. + 0.5, grads[0], epsilon = 1e-12);
        assert_abs_diff_eq!(0., grads[1], epsilon = 1e-12);
    }

    #[test]
    fn test_nll_gradients_vs_finite_diff() {
        let prior = make_prior(1e-4);
        for kind in [
            KernelKind::MaternOneHalf,
            KernelKind::MaternThreeHalves,
            KernelKind::MaternFiveHalves,
            KernelKind::ExponentiatedQuadratic,
        ] {
            let nll = |p: &Vec<f64>| -> f64 {
                prior
                    .nll_with_gradients(&Kernel::new(kind, p[0], p[1]))
                    .unwrap()
                    .0
            };
            let p = vec![0.9, 0.6];
            let fd = p.central_diff(&nll);
            let (_, grads) = prior
                .nll_with_gradients(&Kernel::new(kind, p[0], p[1]))
                .unwrap();
            assert_abs_diff_eq!(fd[0], grads[0], epsilon = 1e-4);
            assert_abs_diff_eq!(fd[1], grads[1], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let points = convert_index_points(&array![[0.], [1.]]).unwrap();
        assert!(matches!(
            GpPrior::new(points, array![1., 2., 3.], 1e-6),
            Err(GpError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_non_positive_definite() {
        // Negative length scale turns exp(-d/l) into a growing function
        let prior = make_prior(0.);
        let kernel = Kernel::new(KernelKind::MaternOneHalf, 1., -0.1);
        assert!(prior.nll_with_gradients(&kernel).is_err());
    }
}
