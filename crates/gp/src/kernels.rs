//! A module for stationary positive semi-definite kernels used as GP covariance.
//!
//! A kernel is written `k(x, x') = amplitude^2 * phi(|x - x'| / length_scale)`
//! where `|.|` is the euclidean norm over the feature dimensions.
//!
//! The following profiles `phi` are implemented:
//! * matern 1/2 (exponential, the default),
//! * matern 3/2,
//! * matern 5/2,
//! * exponentiated quadratic (squared exponential).

use crate::errors::{GpError, Result};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// A trait for the radial profile `phi(r)` of a stationary kernel
pub trait StationaryProfile: Clone + Copy + Default + fmt::Display + Sync {
    /// Value of `phi` at scaled distance `r >= 0`, with `phi(0) = 1`
    fn value(&self, r: f64) -> f64;

    /// Derivative `dphi/dr` at scaled distance `r >= 0`
    fn derivative(&self, r: f64) -> f64;
}

/// Matern 1/2 (absolute exponential) profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaternOneHalf();

impl StationaryProfile for MaternOneHalf {
    /// exp(-r)
    fn value(&self, r: f64) -> f64 {
        (-r).exp()
    }

    fn derivative(&self, r: f64) -> f64 {
        -(-r).exp()
    }
}

impl fmt::Display for MaternOneHalf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MaternOneHalf")
    }
}

/// Matern 3/2 profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaternThreeHalves();

impl StationaryProfile for MaternThreeHalves {
    /// (1 + sqrt(3) * r) exp(-sqrt(3) * r)
    fn value(&self, r: f64) -> f64 {
        let s = 3f64.sqrt() * r;
        (1. + s) * (-s).exp()
    }

    fn derivative(&self, r: f64) -> f64 {
        -3. * r * (-3f64.sqrt() * r).exp()
    }
}

impl fmt::Display for MaternThreeHalves {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MaternThreeHalves")
    }
}

/// Matern 5/2 profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaternFiveHalves();

impl StationaryProfile for MaternFiveHalves {
    /// (1 + sqrt(5) * r + 5/3 * r^2) exp(-sqrt(5) * r)
    fn value(&self, r: f64) -> f64 {
        let s = 5f64.sqrt() * r;
        (1. + s + s * s / 3.) * (-s).exp()
    }

    fn derivative(&self, r: f64) -> f64 {
        let s = 5f64.sqrt() * r;
        -5. / 3. * r * (1. + s) * (-s).exp()
    }
}

impl fmt::Display for MaternFiveHalves {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MaternFiveHalves")
    }
}

/// Exponentiated quadratic (squared exponential) profile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExponentiatedQuadratic();

impl StationaryProfile for ExponentiatedQuadratic {
    /// exp(-r^2 / 2)
    fn value(&self, r: f64) -> f64 {
        (-0.5 * r * r).exp()
    }

    fn derivative(&self, r: f64) -> f64 {
        -r * (-0.5 * r * r).exp()
    }
}

impl fmt::Display for ExponentiatedQuadratic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExponentiatedQuadratic")
    }
}

/// Kernel family selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KernelKind {
    /// See [MaternOneHalf]
    #[default]
    MaternOneHalf,
    /// See [MaternThreeHalves]
    MaternThreeHalves,
    /// See [MaternFiveHalves]
    MaternFiveHalves,
    /// See [ExponentiatedQuadratic]
    ExponentiatedQuadratic,
}

impl KernelKind {
    fn value(&self, r: f64) -> f64 {
        match self {
            KernelKind::MaternOneHalf => MaternOneHalf().value(r),
            KernelKind::MaternThreeHalves => MaternThreeHalves().value(r),
            KernelKind::MaternFiveHalves => MaternFiveHalves().value(r),
            KernelKind::ExponentiatedQuadratic => ExponentiatedQuadratic().value(r),
        }
    }

    fn derivative(&self, r: f64) -> f64 {
        match self {
            KernelKind::MaternOneHalf => MaternOneHalf().derivative(r),
            KernelKind::MaternThreeHalves => MaternThreeHalves().derivative(r),
            KernelKind::MaternFiveHalves => MaternFiveHalves().derivative(r),
            KernelKind::ExponentiatedQuadratic => ExponentiatedQuadratic().derivative(r),
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelKind::MaternOneHalf => fmt::Display::fmt(&MaternOneHalf(), f),
            KernelKind::MaternThreeHalves => fmt::Display::fmt(&MaternThreeHalves(), f),
            KernelKind::MaternFiveHalves => fmt::Display::fmt(&MaternFiveHalves(), f),
            KernelKind::ExponentiatedQuadratic => fmt::Display::fmt(&ExponentiatedQuadratic(), f),
        }
    }
}

impl FromStr for KernelKind {
    type Err = GpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MaternOneHalf" | "matern12" => Ok(KernelKind::MaternOneHalf),
            "MaternThreeHalves" | "matern32" => Ok(KernelKind::MaternThreeHalves),
            "MaternFiveHalves" | "matern52" => Ok(KernelKind::MaternFiveHalves),
            "ExponentiatedQuadratic" | "squared_exponential" => {
                Ok(KernelKind::ExponentiatedQuadratic)
            }
            _ => Err(GpError::InvalidValueError(format!(
                "Bad kernel name '{s}', should be one of MaternOneHalf, \
                 MaternThreeHalves, MaternFiveHalves, ExponentiatedQuadratic"
            ))),
        }
    }
}

impl From<KernelKind> for String {
    fn from(kind: KernelKind) -> String {
        kind.to_string()
    }
}

impl TryFrom<String> for KernelKind {
    type Error = GpError;
    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A kernel family together with its two hyperparameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    /// Kernel family
    pub kind: KernelKind,
    /// Amplitude, the kernel variance is `amplitude^2`
    pub amplitude: f64,
    /// Length scale applied to distances between feature vectors
    pub length_scale: f64,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel {
            kind: KernelKind::default(),
            amplitude: 1.,
            length_scale: 1.,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}(amplitude={}, length_scale={})",
            self.kind, self.amplitude, self.length_scale
        )
    }
}

impl Kernel {
    /// Kernel constructor
    pub fn new(kind: KernelKind, amplitude: f64, length_scale: f64) -> Self {
        Kernel {
            kind,
            amplitude,
            length_scale,
        }
    }

    /// Kernel value `k(x, x)`, i.e. the prior variance at any point
    pub fn variance(&self) -> f64 {
        self.amplitude * self.amplitude
    }

    /// Covariance matrix given euclidean distances between two sets of points
    pub fn matrix(&self, distances: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        let a2 = self.variance();
        distances.mapv(|d| a2 * self.kind.value(d / self.length_scale))
    }

    /// Covariance matrix and its derivatives with respect to amplitude and length scale,
    /// given euclidean distances between two sets of points
    pub fn matrix_with_gradients(
        &self,
        distances: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let (a, l) = (self.amplitude, self.length_scale);
        let profile = distances.mapv(|d| self.kind.value(d / l));
        let k = profile.mapv(|v| a * a * v);
        let dk_da = profile.mapv(|v| 2. * a * v);
        let dk_dl = distances.mapv(|d| -a * a * self.kind.derivative(d / l) * d / (l * l));
        (k, dk_da, dk_dl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn check_derivative(profile: impl StationaryProfile) {
        let h = 1e-6;
        for r in [0.1, 0.5, 1., 2.5] {
            let fd = (profile.value(r + h) - profile.value(r - h)) / (2. * h);
            assert_abs_diff_eq!(fd, profile.derivative(r), epsilon = 1e-7);
        }
        assert_abs_diff_eq!(1., profile.value(0.), epsilon = 1e-15);
    }

    #[test]
    fn test_profile_derivatives() {
        check_derivative(MaternOneHalf());
        check_derivative(MaternThreeHalves());
        check_derivative(MaternFiveHalves());
        check_derivative(ExponentiatedQuadratic());
    }

    #[test]
    fn test_matern12_matrix() {
        let kernel = Kernel::new(KernelKind::MaternOneHalf, 2., 0.5);
        let d = array![[0., 1.], [1., 0.]];
        let expected = array![[4., 4. * (-2f64).exp()], [4. * (-2f64).exp(), 4.]];
        assert_abs_diff_eq!(expected, kernel.matrix(&d), epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_gradients() {
        let d = array![[0., 0.3, 1.7], [0.3, 0., 0.9], [1.7, 0.9, 0.]];
        let h = 1e-6;
        for kind in [
            KernelKind::MaternOneHalf,
            KernelKind::MaternThreeHalves,
            KernelKind::MaternFiveHalves,
            KernelKind::ExponentiatedQuadratic,
        ] {
            let kernel = Kernel::new(kind, 1.3, 0.7);
            let (k, dk_da, dk_dl) = kernel.matrix_with_gradients(&d);
            assert_abs_diff_eq!(kernel.matrix(&d), k, epsilon = 1e-12);

            let fd_a = (Kernel::new(kind, 1.3 + h, 0.7).matrix(&d)
                - Kernel::new(kind, 1.3 - h, 0.7).matrix(&d))
                / (2. * h);
            assert_abs_diff_eq!(fd_a, dk_da, epsilon = 1e-6);

            let fd_l = (Kernel::new(kind, 1.3, 0.7 + h).matrix(&d)
                - Kernel::new(kind, 1.3, 0.7 - h).matrix(&d))
                / (2. * h);
            assert_abs_diff_eq!(fd_l, dk_dl, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_kernel_kind_names() {
        for kind in [
            KernelKind::MaternOneHalf,
            KernelKind::MaternThreeHalves,
            KernelKind::MaternFiveHalves,
            KernelKind::ExponentiatedQuadratic,
        ] {
            assert_eq!(kind, kind.to_string().parse().unwrap());
        }
        assert_eq!(
            KernelKind::MaternThreeHalves,
            "matern32".parse::<KernelKind>().unwrap()
        );
        assert!("rbf".parse::<KernelKind>().is_err());
    }

    #[test]
    fn test_kernel_serde() {
        let kernel = Kernel::new(KernelKind::MaternFiveHalves, 0.5, 2.);
        let json = serde_json::to_string(&kernel).unwrap();
        assert!(json.contains("\"MaternFiveHalves\""));
        let back: Kernel = serde_json::from_str(&json).unwrap();
        assert_eq!(kernel, back);
    }
}
