//! Continuous-time transfer functions and their state-space realization.

use crate::error::TransferFunctionError;
use nalgebra::{DMatrix, DVector};

/// Scalar LTI channel `N(s) / D(s)`, coefficients highest degree first.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    num: Vec<f64>,
    den: Vec<f64>,
}

/// Continuous state-space realization `(A, B, C, D)` of a transfer function.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousStateSpace {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub c: DVector<f64>,
    pub d: f64,
}

impl TransferFunction {
    /// Build a strictly proper transfer function.
    ///
    /// Leading zero coefficients are dropped before the degree checks.
    pub fn new(
        num: impl Into<Vec<f64>>,
        den: impl Into<Vec<f64>>,
    ) -> Result<Self, TransferFunctionError> {
        let num = strip_leading_zeros(num.into());
        let den = strip_leading_zeros(den.into());

        if let Some(bad) = num.iter().chain(&den).find(|c| !c.is_finite()) {
            return Err(TransferFunctionError::NonFinite(*bad));
        }
        if den.is_empty() {
            return Err(TransferFunctionError::EmptyDenominator);
        }
        if den.len() == 1 {
            return Err(TransferFunctionError::StaticGain);
        }
        // An all-zero numerator is a valid (silent) channel
        if !num.is_empty() && num.len() >= den.len() {
            return Err(TransferFunctionError::NonCausal {
                numerator: num.len() - 1,
                denominator: den.len() - 1,
            });
        }

        Ok(Self { num, den })
    }

    pub fn numerator(&self) -> &[f64] {
        &self.num
    }

    pub fn denominator(&self) -> &[f64] {
        &self.den
    }

    /// Denominator degree, which is also the state dimension.
    pub fn order(&self) -> usize {
        self.den.len() - 1
    }

    /// Controllable canonical realization.
    ///
    /// With the denominator normalized to `s^n + a1 s^(n-1) + ... + an` and
    /// the numerator padded to `b0 s^n + ... + bn`:
    ///
    /// ```text
    /// A = | -a1 -a2 ... -an |    B = | 1 |    C = [b1 - a1 b0, ..., bn - an b0]
    ///     |  1   0  ...  0  |        | 0 |    D = b0
    ///     |  0   1  ...  0  |        | : |
    /// ```
    pub fn to_state_space(&self) -> ContinuousStateSpace {
        let n = self.order();
        let lead = self.den[0];
        let den: Vec<f64> = self.den.iter().map(|c| c / lead).collect();

        let mut num = vec![0.0; n + 1 - self.num.len()];
        num.extend(self.num.iter().map(|c| c / lead));

        let mut a = DMatrix::<f64>::zeros(n, n);
        for j in 0..n {
            a[(0, j)] = -den[j + 1];
        }
        for i in 1..n {
            a[(i, i - 1)] = 1.0;
        }

        let mut b = DVector::<f64>::zeros(n);
        b[0] = 1.0;

        let d = num[0];
        let c = DVector::from_fn(n, |i, _| num[i + 1] - den[i + 1] * d);

        ContinuousStateSpace { a, b, c, d }
    }
}

fn strip_leading_zeros(mut coeffs: Vec<f64>) -> Vec<f64> {
    let first = coeffs.iter().position(|c| *c != 0.0).unwrap_or(coeffs.len());
    coeffs.drain(..first);
    coeffs
}
