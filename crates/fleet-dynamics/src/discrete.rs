//! Zero-order-hold discretization and the stateful channel step.

use crate::error::{DynamicsError, Result};
use crate::transfer::TransferFunction;
use nalgebra::{DMatrix, DVector};

/// Discrete state-space model `(A_d, B_d, C_d, D_d)` with retained state `x`.
///
/// `x` is advanced exactly once per [`step`](Self::step) call and is only
/// touched by the task that owns the model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteStateSpace {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
    d: f64,
    x: DVector<f64>,
    dt: f64,
}

impl DiscreteStateSpace {
    /// Exact zero-order-hold discretization at sample period `dt`.
    ///
    /// Uses the augmented matrix exponential
    ///
    /// ```text
    /// exp(| A  B | dt) = | A_d  B_d |
    ///     | 0  0 |       |  0    I  |
    /// ```
    ///
    /// while `C` and `D` carry over unchanged. The result depends only on the
    /// inputs, so repeated calls yield identical matrices.
    pub fn discretize(tf: &TransferFunction, dt: f64) -> Result<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(DynamicsError::InvalidStepPeriod(dt));
        }

        let ss = tf.to_state_space();
        let n = tf.order();

        let mut augmented = DMatrix::<f64>::zeros(n + 1, n + 1);
        augmented.view_mut((0, 0), (n, n)).copy_from(&ss.a);
        augmented.view_mut((0, n), (n, 1)).copy_from(&ss.b);

        let phi = (augmented * dt).exp();

        Ok(Self {
            a: phi.view((0, 0), (n, n)).into_owned(),
            b: phi.column(n).rows(0, n).into_owned(),
            c: ss.c,
            d: ss.d,
            x: DVector::zeros(n),
            dt,
        })
    }

    /// Advance one sample and return the new output.
    ///
    /// Equivalent to a two-sample forced response over `[0, dt]` with inputs
    /// `(prev_input, new_input)` starting from the retained state, keeping the
    /// last sample:
    ///
    /// ```text
    /// x <- A_d x + B_d prev_input
    /// y  = C_d x + D_d new_input
    /// ```
    ///
    /// Not idempotent: every call moves `x`.
    pub fn step(&mut self, prev_input: f64, new_input: f64) -> f64 {
        self.x = &self.a * &self.x + &self.b * prev_input;
        self.c.dot(&self.x) + self.d * new_input
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn reset(&mut self) {
        self.x.fill(0.0);
    }

    pub fn order(&self) -> usize {
        self.x.len()
    }

    pub fn sample_period(&self) -> f64 {
        self.dt
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn c(&self) -> &DVector<f64> {
        &self.c
    }

    pub fn d(&self) -> f64 {
        self.d
    }
}
