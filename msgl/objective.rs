//! # Multinomial Objective
//!
//! Couples a [`MultinomialLoss`] to a design matrix so that a penalized solver
//! can work directly in coefficient space. Coefficients are stored as a
//! `p x k` matrix: row `j` holds the `k` class coefficients of feature `j`,
//! which is the unit a group penalty acts on.
//!
//! The same code serves every [`DesignMatrix`] backend; dense and sparse fits
//! only differ in the type parameter.

use crate::data::MultinomialData;
use crate::design::DesignMatrix;
use crate::multinomial::{LossError, MultinomialLoss};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ObjectiveError {
    #[error(transparent)]
    Loss(#[from] LossError),
    #[error("Coefficient matrix has shape {found:?}, but the objective expects {expected:?} (features x classes).")]
    CoefficientShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Feature index {index} is out of range for {n_features} features.")]
    FeatureOutOfRange { index: usize, n_features: usize },
}

pub struct MultinomialObjective<'a, M: DesignMatrix> {
    data: &'a MultinomialData<M>,
    loss: MultinomialLoss<'a>,
}

impl<'a, M: DesignMatrix> MultinomialObjective<'a, M> {
    /// Starts at `beta = 0`, i.e. uniform class probabilities.
    pub fn new(data: &'a MultinomialData<M>) -> Self {
        log::info!(
            "Multinomial objective over {} features and {} classes",
            data.x().ncols(),
            data.n_classes()
        );
        Self {
            data,
            loss: data.loss(),
        }
    }

    pub fn n_features(&self) -> usize {
        self.data.x().ncols()
    }

    pub fn n_classes(&self) -> usize {
        self.data.n_classes()
    }

    pub fn loss(&self) -> &MultinomialLoss<'a> {
        &self.loss
    }

    pub fn at_zero(&mut self) {
        self.loss.reset_uniform();
    }

    /// Moves the objective to coefficients `beta` (`p x k`).
    pub fn at(&mut self, beta: ArrayView2<f64>) -> Result<(), ObjectiveError> {
        let expected = (self.n_features(), self.n_classes());
        if beta.dim() != expected {
            return Err(ObjectiveError::CoefficientShape {
                expected,
                found: beta.dim(),
            });
        }
        let lp = self.data.x().multiply(beta);
        self.loss.refresh(lp.view())?;
        Ok(())
    }

    /// Moves the objective to precomputed linear predictors (`n x k`).
    pub fn at_linear_predictors(
        &mut self,
        linear_predictors: ArrayView2<f64>,
    ) -> Result<(), ObjectiveError> {
        self.loss.refresh(linear_predictors)?;
        Ok(())
    }

    pub fn value(&self) -> f64 {
        self.loss.loss_value()
    }

    /// Gradient with respect to the coefficients, `p x k`.
    pub fn gradient(&self) -> Array2<f64> {
        self.data.x().transpose_multiply(self.loss.gradient().view())
    }

    /// The `k x k` curvature block of feature `feature`: `Σ_i x_ij² H_i`.
    pub fn hessian_block(&self, feature: usize) -> Result<Array2<f64>, ObjectiveError> {
        if feature >= self.n_features() {
            return Err(ObjectiveError::FeatureOutOfRange {
                index: feature,
                n_features: self.n_features(),
            });
        }
        let k = self.n_classes();
        let blocks = self.loss.hessian_blocks();
        let mut out = Array2::<f64>::zeros((k, k));
        for (row, x) in self.data.x().column_entries(feature) {
            out.scaled_add(x * x, &blocks[row]);
        }
        Ok(out)
    }

    /// An upper bound on the spectral norm of every feature's Hessian block.
    ///
    /// Each per-sample block satisfies `diag(p) - pᵗp ≤ I/2`, so feature `j`
    /// is bounded by `Σ_i w_i x_ij² / 2`; the maximum over features is returned.
    pub fn hessian_bound(&self) -> f64 {
        (0..self.n_features())
            .map(|j| {
                self.data
                    .x()
                    .column_entries(j)
                    .into_iter()
                    .map(|(row, x)| self.data.weights()[row] * x * x)
                    .sum::<f64>()
                    / 2.0
            })
            .fold(0.0, f64::max)
    }
}
