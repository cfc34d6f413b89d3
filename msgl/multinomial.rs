//! # Multinomial Loss Evaluator
//!
//! Holds the softmax probabilities of every sample for the current linear
//! predictors and answers the queries a penalized solver makes between two
//! coefficient updates:
//!
//! * `loss_value()` the weighted negative log-likelihood `Σ_i -w_i log p_{i,y_i}`
//! * `gradient()` the `n x k` matrix `w_i (p_i - e_{y_i})`
//! * `hessian(i)` the `k x k` block `w_i (diag(p_i) - p_iᵗ p_i)`
//!
//! Probabilities are only rewritten by [`MultinomialLoss::refresh`] and
//! [`MultinomialLoss::reset_uniform`], both of which take `&mut self`. Hessian
//! blocks are derived lazily from the current probabilities and memoised in a
//! `OnceLock`, so shared readers may request them concurrently and the blocks
//! are built at most once per probability state.

use crate::data::{DataError, validate_weights};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum LossError {
    #[error("Invalid loss configuration: {0}")]
    InvalidData(#[from] DataError),

    #[error(
        "Linear predictor matrix has shape {found:?}, but the loss expects {expected:?} (samples x classes)."
    )]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error(
        "Softmax produced non-finite probabilities for sample {sample}. The linear predictors contain NaN or infinite values."
    )]
    NonFiniteProbabilities { sample: usize },

    #[error("Sample index {index} is out of range for {n_samples} samples.")]
    SampleOutOfRange { index: usize, n_samples: usize },
}

/// Where the probability matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbabilityState {
    /// Every probability is `1/k`, as for all-zero linear predictors.
    Uniform,
    /// Probabilities were computed from the linear predictors of the last refresh.
    Current,
}

/// Writes the softmax of `lp` into `out` and returns whether every value is finite.
///
/// The row maximum is subtracted before exponentiating so that large linear
/// predictors cannot overflow; the result is invariant to adding a constant to `lp`.
pub fn softmax_into(lp: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) -> bool {
    debug_assert_eq!(lp.len(), out.len());
    let max = lp.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    out.zip_mut_with(&lp, |o, &v| *o = (v - max).exp());
    let total = out.sum();
    out.mapv_inplace(|v| v / total);
    out.iter().all(|v| v.is_finite())
}

/// Allocating variant of [`softmax_into`]. Returns `None` when the result is not finite.
pub fn softmax(lp: ArrayView1<f64>) -> Option<Array1<f64>> {
    let mut out = Array1::zeros(lp.len());
    softmax_into(lp, out.view_mut()).then_some(out)
}

/// Multinomial loss over `n` samples and `k` classes.
///
/// The evaluator borrows the grouping and weights of the data package it was
/// built from and cannot outlive it.
pub struct MultinomialLoss<'a> {
    n_samples: usize,
    n_classes: usize,
    grouping: ArrayView1<'a, usize>,
    weights: ArrayView1<'a, f64>,
    /// n_samples x n_classes
    probabilities: Array2<f64>,
    state: ProbabilityState,
    hessians: OnceLock<Vec<Array2<f64>>>,
}

impl<'a> MultinomialLoss<'a> {
    /// Creates an evaluator in the uniform state.
    ///
    /// `grouping` holds 0-based class indices. Inconsistent lengths, fewer than
    /// two classes, labels `>= n_classes` and negative weights are rejected.
    pub fn new(
        n_samples: usize,
        n_classes: usize,
        grouping: ArrayView1<'a, usize>,
        weights: ArrayView1<'a, f64>,
    ) -> Result<Self, LossError> {
        if grouping.len() != n_samples {
            return Err(DataError::LengthMismatch {
                what: "grouping",
                expected: n_samples,
                found: grouping.len(),
            }
            .into());
        }
        if weights.len() != n_samples {
            return Err(DataError::LengthMismatch {
                what: "weights",
                expected: n_samples,
                found: weights.len(),
            }
            .into());
        }
        if n_classes < 2 {
            return Err(DataError::TooFewClasses(n_classes).into());
        }
        if let Some((index, &label)) = grouping.iter().enumerate().find(|&(_, &g)| g >= n_classes)
        {
            return Err(DataError::LabelOutOfRange {
                index,
                label,
                n_classes,
            }
            .into());
        }
        validate_weights(weights)?;
        Ok(Self::from_validated(grouping, weights, n_classes))
    }

    /// Builds an evaluator from inputs that have already passed data-package validation.
    pub(crate) fn from_validated(
        grouping: ArrayView1<'a, usize>,
        weights: ArrayView1<'a, f64>,
        n_classes: usize,
    ) -> Self {
        let n_samples = grouping.len();
        log::info!(
            "Multinomial loss evaluator: {} samples, {} classes",
            n_samples,
            n_classes
        );
        Self {
            n_samples,
            n_classes,
            grouping,
            weights,
            probabilities: Array2::from_elem((n_samples, n_classes), 1.0 / n_classes as f64),
            state: ProbabilityState::Uniform,
            hessians: OnceLock::new(),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn state(&self) -> ProbabilityState {
        self.state
    }

    /// Recomputes all probabilities from an `n x k` matrix of linear predictors.
    ///
    /// On error the evaluator keeps its previous probabilities and Hessian cache.
    pub fn refresh(&mut self, linear_predictors: ArrayView2<f64>) -> Result<(), LossError> {
        let found = linear_predictors.dim();
        if found != (self.n_samples, self.n_classes) {
            return Err(LossError::DimensionMismatch {
                expected: (self.n_samples, self.n_classes),
                found,
            });
        }

        let mut probabilities = Array2::<f64>::zeros(found);
        for (sample, (lp, out)) in linear_predictors
            .rows()
            .into_iter()
            .zip(probabilities.rows_mut())
            .enumerate()
        {
            if !softmax_into(lp, out) {
                log::warn!(
                    "Non-finite softmax probabilities at sample {}; rejecting refresh",
                    sample
                );
                return Err(LossError::NonFiniteProbabilities { sample });
            }
        }

        self.probabilities = probabilities;
        self.state = ProbabilityState::Current;
        self.invalidate_hessians();
        log::debug!(
            "Refreshed multinomial probabilities for {} samples",
            self.n_samples
        );
        Ok(())
    }

    /// Sets every probability to `1/k`, the state of all-zero linear predictors.
    pub fn reset_uniform(&mut self) {
        self.probabilities.fill(1.0 / self.n_classes as f64);
        self.state = ProbabilityState::Uniform;
        self.invalidate_hessians();
    }

    fn invalidate_hessians(&mut self) {
        if self.hessians.take().is_some() {
            log::trace!("Invalidated cached Hessian blocks");
        }
    }

    pub fn probabilities(&self) -> ArrayView2<'_, f64> {
        self.probabilities.view()
    }

    /// Gradient of the loss with respect to the linear predictors, `n x k`.
    pub fn gradient(&self) -> Array2<f64> {
        let mut grad = self.probabilities.clone();
        for (i, mut row) in grad.rows_mut().into_iter().enumerate() {
            row[self.grouping[i]] -= 1.0;
            row *= self.weights[i];
        }
        grad
    }

    /// Builds the Hessian blocks for the current probabilities if they are not cached yet.
    pub fn compute_hessians(&self) {
        self.hessian_blocks();
    }

    pub fn hessians_valid(&self) -> bool {
        self.hessians.get().is_some()
    }

    /// All `n` Hessian blocks, computing them first if necessary.
    pub fn hessian_blocks(&self) -> &[Array2<f64>] {
        if let Some(blocks) = self.hessians.get() {
            log::trace!("Hessian cache hit");
            return blocks;
        }
        self.hessians.get_or_init(|| {
            log::debug!(
                "Computing {} Hessian blocks of size {}x{}",
                self.n_samples,
                self.n_classes,
                self.n_classes
            );
            self.probabilities
                .rows()
                .into_iter()
                .zip(self.weights.iter())
                .map(|(p, &w)| hessian_block(p, w))
                .collect()
        })
    }

    /// The `k x k` Hessian block of sample `index`.
    pub fn hessian(&self, index: usize) -> Result<&Array2<f64>, LossError> {
        if index >= self.n_samples {
            return Err(LossError::SampleOutOfRange {
                index,
                n_samples: self.n_samples,
            });
        }
        Ok(&self.hessian_blocks()[index])
    }

    /// Weighted negative log-likelihood at the current probabilities.
    ///
    /// A true-class probability that underflowed to zero gives `+inf`.
    pub fn loss_value(&self) -> f64 {
        self.grouping
            .iter()
            .zip(self.weights.iter())
            .enumerate()
            .map(|(i, (&y, &w))| -w * self.probabilities[[i, y]].ln())
            .sum()
    }
}

/// `w (diag(p) - pᵗp)` for one probability row.
fn hessian_block(p: ArrayView1<f64>, w: f64) -> Array2<f64> {
    let k = p.len();
    let mut block = Array2::from_shape_fn((k, k), |(a, b)| -w * p[a] * p[b]);
    for a in 0..k {
        block[[a, a]] += w * p[a];
    }
    block
}
