//! # Data Package
//!
//! The validated inputs of a multinomial fit: the design matrix, one class
//! label per sample, and one non-negative weight per sample.
//!
//! Labels arrive from callers in 1-based form (the first class is `1`) and are
//! normalised here, once, to the 0-based indices used everywhere else in the
//! crate. Every later stage can therefore assume `label < n_classes` and
//! `x.nrows() == grouping.len() == weights.len()`.

use crate::config::ObjectiveConfig;
use crate::design::DesignMatrix;
use crate::multinomial::MultinomialLoss;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DataError {
    #[error("The data package contains no samples.")]
    Empty,
    #[error("Length mismatch for {what}: expected {expected}, found {found}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("A multinomial model needs at least 2 classes, found {0}.")]
    TooFewClasses(usize),
    #[error("Sample {index} has label {label}, outside the valid range for {n_classes} classes.")]
    LabelOutOfRange {
        index: usize,
        label: usize,
        n_classes: usize,
    },
    #[error("Sample {index} has negative weight {weight}. Weights must be non-negative.")]
    NegativeWeight { index: usize, weight: f64 },
    #[error("Non-finite values (NaN or Infinity) were found in the {0}.")]
    NonFiniteValues(&'static str),
}

/// Design matrix, 0-based grouping and sample weights for one fit.
///
/// Fields are read-only after validation; the loss evaluator indexes with them unchecked.
#[derive(Clone)]
pub struct MultinomialData<M: DesignMatrix> {
    x: M,
    /// 0-based class index of each sample.
    grouping: Array1<usize>,
    n_classes: usize,
    weights: Array1<f64>,
}

impl<M: DesignMatrix> MultinomialData<M> {
    /// Validates an already 0-based grouping.
    pub fn new(
        x: M,
        grouping: Array1<usize>,
        n_classes: usize,
        weights: Array1<f64>,
    ) -> Result<Self, DataError> {
        Self::with_config(x, grouping, n_classes, weights, &ObjectiveConfig::default())
    }

    pub fn with_config(
        x: M,
        grouping: Array1<usize>,
        n_classes: usize,
        weights: Array1<f64>,
        config: &ObjectiveConfig,
    ) -> Result<Self, DataError> {
        let n = x.nrows();
        if n == 0 {
            return Err(DataError::Empty);
        }
        if grouping.len() != n {
            return Err(DataError::LengthMismatch {
                what: "grouping",
                expected: n,
                found: grouping.len(),
            });
        }
        if weights.len() != n {
            return Err(DataError::LengthMismatch {
                what: "weights",
                expected: n,
                found: weights.len(),
            });
        }
        if n_classes < 2 {
            return Err(DataError::TooFewClasses(n_classes));
        }
        if let Some((index, &label)) = grouping.iter().enumerate().find(|&(_, &g)| g >= n_classes)
        {
            return Err(DataError::LabelOutOfRange {
                index,
                label,
                n_classes,
            });
        }
        if config.check_finite_inputs && !x.has_only_finite() {
            return Err(DataError::NonFiniteValues("design matrix"));
        }
        validate_weights(weights.view())?;

        log::info!(
            "Multinomial data: {} samples, {} features, {} classes",
            n,
            x.ncols(),
            n_classes
        );

        Ok(Self {
            x,
            grouping,
            n_classes,
            weights,
        })
    }

    /// Builds the package from 1-based labels. The number of classes is the
    /// largest label observed.
    pub fn from_one_based(
        x: M,
        labels: &[usize],
        weights: Array1<f64>,
        config: &ObjectiveConfig,
    ) -> Result<Self, DataError> {
        let grouping = to_zero_based(labels)?;
        let n_classes = labels.iter().copied().max().unwrap_or(0);
        Self::with_config(x, grouping, n_classes, weights, config)
    }

    /// Like [`Self::from_one_based`] with every weight set to one.
    pub fn uniform_weights(
        x: M,
        labels: &[usize],
        config: &ObjectiveConfig,
    ) -> Result<Self, DataError> {
        let weights = Array1::ones(labels.len());
        Self::from_one_based(x, labels, weights, config)
    }

    pub fn n_samples(&self) -> usize {
        self.grouping.len()
    }

    pub fn x(&self) -> &M {
        &self.x
    }

    pub fn grouping(&self) -> ArrayView1<'_, usize> {
        self.grouping.view()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// A loss evaluator borrowing this package's grouping and weights.
    pub fn loss(&self) -> MultinomialLoss<'_> {
        MultinomialLoss::from_validated(self.grouping.view(), self.weights.view(), self.n_classes)
    }
}

/// Converts 1-based labels to 0-based class indices. A label of `0` is rejected.
pub fn to_zero_based(labels: &[usize]) -> Result<Array1<usize>, DataError> {
    labels
        .iter()
        .enumerate()
        .map(|(index, &label)| {
            label.checked_sub(1).ok_or_else(|| DataError::LabelOutOfRange {
                index,
                label,
                n_classes: labels.iter().copied().max().unwrap_or(0),
            })
        })
        .collect()
}

/// Weights must be finite and non-negative. Applied regardless of
/// `check_finite_inputs`, since the loss evaluator relies on it.
pub(crate) fn validate_weights(weights: ArrayView1<f64>) -> Result<(), DataError> {
    match weights
        .iter()
        .enumerate()
        .find(|&(_, &w)| !(w.is_finite() && w >= 0.0))
    {
        Some((_, &weight)) if !weight.is_finite() => Err(DataError::NonFiniteValues("weights")),
        Some((index, &weight)) => Err(DataError::NegativeWeight { index, weight }),
        None => Ok(()),
    }
}
