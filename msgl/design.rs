//! # Design Matrices
//!
//! The observation matrix `X` (`n x p`) behind the objective adapter. Only the
//! products the loss needs are exposed: `X β`, `Xᵗ G` and the non-zero
//! entries of one column. Dense storage is a plain `Array2<f64>`; sparse
//! storage is a compressed-column `faer` matrix. [`AnyDesign`] picks one of the
//! two from [`ObjectiveConfig::backend`] at run time.

use crate::config::{DesignBackend, ObjectiveConfig};
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignError {
    #[error("Failed to assemble the sparse design matrix: {0}")]
    SparseConstruction(String),
    #[error("Sparse entry ({row}, {col}) lies outside a {nrows} x {ncols} matrix.")]
    EntryOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
}

/// The observation-matrix capability the multinomial objective relies on.
///
/// The loss logic is written once against this trait; dense and sparse storage
/// only differ in how the two products below are carried out.
pub trait DesignMatrix {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;

    /// `X · B` for a `ncols x k` coefficient matrix, giving `nrows x k` linear predictors.
    fn multiply(&self, coefficients: ArrayView2<f64>) -> Array2<f64>;

    /// `Xᵗ · G` for a `nrows x k` matrix, giving a `ncols x k` result.
    fn transpose_multiply(&self, per_sample: ArrayView2<f64>) -> Array2<f64>;

    /// The stored `(row, value)` entries of column `col`.
    fn column_entries(&self, col: usize) -> Vec<(usize, f64)>;

    fn has_only_finite(&self) -> bool;
}

impl DesignMatrix for Array2<f64> {
    fn nrows(&self) -> usize {
        self.shape()[0]
    }

    fn ncols(&self) -> usize {
        self.shape()[1]
    }

    fn multiply(&self, coefficients: ArrayView2<f64>) -> Array2<f64> {
        self.dot(&coefficients)
    }

    fn transpose_multiply(&self, per_sample: ArrayView2<f64>) -> Array2<f64> {
        self.t().dot(&per_sample)
    }

    fn column_entries(&self, col: usize) -> Vec<(usize, f64)> {
        self.column(col)
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v != 0.0)
            .map(|(row, &v)| (row, v))
            .collect()
    }

    fn has_only_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

/// Compressed sparse column design matrix.
#[derive(Clone, Debug)]
pub struct SparseDesign {
    matrix: SparseColMat<usize, f64>,
}

impl SparseDesign {
    pub fn new(matrix: SparseColMat<usize, f64>) -> Self {
        Self { matrix }
    }

    /// Builds the matrix from `(row, col, value)` triplets. Duplicate positions are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, DesignError> {
        let mut triplets = Vec::with_capacity(entries.len());
        for &(row, col, value) in entries {
            if row >= nrows || col >= ncols {
                return Err(DesignError::EntryOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                });
            }
            triplets.push(Triplet::new(row, col, value));
        }
        let matrix = SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
            .map_err(|e| DesignError::SparseConstruction(format!("{:?}", e)))?;
        Ok(Self { matrix })
    }

    /// Converts a dense matrix, keeping only entries with `|value| > tol`.
    pub fn from_dense(dense: &Array2<f64>, tol: f64) -> Result<Self, DesignError> {
        let mut entries = Vec::new();
        for ((row, col), &value) in dense.indexed_iter() {
            if value.abs() > tol {
                entries.push((row, col, value));
            }
        }
        Self::from_triplets(dense.nrows(), dense.ncols(), &entries)
    }

    pub fn nnz(&self) -> usize {
        let (_, values) = self.matrix.parts();
        values.len()
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((self.matrix.nrows(), self.matrix.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..self.matrix.ncols() {
            for idx in col_ptr[col]..col_ptr[col + 1] {
                out[[row_idx[idx], col]] += values[idx];
            }
        }
        out
    }
}

impl DesignMatrix for SparseDesign {
    fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    fn multiply(&self, coefficients: ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(coefficients.nrows(), self.matrix.ncols());
        let mut out = Array2::<f64>::zeros((self.matrix.nrows(), coefficients.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..self.matrix.ncols() {
            let beta_row = coefficients.row(col);
            for idx in col_ptr[col]..col_ptr[col + 1] {
                out.row_mut(row_idx[idx]).scaled_add(values[idx], &beta_row);
            }
        }
        out
    }

    fn transpose_multiply(&self, per_sample: ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(per_sample.nrows(), self.matrix.nrows());
        let mut out = Array2::<f64>::zeros((self.matrix.ncols(), per_sample.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..self.matrix.ncols() {
            let mut acc = out.row_mut(col);
            for idx in col_ptr[col]..col_ptr[col + 1] {
                acc.scaled_add(values[idx], &per_sample.row(row_idx[idx]));
            }
        }
        out
    }

    fn column_entries(&self, col: usize) -> Vec<(usize, f64)> {
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        (col_ptr[col]..col_ptr[col + 1])
            .map(|idx| (row_idx[idx], values[idx]))
            .collect()
    }

    fn has_only_finite(&self) -> bool {
        let (_, values) = self.matrix.parts();
        values.iter().all(|v| v.is_finite())
    }
}

/// A design matrix whose storage was chosen at configuration time.
#[derive(Clone)]
pub enum AnyDesign {
    Dense(Array2<f64>),
    Sparse(SparseDesign),
}

impl AnyDesign {
    pub fn from_dense(x: Array2<f64>, config: &ObjectiveConfig) -> Result<Self, DesignError> {
        match config.backend {
            DesignBackend::Dense => Ok(Self::Dense(x)),
            DesignBackend::Sparse => {
                let sparse = SparseDesign::from_dense(&x, config.sparse_drop_tolerance)?;
                log::info!(
                    "Stored {} x {} design matrix as sparse ({} non-zeros)",
                    x.nrows(),
                    x.ncols(),
                    sparse.nnz()
                );
                Ok(Self::Sparse(sparse))
            }
        }
    }

    pub fn backend(&self) -> DesignBackend {
        match self {
            Self::Dense(_) => DesignBackend::Dense,
            Self::Sparse(_) => DesignBackend::Sparse,
        }
    }
}

impl DesignMatrix for AnyDesign {
    fn nrows(&self) -> usize {
        match self {
            Self::Dense(x) => DesignMatrix::nrows(x),
            Self::Sparse(x) => x.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            Self::Dense(x) => DesignMatrix::ncols(x),
            Self::Sparse(x) => x.ncols(),
        }
    }

    fn multiply(&self, coefficients: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Dense(x) => x.multiply(coefficients),
            Self::Sparse(x) => x.multiply(coefficients),
        }
    }

    fn transpose_multiply(&self, per_sample: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Dense(x) => x.transpose_multiply(per_sample),
            Self::Sparse(x) => x.transpose_multiply(per_sample),
        }
    }

    fn column_entries(&self, col: usize) -> Vec<(usize, f64)> {
        match self {
            Self::Dense(x) => x.column_entries(col),
            Self::Sparse(x) => x.column_entries(col),
        }
    }

    fn has_only_finite(&self) -> bool {
        match self {
            Self::Dense(x) => x.has_only_finite(),
            Self::Sparse(x) => x.has_only_finite(),
        }
    }
}
