//! # Multinomial Response
//!
//! Post-fit view of a single sample: the raw linear predictors, their softmax
//! probabilities and the predicted class. Classes are reported 1-based here,
//! matching the labels callers supply to [`crate::data::MultinomialData::from_one_based`].

use crate::design::DesignMatrix;
use crate::multinomial::softmax;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ResponseError {
    #[error("A response needs at least one linear predictor.")]
    Empty,
    #[error("Linear predictors contain NaN or infinite values: {0:?}")]
    NonFinite(Vec<f64>),
    #[error("Response {index} has {found} classes, but the first response has {expected}.")]
    RaggedClasses {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Coefficient matrix has {found} rows, but the design matrix has {expected} columns.")]
    CoefficientShape { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultinomialResponse {
    /// 1-based
    predicted_class: usize,
    linear_predictors: Array1<f64>,
    probabilities: Array1<f64>,
}

impl MultinomialResponse {
    pub fn new(linear_predictors: Array1<f64>) -> Result<Self, ResponseError> {
        if linear_predictors.is_empty() {
            return Err(ResponseError::Empty);
        }
        let probabilities = softmax(linear_predictors.view())
            .ok_or_else(|| ResponseError::NonFinite(linear_predictors.to_vec()))?;
        let predicted_class = first_argmax(linear_predictors.view()) + 1;
        Ok(Self {
            predicted_class,
            linear_predictors,
            probabilities,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.linear_predictors.len()
    }

    pub fn predicted_class(&self) -> usize {
        self.predicted_class
    }

    pub fn linear_predictors(&self) -> ArrayView1<'_, f64> {
        self.linear_predictors.view()
    }

    pub fn probabilities(&self) -> ArrayView1<'_, f64> {
        self.probabilities.view()
    }
}

/// Index of the largest value; ties go to the lowest index.
fn first_argmax(values: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Column-aligned report of many responses, one row per response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSummary {
    pub link: Array2<f64>,
    pub response: Array2<f64>,
    pub classes: Array1<usize>,
}

impl ResponseSummary {
    pub fn from_responses(responses: &[MultinomialResponse]) -> Result<Self, ResponseError> {
        let Some(first) = responses.first() else {
            return Ok(Self {
                link: Array2::zeros((0, 0)),
                response: Array2::zeros((0, 0)),
                classes: Array1::zeros(0),
            });
        };
        let k = first.n_classes();
        if let Some((index, r)) = responses
            .iter()
            .enumerate()
            .find(|(_, r)| r.n_classes() != k)
        {
            return Err(ResponseError::RaggedClasses {
                index,
                expected: k,
                found: r.n_classes(),
            });
        }

        let n = responses.len();
        let mut link = Array2::<f64>::zeros((n, k));
        let mut response = Array2::<f64>::zeros((n, k));
        for (i, r) in responses.iter().enumerate() {
            link.row_mut(i).assign(&r.linear_predictors);
            response.row_mut(i).assign(&r.probabilities);
        }
        let classes = responses.iter().map(|r| r.predicted_class).collect();
        Ok(Self {
            link,
            response,
            classes,
        })
    }
}

/// Builds one response per row of `X · beta`.
pub fn predict<M: DesignMatrix>(
    x: &M,
    beta: ArrayView2<f64>,
) -> Result<Vec<MultinomialResponse>, ResponseError> {
    if beta.nrows() != x.ncols() {
        return Err(ResponseError::CoefficientShape {
            expected: x.ncols(),
            found: beta.nrows(),
        });
    }
    let lp = x.multiply(beta);
    lp.rows()
        .into_iter()
        .map(|row| MultinomialResponse::new(row.to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::SparseDesign;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_predicted_class_is_one_based_argmax() {
        let r = MultinomialResponse::new(array![0.1, 0.9, 0.2]).unwrap();
        assert_eq!(r.predicted_class(), 2);
        assert_eq!(r.n_classes(), 3);
        assert_eq!(r.linear_predictors(), array![0.1, 0.9, 0.2].view());
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let r = MultinomialResponse::new(array![-1.0, 2.0, 2.0, 0.0]).unwrap();
        assert_eq!(r.predicted_class(), 2);
        let r = MultinomialResponse::new(array![0.0, 0.0]).unwrap();
        assert_eq!(r.predicted_class(), 1);
    }

    #[test]
    fn test_zero_predictors_give_uniform_probabilities() {
        let r = MultinomialResponse::new(array![0.0, 0.0, 0.0]).unwrap();
        for &p in r.probabilities().iter() {
            assert_abs_diff_eq!(p, 1.0 / 3.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_large_predictors_stay_finite() {
        let r = MultinomialResponse::new(array![900.0, 899.0]).unwrap();
        let p = r.probabilities();
        assert_abs_diff_eq!(p.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[0], 1.0 / (1.0 + (-1f64).exp()), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert_eq!(
            MultinomialResponse::new(Array1::zeros(0)).unwrap_err(),
            ResponseError::Empty
        );
        assert!(matches!(
            MultinomialResponse::new(array![f64::NAN, 1.0]),
            Err(ResponseError::NonFinite(_))
        ));
    }

    #[test]
    fn test_summary_is_row_aligned() {
        let responses = vec![
            MultinomialResponse::new(array![1.0, 0.0, -1.0]).unwrap(),
            MultinomialResponse::new(array![0.0, 0.0, 3.0]).unwrap(),
        ];
        let summary = ResponseSummary::from_responses(&responses).unwrap();
        assert_eq!(summary.link, array![[1.0, 0.0, -1.0], [0.0, 0.0, 3.0]]);
        assert_eq!(summary.response.row(1), responses[1].probabilities());
        assert_eq!(summary.classes, array![1, 3]);
    }

    #[test]
    fn test_summary_of_nothing_is_empty() {
        let summary = ResponseSummary::from_responses(&[]).unwrap();
        assert_eq!(summary.link.dim(), (0, 0));
        assert_eq!(summary.response.dim(), (0, 0));
        assert!(summary.classes.is_empty());
    }

    #[test]
    fn test_summary_rejects_ragged_classes() {
        let responses = vec![
            MultinomialResponse::new(array![1.0, 0.0]).unwrap(),
            MultinomialResponse::new(array![0.0, 0.0, 3.0]).unwrap(),
        ];
        assert_eq!(
            ResponseSummary::from_responses(&responses).unwrap_err(),
            ResponseError::RaggedClasses {
                index: 1,
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_summary_serializes_with_report_labels() {
        let responses = vec![MultinomialResponse::new(array![0.0, 1.0]).unwrap()];
        let summary = ResponseSummary::from_responses(&responses).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("link").is_some());
        assert!(json.get("response").is_some());
        assert!(json.get("classes").is_some());
    }

    #[test]
    fn test_predict_dense_and_sparse_agree() {
        let x = array![[1.0, 0.0], [0.0, 2.0], [1.0, -1.0]];
        let beta = array![[1.0, -1.0, 0.0], [0.0, 0.5, 1.0]];
        let sparse = SparseDesign::from_dense(&x, 0.0).unwrap();

        let dense_pred = predict(&x, beta.view()).unwrap();
        let sparse_pred = predict(&sparse, beta.view()).unwrap();
        assert_eq!(dense_pred.len(), 3);
        let classes: Vec<usize> = dense_pred.iter().map(|r| r.predicted_class()).collect();
        assert_eq!(classes, vec![1, 3, 1]);
        for (a, b) in dense_pred.iter().zip(sparse_pred.iter()) {
            assert_eq!(a.predicted_class(), b.predicted_class());
            for (pa, pb) in a.probabilities().iter().zip(b.probabilities().iter()) {
                assert_abs_diff_eq!(*pa, *pb, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_predict_checks_coefficient_rows() {
        let x = array![[1.0, 0.0], [0.0, 2.0]];
        let beta = Array2::<f64>::zeros((3, 2));
        assert_eq!(
            predict(&x, beta.view()).unwrap_err(),
            ResponseError::CoefficientShape {
                expected: 2,
                found: 3
            }
        );
    }
}
