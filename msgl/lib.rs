#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Multinomial loss core for sparse group lasso regression.
//!
//! The crate evaluates the weighted softmax negative log-likelihood of a
//! multi-class linear model together with its gradient and per-sample Hessian
//! blocks. The outer penalized solver lives elsewhere; it drives a
//! [`objective::MultinomialObjective`] (or a bare [`multinomial::MultinomialLoss`])
//! through refresh/gradient/Hessian queries.

pub mod config;
pub mod data;
pub mod design;
pub mod multinomial;
pub mod objective;
pub mod response;
