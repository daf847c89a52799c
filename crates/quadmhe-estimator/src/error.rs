//! Estimator error type

use quadmhe_core::ModelError;
use thiserror::Error;

use crate::solver::SolveStatus;

/// Errors raised while building or running the moving-horizon estimator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error("Invalid horizon: tf = {tf} is not a positive integer multiple of dt = {dt}")]
    InvalidHorizon { dt: f64, tf: f64 },
    #[error("Invalid {what} dimension: expected {expected}, got {got}")]
    InvalidDimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Solver did not converge: {status:?} after {iterations} iterations")]
    SolverNonConvergence { status: SolveStatus, iterations: usize },
    #[error("Solver backend failure: {0}")]
    BackendFailure(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Fail with `InvalidDimension` unless `got == expected`
pub(crate) fn check_dim(what: &'static str, expected: usize, got: usize) -> Result<(), EstimatorError> {
    if expected == got {
        Ok(())
    } else {
        Err(EstimatorError::InvalidDimension { what, expected, got })
    }
}
