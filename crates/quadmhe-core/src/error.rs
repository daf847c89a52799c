//! Error type shared by the model library

use thiserror::Error;

/// Errors raised by the algebra, actuator and dynamics layers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },
    #[error("Singular inertia: principal moment {axis} is {value}")]
    SingularInertia { axis: usize, value: f64 },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Fail with `InvalidDimension` unless `got == expected`
pub(crate) fn check_len(expected: usize, got: usize) -> Result<(), ModelError> {
    if expected == got {
        Ok(())
    } else {
        Err(ModelError::InvalidDimension { expected, got })
    }
}
