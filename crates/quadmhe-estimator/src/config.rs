//! Estimator configuration
//!
//! Horizon, weights, airframe and solver settings, loadable from TOML:
//!
//! ```toml
//! [horizon]
//! dt = 0.01
//! horizon_time = 0.5
//!
//! [weights]
//! measurement = [1e6, 1e6, 1e6, 1e6, 1e6, 1e6, 1e6]
//! process = [1e4, 1e4, 1e4, 1e4, 1e4, 1e4, 1e4]
//! arrival = [1e6, 1e6, 1e6, 1e6, 1e6, 1e6, 1e6, 1e4, 1e4, 1e4, 1e4, 1e4]
//!
//! [airframe]
//! layout = "x"
//! arm_length = 0.33
//!
//! [solver]
//! max_iterations = 100
//! ```
//!
//! Weights are given as diagonals of `R`, `Q` and `Q0`.

use std::path::Path;

use nalgebra::DMatrix;
use quadmhe_core::dynamics::{MEASURED_DIM, STATE_DIM};
use quadmhe_core::simulation::AirframeConfig;
use serde::{Deserialize, Serialize};

use crate::error::{check_dim, EstimatorError};
use crate::model::{MheModel, NOISE_DIM};
use crate::ocp::{Configured, MheProblem, MheProblemBuilder};
use crate::solver::SolverOptions;

/// Main estimator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub horizon: HorizonConfig,
    pub weights: WeightConfig,
    pub airframe: AirframeConfig,
    pub solver: SolverOptions,
}

/// Horizon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Sampling step [s]
    pub dt: f64,
    /// Horizon span [s]
    pub horizon_time: f64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            horizon_time: 0.5,
        }
    }
}

/// Diagonal inverse-covariance weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Diagonal of `R` on `[q; ω]`
    pub measurement: Vec<f64>,
    /// Diagonal of `Q` on the process noise
    pub process: Vec<f64>,
    /// Diagonal of `Q0` on `[q; ω; J; r]`
    pub arrival: Vec<f64>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        let mut arrival = vec![1e6; MEASURED_DIM];
        arrival.extend([1e4; STATE_DIM - MEASURED_DIM]);
        Self {
            // σ = 1e-3 measurement noise
            measurement: vec![1e6; MEASURED_DIM],
            process: vec![1e4; NOISE_DIM],
            arrival,
        }
    }
}

fn diagonal(what: &'static str, values: &[f64], dim: usize) -> Result<DMatrix<f64>, EstimatorError> {
    check_dim(what, dim, values.len())?;
    Ok(DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(values)))
}

impl WeightConfig {
    /// `(R, Q0, Q)` weight matrices
    pub fn matrices(&self) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>), EstimatorError> {
        Ok((
            diagonal("measurement weight", &self.measurement, MEASURED_DIM)?,
            diagonal("arrival weight", &self.arrival, STATE_DIM)?,
            diagonal("process weight", &self.process, NOISE_DIM)?,
        ))
    }
}

impl EstimatorConfig {
    /// Parse a TOML document; missing sections take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, EstimatorError> {
        toml::from_str(s).map_err(|e| EstimatorError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EstimatorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EstimatorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, EstimatorError> {
        toml::to_string(self).map_err(|e| EstimatorError::Config(e.to_string()))
    }

    /// Problem builder with the configured model, horizon and weights
    pub fn builder(&self) -> Result<MheProblemBuilder<Configured>, EstimatorError> {
        let model = MheModel::from_airframe(&self.airframe)?;
        let (r, q0, q) = self.weights.matrices()?;
        MheProblemBuilder::new(
            model,
            self.horizon.dt,
            self.horizon.horizon_time,
            r,
            q0,
            q,
            STATE_DIM - MEASURED_DIM,
        )
    }

    /// Fully assembled problem
    pub fn problem(&self) -> Result<MheProblem, EstimatorError> {
        Ok(self
            .builder()?
            .set_cost()
            .set_solver(self.solver.clone())?
            .build())
    }
}
