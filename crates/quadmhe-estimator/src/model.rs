//! MHE process model
//!
//! The estimator treats the attitude dynamics as a noisy process:
//!
//! ```text
//! ẋ = f(x, u) + [w; 0]
//! ```
//!
//! where the process noise `w` (7 entries) perturbs the quaternion and
//! angular-velocity channels and the parameters `[J; r]` stay constant.
//! In the horizon problem `w` is the free "control" of each shooting
//! interval and the rotor thrusts `u` are known stage parameters.

use nalgebra::DVector;
use quadmhe_core::dynamics::{AttitudeDynamics, MEASURED_DIM, STATE_DIM, THRUST_DIM};
use quadmhe_core::math::rk4_substeps;
use quadmhe_core::simulation::AirframeConfig;
use quadmhe_core::ModelError;

/// Process noise entries
pub const NOISE_DIM: usize = MEASURED_DIM;

/// Attitude dynamics with additive process noise
#[derive(Debug, Clone)]
pub struct MheModel {
    dynamics: AttitudeDynamics,
}

impl MheModel {
    pub fn new(dynamics: AttitudeDynamics) -> Self {
        Self { dynamics }
    }

    /// Build the model for an airframe description
    pub fn from_airframe(airframe: &AirframeConfig) -> Result<Self, ModelError> {
        Ok(Self::new(airframe.to_dynamics()?))
    }

    pub fn dynamics(&self) -> &AttitudeDynamics {
        &self.dynamics
    }

    /// Augmented state dimension
    pub fn nx_aug(&self) -> usize {
        STATE_DIM
    }

    /// Process noise dimension
    pub fn nw(&self) -> usize {
        NOISE_DIM
    }

    /// Stage parameter (rotor thrust) dimension
    pub fn np(&self) -> usize {
        THRUST_DIM
    }

    /// Explicit continuous dynamics `f(x, u) + [w; 0]`
    pub fn f_expl(
        &self,
        x: &DVector<f64>,
        noise: &DVector<f64>,
        thrust: &DVector<f64>,
    ) -> Result<DVector<f64>, ModelError> {
        if noise.len() != NOISE_DIM {
            return Err(ModelError::InvalidDimension {
                expected: NOISE_DIM,
                got: noise.len(),
            });
        }
        let mut x_dot = self.dynamics.f(0.0, x, thrust)?;
        let mut driven = x_dot.rows_mut(0, NOISE_DIM);
        driven += noise;
        Ok(x_dot)
    }

    /// Discrete transition over one interval of length `dt`
    ///
    /// Noise and thrust are held constant across the interval, which is
    /// split into `num_steps` RK4 sub-steps.
    pub fn transition(
        &self,
        x: &DVector<f64>,
        noise: &DVector<f64>,
        thrust: &DVector<f64>,
        dt: f64,
        num_steps: usize,
    ) -> Result<DVector<f64>, ModelError> {
        rk4_substeps(
            |_t, x, u| self.f_expl(x, noise, u),
            x,
            thrust,
            [0.0, dt],
            num_steps,
        )
    }
}
