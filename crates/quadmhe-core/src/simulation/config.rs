//! Simulation configuration
//!
//! Defines configuration structures for generating reference attitude
//! trajectories and noisy measurements.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::dynamics::{
    ActuatorGeometry, ActuatorMap, AttitudeDynamics, AugmentedState, FrameLayout,
    DEFAULT_INERTIA_TOLERANCE,
};
use crate::error::ModelError;
use crate::{ComOffset, Vec3};

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Sampling step [s]
    pub dt: f64,
    /// Total simulation duration [s]
    pub duration: f64,
    /// RK4 sub-steps per sampling step
    pub integrator_steps: usize,
    /// Renormalize the quaternion after every step
    pub renormalize: bool,
    /// Airframe geometry
    pub airframe: AirframeConfig,
    /// True physical parameters
    pub truth: TruthConfig,
    /// Sensor configuration
    pub sensors: SensorConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            duration: 10.0,
            integrator_steps: 1,
            renormalize: false,
            airframe: AirframeConfig::default(),
            truth: TruthConfig::default(),
            sensors: SensorConfig::default(),
        }
    }
}

impl SimConfig {
    /// Number of sampling steps covering `duration`
    pub fn num_steps(&self) -> usize {
        (self.duration / self.dt).round().max(0.0) as usize
    }
}

/// Airframe geometry and rotor coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirframeConfig {
    /// Rotor arrangement
    pub layout: FrameLayout,
    /// Arm length [m]
    pub arm_length: f64,
    /// Thrust coefficient C_T
    pub thrust_coefficient: f64,
    /// Moment coefficient C_M
    pub moment_coefficient: f64,
    /// Principal moments at or below this are rejected as singular
    pub inertia_tolerance: f64,
}

impl Default for AirframeConfig {
    fn default() -> Self {
        Self {
            layout: FrameLayout::X,
            arm_length: 0.330,
            thrust_coefficient: 1.0,
            moment_coefficient: 1.0,
            inertia_tolerance: DEFAULT_INERTIA_TOLERANCE,
        }
    }
}

impl AirframeConfig {
    pub fn to_geometry(&self) -> ActuatorGeometry {
        ActuatorGeometry::new(
            self.layout,
            self.arm_length,
            self.thrust_coefficient,
            self.moment_coefficient,
        )
    }

    /// Build the dynamics model for this airframe
    pub fn to_dynamics(&self) -> Result<AttitudeDynamics, ModelError> {
        let actuator = ActuatorMap::new(self.to_geometry())?;
        AttitudeDynamics::new(actuator, self.inertia_tolerance)
    }
}

/// True vehicle parameters and initial motion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TruthConfig {
    /// Principal moments of inertia [kg·m²]
    pub inertia: Vec3,
    /// Center-of-mass offset [m]
    pub com_offset: ComOffset,
    /// Initial angular velocity [rad/s]
    pub angular_velocity: Vec3,
}

impl Default for TruthConfig {
    fn default() -> Self {
        Self {
            inertia: Vector3::new(0.023, 0.026, 0.041),
            com_offset: Vector2::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl TruthConfig {
    /// Initial augmented state, identity orientation
    pub fn initial_state(&self) -> AugmentedState {
        let mut state = AugmentedState::at_rest(self.inertia, self.com_offset);
        state.angular_velocity = self.angular_velocity;
        state
    }
}

/// Measurement noise
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Quaternion component noise std dev
    pub quaternion_noise_std: f64,
    /// Gyroscope noise std dev [rad/s]
    pub rate_noise_std: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            quaternion_noise_std: 1e-3,
            rate_noise_std: 1e-3,
            seed: 42,
        }
    }
}
