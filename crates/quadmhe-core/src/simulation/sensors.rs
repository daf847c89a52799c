//! Sensor models for simulation
//!
//! Adds zero-mean Gaussian noise to the measured sub-state `[q; ω]`.
//! Noisy quaternions are not renormalized.

use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::SensorConfig;
use crate::dynamics::{AugmentedState, MEASURED_DIM, QUATERNION_DIM};
use crate::error::ModelError;

fn gaussian(std_dev: f64, what: &str) -> Result<Normal<f64>, ModelError> {
    Normal::new(0.0, std_dev).map_err(|e| {
        ModelError::InvalidParameter(format!("{} noise std dev {}: {}", what, std_dev, e))
    })
}

/// Orientation and gyroscope sensor
#[derive(Debug, Clone)]
pub struct AttitudeSensor {
    quaternion_noise: Normal<f64>,
    rate_noise: Normal<f64>,
    rng: ChaCha8Rng,
}

impl AttitudeSensor {
    /// # Arguments
    /// * `quaternion_noise_std` - Std dev added to each quaternion component
    /// * `rate_noise_std` - Gyroscope noise std dev [rad/s]
    /// * `seed` - RNG seed, equal seeds give equal noise sequences
    pub fn new(quaternion_noise_std: f64, rate_noise_std: f64, seed: u64) -> Result<Self, ModelError> {
        Ok(Self {
            quaternion_noise: gaussian(quaternion_noise_std, "quaternion")?,
            rate_noise: gaussian(rate_noise_std, "rate")?,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn from_config(config: &SensorConfig) -> Result<Self, ModelError> {
        Self::new(config.quaternion_noise_std, config.rate_noise_std, config.seed)
    }

    /// Noisy measurement `[q; ω]` of `state`
    pub fn measure(&mut self, state: &AugmentedState) -> DVector<f64> {
        let mut y = state.measured();
        for (i, value) in y.iter_mut().enumerate() {
            let noise = if i < QUATERNION_DIM {
                self.quaternion_noise.sample(&mut self.rng)
            } else {
                self.rate_noise.sample(&mut self.rng)
            };
            *value += noise;
        }
        debug_assert_eq!(y.len(), MEASURED_DIM);
        y
    }
}
