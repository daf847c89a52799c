//! Rotor thrust to collective force and body moment mapping
//!
//! A quadrotor mixes four rotor thrusts `t = [t1, t2, t3, t4]` into
//!
//! ```text
//! [f_col]   [ 1    1    1    1 ] [t1]
//! [ Mx  ] = [ ax1  ax2  ax3  ax4] [t2]
//! [ My  ]   [ ay1  ay2  ay3  ay4] [t3]
//! [ Mz  ]   [ κ   -κ    κ   -κ ] [t4]
//! ```
//!
//! where κ = C_M / C_T and the roll/pitch rows depend on the frame layout:
//!
//! - `X`:    lever ℓ = L·√2/2, Mx = ℓ(t1 − t2 − t3 + t4), My = ℓ(t1 + t2 − t3 − t4)
//! - `Plus`: lever ℓ = L,      Mx = ℓ(−t1 + t2 + t3 − t4), My = ℓ(−t1 − t2 + t3 + t4)
//!
//! The yaw row does not depend on the layout.

use nalgebra::{Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::{check_len, ModelError};

/// Airframe rotor arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameLayout {
    /// Rotors on the body axes
    Plus,
    /// Rotors on the body diagonals
    X,
}

impl FrameLayout {
    /// Lever arm projected onto the body roll/pitch axes
    pub fn effective_lever(&self, arm_length: f64) -> f64 {
        match self {
            FrameLayout::Plus => arm_length,
            FrameLayout::X => arm_length * std::f64::consts::SQRT_2 / 2.0,
        }
    }

    /// Signs of the (Mx, My) rows for each rotor
    fn moment_signs(&self) -> ([f64; 4], [f64; 4]) {
        match self {
            FrameLayout::Plus => ([-1.0, 1.0, 1.0, -1.0], [-1.0, -1.0, 1.0, 1.0]),
            FrameLayout::X => ([1.0, -1.0, -1.0, 1.0], [1.0, 1.0, -1.0, -1.0]),
        }
    }
}

/// Airframe geometry and rotor coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorGeometry {
    /// Rotor arrangement
    pub layout: FrameLayout,
    /// Distance from the center of the frame to each rotor [m]
    pub arm_length: f64,
    /// Rotor thrust coefficient C_T
    pub thrust_coefficient: f64,
    /// Rotor drag-moment coefficient C_M
    pub moment_coefficient: f64,
}

impl ActuatorGeometry {
    pub fn new(
        layout: FrameLayout,
        arm_length: f64,
        thrust_coefficient: f64,
        moment_coefficient: f64,
    ) -> Self {
        Self {
            layout,
            arm_length,
            thrust_coefficient,
            moment_coefficient,
        }
    }

    /// Check `arm_length > 0`, `C_T > 0` and a finite `C_M`
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.arm_length.is_finite() && self.arm_length > 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "arm length must be positive, got {}",
                self.arm_length
            )));
        }
        if !(self.thrust_coefficient.is_finite() && self.thrust_coefficient > 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "thrust coefficient must be positive, got {}",
                self.thrust_coefficient
            )));
        }
        if !self.moment_coefficient.is_finite() {
            return Err(ModelError::InvalidParameter(format!(
                "moment coefficient must be finite, got {}",
                self.moment_coefficient
            )));
        }
        Ok(())
    }
}

/// Immutable rotor mixing matrix for a given airframe
///
/// The matrix is computed once from the geometry. Changing the geometry
/// means building a new map with [`ActuatorMap::rebuild`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorMap {
    geometry: ActuatorGeometry,
    mixer: Matrix4<f64>,
}

impl ActuatorMap {
    /// Build the mixing matrix for `geometry`
    pub fn new(geometry: ActuatorGeometry) -> Result<Self, ModelError> {
        geometry.validate()?;

        let lever = geometry.layout.effective_lever(geometry.arm_length);
        let (sx, sy) = geometry.layout.moment_signs();
        let kappa = geometry.moment_coefficient / geometry.thrust_coefficient;

        let mixer = Matrix4::new(
            1.0,          1.0,          1.0,          1.0,
            lever * sx[0], lever * sx[1], lever * sx[2], lever * sx[3],
            lever * sy[0], lever * sy[1], lever * sy[2], lever * sy[3],
            kappa,        -kappa,       kappa,        -kappa,
        );

        Ok(Self { geometry, mixer })
    }

    /// Return a new map for different geometry, leaving `self` untouched
    pub fn rebuild(&self, geometry: ActuatorGeometry) -> Result<Self, ModelError> {
        Self::new(geometry)
    }

    pub fn geometry(&self) -> &ActuatorGeometry {
        &self.geometry
    }

    /// The 4×4 matrix mapping thrusts to `[f_col, Mx, My, Mz]`
    pub fn mixer(&self) -> &Matrix4<f64> {
        &self.mixer
    }

    /// Collective thrust and body moments `(f_col, [Mx, My, Mz])`
    pub fn force_and_moments(&self, thrust: &Vector4<f64>) -> (f64, Vector3<f64>) {
        let fm = self.mixer * thrust;
        (fm[0], Vector3::new(fm[1], fm[2], fm[3]))
    }

    /// Body moments `[Mx, My, Mz]`
    pub fn moments(&self, thrust: &Vector4<f64>) -> Vector3<f64> {
        self.force_and_moments(thrust).1
    }
}

/// Sum of the rotor thrusts
pub fn collective_thrust(thrust: &Vector4<f64>) -> f64 {
    thrust.sum()
}

/// Body moments produced by `thrust` on the given airframe
///
/// Fails with `InvalidDimension` if `thrust` does not have four entries and
/// with `InvalidParameter` on non-positive arm length or thrust coefficient.
pub fn thrust_to_moments(
    layout: FrameLayout,
    thrust: &[f64],
    arm_length: f64,
    thrust_coefficient: f64,
    moment_coefficient: f64,
) -> Result<Vector3<f64>, ModelError> {
    check_len(4, thrust.len())?;
    let map = ActuatorMap::new(ActuatorGeometry::new(
        layout,
        arm_length,
        thrust_coefficient,
        moment_coefficient,
    ))?;
    Ok(map.moments(&Vector4::from_column_slice(thrust)))
}
