//! Augmented rotational dynamics
//!
//! State layout (12 entries):
//!
//! ```text
//! x = [q (4) | ω (3) | J (3) | r (2)]
//! ```
//!
//! - q: orientation quaternion `[w, x, y, z]`, body to inertial
//! - ω: angular velocity [rad/s] (body frame)
//! - J: principal moments of inertia [kg·m²]
//! - r: center-of-mass offset `[rx, ry]` [m] in the rotor plane
//!
//! Dynamics:
//!
//! ```text
//! q̇ = 1/2 q ⊗ [0; ω]
//! ω̇ = J⁻¹ (M − r × f − ω × Jω),   f = [0, 0, f_col]
//! J̇ = 0
//! ṙ = 0
//! ```
//!
//! With diagonal J the gyroscopic term of axis i is `(Jk − Jj)/Ji · ωj ωk`
//! (cyclic) and the offset torque `r × f = [ry f_col, −rx f_col, 0]` only
//! reaches roll and pitch.

use nalgebra::{DVector, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use super::actuator::ActuatorMap;
use crate::error::{check_len, ModelError};
use crate::math::{quaternion_derivative, rk4_substeps};

/// Quaternion entries
pub const QUATERNION_DIM: usize = 4;
/// Angular velocity entries
pub const RATE_DIM: usize = 3;
/// Measured sub-state `[q; ω]`
pub const MEASURED_DIM: usize = QUATERNION_DIM + RATE_DIM;
/// Estimated parameters `[J; r]`
pub const PARAM_DIM: usize = 5;
/// Full augmented state
pub const STATE_DIM: usize = MEASURED_DIM + PARAM_DIM;
/// Rotor thrust commands
pub const THRUST_DIM: usize = 4;

/// Default lower bound on the principal moments of inertia
pub const DEFAULT_INERTIA_TOLERANCE: f64 = 1e-9;

/// Augmented attitude state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedState {
    /// Orientation `[w, x, y, z]` (body to inertial)
    pub quaternion: Vector4<f64>,
    /// Angular velocity [rad/s] (body frame)
    pub angular_velocity: Vector3<f64>,
    /// Principal moments of inertia [kg·m²]
    pub inertia: Vector3<f64>,
    /// Center-of-mass offset `[rx, ry]` [m]
    pub com_offset: Vector2<f64>,
}

impl AugmentedState {
    pub fn new(
        quaternion: Vector4<f64>,
        angular_velocity: Vector3<f64>,
        inertia: Vector3<f64>,
        com_offset: Vector2<f64>,
    ) -> Self {
        Self {
            quaternion,
            angular_velocity,
            inertia,
            com_offset,
        }
    }

    /// At rest in the identity orientation with the given parameters
    pub fn at_rest(inertia: Vector3<f64>, com_offset: Vector2<f64>) -> Self {
        Self::new(
            Vector4::new(1.0, 0.0, 0.0, 0.0),
            Vector3::zeros(),
            inertia,
            com_offset,
        )
    }

    /// Unpack a 12-entry state vector
    pub fn from_slice(x: &[f64]) -> Result<Self, ModelError> {
        check_len(STATE_DIM, x.len())?;
        Ok(Self {
            quaternion: Vector4::new(x[0], x[1], x[2], x[3]),
            angular_velocity: Vector3::new(x[4], x[5], x[6]),
            inertia: Vector3::new(x[7], x[8], x[9]),
            com_offset: Vector2::new(x[10], x[11]),
        })
    }

    /// Pack into a 12-entry state vector
    pub fn to_vector(&self) -> DVector<f64> {
        let mut x = DVector::zeros(STATE_DIM);
        x.fixed_rows_mut::<4>(0).copy_from(&self.quaternion);
        x.fixed_rows_mut::<3>(4).copy_from(&self.angular_velocity);
        x.fixed_rows_mut::<3>(7).copy_from(&self.inertia);
        x.fixed_rows_mut::<2>(10).copy_from(&self.com_offset);
        x
    }

    /// The measured sub-state `[q; ω]`
    pub fn measured(&self) -> DVector<f64> {
        self.to_vector().rows(0, MEASURED_DIM).into_owned()
    }

    /// The parameter block `[J; r]`
    pub fn parameters(&self) -> DVector<f64> {
        self.to_vector().rows(MEASURED_DIM, PARAM_DIM).into_owned()
    }
}

/// Rotational dynamics of a quadrotor with unknown inertia and COM offset
#[derive(Debug, Clone)]
pub struct AttitudeDynamics {
    actuator: ActuatorMap,
    inertia_tolerance: f64,
}

impl AttitudeDynamics {
    /// # Arguments
    /// * `actuator` - Rotor mixing for the airframe
    /// * `inertia_tolerance` - Principal moments at or below this value are rejected
    pub fn new(actuator: ActuatorMap, inertia_tolerance: f64) -> Result<Self, ModelError> {
        if !(inertia_tolerance.is_finite() && inertia_tolerance >= 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "inertia tolerance must be non-negative, got {}",
                inertia_tolerance
            )));
        }
        Ok(Self {
            actuator,
            inertia_tolerance,
        })
    }

    pub fn actuator(&self) -> &ActuatorMap {
        &self.actuator
    }

    pub fn inertia_tolerance(&self) -> f64 {
        self.inertia_tolerance
    }

    /// Fail with `SingularInertia` on the first principal moment that is not
    /// finite and strictly above the tolerance
    pub fn check_inertia(&self, inertia: &Vector3<f64>) -> Result<(), ModelError> {
        for (axis, &value) in inertia.iter().enumerate() {
            if !value.is_finite() || value <= self.inertia_tolerance {
                return Err(ModelError::SingularInertia { axis, value });
            }
        }
        Ok(())
    }

    /// ω̇ for diagonal inertia, given moments and collective thrust
    pub fn angular_acceleration(
        &self,
        omega: &Vector3<f64>,
        inertia: &Vector3<f64>,
        com_offset: &Vector2<f64>,
        moments: &Vector3<f64>,
        collective_thrust: f64,
    ) -> Result<Vector3<f64>, ModelError> {
        self.check_inertia(inertia)?;

        let (wx, wy, wz) = (omega.x, omega.y, omega.z);
        let (jx, jy, jz) = (inertia.x, inertia.y, inertia.z);

        // r × f with f along body z
        let offset_torque = Vector3::new(
            com_offset.y * collective_thrust,
            -com_offset.x * collective_thrust,
            0.0,
        );
        let gyro = Vector3::new((jz - jy) * wy * wz, (jx - jz) * wz * wx, (jy - jx) * wx * wy);

        Ok((moments - offset_torque - gyro).component_div(inertia))
    }

    /// Time derivative of the augmented state under rotor thrusts `thrust`
    pub fn derivative(
        &self,
        state: &AugmentedState,
        thrust: &Vector4<f64>,
    ) -> Result<AugmentedState, ModelError> {
        let (f_col, moments) = self.actuator.force_and_moments(thrust);
        let omega_dot = self.angular_acceleration(
            &state.angular_velocity,
            &state.inertia,
            &state.com_offset,
            &moments,
            f_col,
        )?;

        Ok(AugmentedState {
            quaternion: quaternion_derivative(&state.quaternion, &state.angular_velocity),
            angular_velocity: omega_dot,
            inertia: Vector3::zeros(),
            com_offset: Vector2::zeros(),
        })
    }

    /// Continuous dynamics in vector form, `f(t, x, u) -> ẋ`
    ///
    /// `x` has 12 entries and `u` holds the 4 rotor thrusts. The model is
    /// time-invariant; `t` is accepted to match the integrator signature.
    pub fn f(&self, _t: f64, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, ModelError> {
        check_len(THRUST_DIM, u.len())?;
        let state = AugmentedState::from_slice(x.as_slice())?;
        let thrust = Vector4::new(u[0], u[1], u[2], u[3]);
        Ok(self.derivative(&state, &thrust)?.to_vector())
    }

    /// Advance `x` over `tspan` with `num_steps` RK4 sub-steps
    pub fn step(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        tspan: [f64; 2],
        num_steps: usize,
    ) -> Result<DVector<f64>, ModelError> {
        rk4_substeps(|t, x, u| self.f(t, x, u), x, u, tspan, num_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::actuator::{ActuatorGeometry, FrameLayout};
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn dynamics() -> AttitudeDynamics {
        let map = ActuatorMap::new(ActuatorGeometry::new(FrameLayout::X, 0.33, 1.0, 1.0)).unwrap();
        AttitudeDynamics::new(map, DEFAULT_INERTIA_TOLERANCE).unwrap()
    }

    #[test]
    fn test_free_rotation_matches_euler_equation() {
        let dyn_model = dynamics();
        let omega = Vector3::new(0.7, -1.3, 2.1);
        let inertia = Vector3::new(0.023, 0.026, 0.041);

        let omega_dot = dyn_model
            .angular_acceleration(&omega, &inertia, &Vector2::zeros(), &Vector3::zeros(), 3.0)
            .unwrap();

        let j = Matrix3::from_diagonal(&inertia);
        let expected = -(omega.cross(&(j * omega))).component_div(&inertia);
        assert_relative_eq!(omega_dot, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_isotropic_inertia_has_no_cross_term() {
        let dyn_model = dynamics();
        let inertia = Vector3::new(0.03, 0.03, 0.03);

        for omega in [Vector3::new(1.0, 2.0, 3.0), Vector3::new(-5.0, 0.1, 40.0)] {
            let omega_dot = dyn_model
                .angular_acceleration(&omega, &inertia, &Vector2::zeros(), &Vector3::zeros(), 0.0)
                .unwrap();
            assert_relative_eq!(omega_dot, Vector3::zeros(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_com_offset_couples_thrust_into_roll_and_pitch() {
        let dyn_model = dynamics();
        let inertia = Vector3::new(0.02, 0.025, 0.04);
        let r = Vector2::new(0.01, -0.02);
        let f_col = 4.0;

        let omega_dot = dyn_model
            .angular_acceleration(&Vector3::zeros(), &inertia, &r, &Vector3::zeros(), f_col)
            .unwrap();

        assert_relative_eq!(omega_dot.x, -r.y * f_col / inertia.x, epsilon = 1e-12);
        assert_relative_eq!(omega_dot.y, r.x * f_col / inertia.y, epsilon = 1e-12);
        assert_relative_eq!(omega_dot.z, 0.0);
    }

    #[test]
    fn test_singular_inertia() {
        let dyn_model = dynamics();
        let state = AugmentedState::at_rest(Vector3::new(0.02, 0.0, 0.04), Vector2::zeros());

        let err = dyn_model.derivative(&state, &Vector4::zeros()).unwrap_err();

        assert_eq!(err, ModelError::SingularInertia { axis: 1, value: 0.0 });
    }

    #[test]
    fn test_vector_form_dimensions() {
        let dyn_model = dynamics();
        let x = DVector::zeros(11);
        let u = DVector::zeros(4);
        assert_eq!(
            dyn_model.f(0.0, &x, &u).unwrap_err(),
            ModelError::InvalidDimension { expected: 12, got: 11 }
        );

        let x = AugmentedState::at_rest(Vector3::new(0.02, 0.02, 0.04), Vector2::zeros()).to_vector();
        assert_eq!(
            dyn_model.f(0.0, &x, &DVector::zeros(3)).unwrap_err(),
            ModelError::InvalidDimension { expected: 4, got: 3 }
        );
    }

    #[test]
    fn test_parameters_are_constant() {
        let dyn_model = dynamics();
        let state = AugmentedState::new(
            Vector4::new(0.9, 0.1, -0.2, 0.3).normalize(),
            Vector3::new(0.4, 0.5, -0.6),
            Vector3::new(0.023, 0.026, 0.041),
            Vector2::new(0.01, 0.02),
        );

        let x_dot = dyn_model
            .f(0.0, &state.to_vector(), &DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();

        assert_relative_eq!(x_dot.rows(MEASURED_DIM, PARAM_DIM).norm(), 0.0);
    }

    #[test]
    fn test_roll_input_spins_up_roll_axis() {
        let dyn_model = dynamics();
        let x0 = AugmentedState::at_rest(Vector3::new(0.023, 0.026, 0.041), Vector2::zeros()).to_vector();
        let u = DVector::from_vec(vec![0.01, -0.01, -0.01, 0.01]);

        let x1 = dyn_model.step(&x0, &u, [0.0, 0.01], 1).unwrap();

        let lever = 0.33 * 2.0_f64.sqrt() / 2.0;
        assert_relative_eq!(x1[4], 0.04 * lever / 0.023 * 0.01, epsilon = 1e-10);
        assert_relative_eq!(x1[5], 0.0, epsilon = 1e-14);
        assert_relative_eq!(x1[6], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_state_roundtrip_layout() {
        let state = AugmentedState::new(
            Vector4::new(1.0, 2.0, 3.0, 4.0),
            Vector3::new(5.0, 6.0, 7.0),
            Vector3::new(8.0, 9.0, 10.0),
            Vector2::new(11.0, 12.0),
        );

        let x = state.to_vector();

        assert_eq!(x.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(state.measured().len(), MEASURED_DIM);
        assert_eq!(state.parameters()[0], 8.0);
        assert_eq!(AugmentedState::from_slice(x.as_slice()).unwrap(), state);
    }
}
