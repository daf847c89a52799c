//! Quaternion operations for attitude representation
//!
//! Quaternions are stored scalar-first as `[w, x, y, z]` and represent the
//! body to inertial rotation. None of these primitives renormalize their
//! operands: the product is bilinear, and renormalization is a policy that
//! belongs after integration (see [`normalize`]).
//!
//! - Hamilton product via the left-multiplication matrix Λ(q)
//! - Quaternion kinematics: q̇ = 1/2 Λ(q)[0;ω]
//! - Quaternion to rotation matrix conversion
//! - Skew-symmetric (cross product) matrix

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

use crate::error::{check_len, ModelError};

/// Left-multiplication matrix Λ(q) such that q ⊗ p = Λ(q) p
///
/// ```text
/// Λ(q) = [w  -x  -y  -z]
///        [x   w  -z   y]
///        [y   z   w  -x]
///        [z  -y   x   w]
/// ```
pub fn left_multiplication_matrix(q: &Vector4<f64>) -> Matrix4<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);

    Matrix4::new(
        w, -x, -y, -z,
        x,  w, -z,  y,
        y,  z,  w, -x,
        z, -y,  x,  w,
    )
}

/// Hamilton product q1 ⊗ q2 of two quaternions given as slices
///
/// Fails with `InvalidDimension` if either operand is not of length 4.
pub fn hamilton_product(q1: &[f64], q2: &[f64]) -> Result<Vector4<f64>, ModelError> {
    check_len(4, q1.len())?;
    check_len(4, q2.len())?;

    let q1 = Vector4::from_column_slice(q1);
    let q2 = Vector4::from_column_slice(q2);
    Ok(left_multiplication_matrix(&q1) * q2)
}

/// Compute the quaternion derivative given angular velocity
///
/// q̇ = 1/2 q ⊗ [0; ω]
///
/// # Arguments
/// * `q` - Current orientation `[w, x, y, z]` (not required to be unit)
/// * `omega` - Angular velocity in body frame [rad/s]
pub fn quaternion_derivative(q: &Vector4<f64>, omega: &Vector3<f64>) -> Vector4<f64> {
    let omega_quat = Vector4::new(0.0, omega.x, omega.y, omega.z);
    0.5 * left_multiplication_matrix(q) * omega_quat
}

/// Convert a quaternion to its direction cosine matrix (body to inertial)
pub fn to_rotation_matrix(q: &Vector4<f64>) -> Matrix3<f64> {
    let (qw, qx, qy, qz) = (q[0], q[1], q[2], q[3]);

    Matrix3::new(
        1.0 - 2.0 * (qy * qy + qz * qz), 2.0 * (qx * qy - qw * qz),       2.0 * (qx * qz + qw * qy),
        2.0 * (qy * qx + qw * qz),       1.0 - 2.0 * (qx * qx + qz * qz), 2.0 * (qy * qz - qw * qx),
        2.0 * (qz * qx - qw * qy),       2.0 * (qz * qy + qw * qx),       1.0 - 2.0 * (qx * qx + qy * qy),
    )
}

/// Skew-symmetric matrix [v]ₓ such that [v]ₓ a = v × a
///
/// Fails with `InvalidDimension` if `v` is not of length 3.
pub fn skew(v: &[f64]) -> Result<Matrix3<f64>, ModelError> {
    check_len(3, v.len())?;
    let (vx, vy, vz) = (v[0], v[1], v[2]);

    Ok(Matrix3::new(
        0.0, -vz,  vy,
         vz, 0.0, -vx,
        -vy,  vx, 0.0,
    ))
}

/// Vector part `[x, y, z]` of a quaternion
pub fn vector_part(q: &Vector4<f64>) -> Vector3<f64> {
    Vector3::new(q[1], q[2], q[3])
}

/// Return `q / ‖q‖`, or `q` unchanged if its norm is zero
pub fn normalize(q: &Vector4<f64>) -> Vector4<f64> {
    let norm = q.norm();
    if norm > 0.0 {
        q / norm
    } else {
        *q
    }
}

/// Roll, pitch and yaw angles [rad] of a unit quaternion (ZYX convention)
///
/// The pitch uses the two-argument form, which stays well conditioned
/// close to ±π/2.
pub fn euler_angles(q: &Vector4<f64>) -> (f64, f64, f64) {
    let (qw, qx, qy, qz) = (q[0], q[1], q[2], q[3]);

    let roll = (2.0 * (qw * qx + qy * qz)).atan2(1.0 - 2.0 * (qx * qx + qy * qy));

    let s = 2.0 * (qw * qy - qx * qz);
    let pitch = -std::f64::consts::FRAC_PI_2
        + 2.0 * (1.0 + s).max(0.0).sqrt().atan2((1.0 - s).max(0.0).sqrt());

    let yaw = (2.0 * (qw * qz + qx * qy)).atan2(1.0 - 2.0 * (qy * qy + qz * qz));

    (roll, pitch, yaw)
}
