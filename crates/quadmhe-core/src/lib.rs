//! # quadmhe-core
//!
//! Model library for moving-horizon estimation of multirotor attitude,
//! principal inertia and center-of-mass offset.
//!
//! ## Modules
//!
//! - [`math`]: Quaternion algebra, RK4 integration
//! - [`dynamics`]: Rotor mixing, augmented rotational dynamics
//! - [`simulation`]: Reference trajectory generation and noisy sensors
//! - [`error`]: Model error type

pub mod error;
pub mod math;
pub mod dynamics;
pub mod simulation;

pub use error::ModelError;

use nalgebra::{Vector2, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// Planar center-of-mass offset `[rx, ry]`
pub type ComOffset = Vector2<f64>;
