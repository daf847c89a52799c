//! Rotor mixing and augmented attitude dynamics
//!
//! - [`actuator`]: thrusts to collective force and body moments
//! - [`attitude`]: quaternion kinematics and Euler equations with unknown J and COM offset

pub mod actuator;
pub mod attitude;

pub use actuator::*;
pub use attitude::*;
