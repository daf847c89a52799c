//! Quaternion algebra and fixed-step integration

pub mod quaternion;
pub mod integrator;

pub use quaternion::*;
pub use integrator::*;
