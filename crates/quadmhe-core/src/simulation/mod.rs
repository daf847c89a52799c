//! Reference trajectory generation
//!
//! Produces true attitude trajectories and noisy measurements for
//! exercising the estimator.

pub mod simulator;
pub mod config;
pub mod sensors;

pub use simulator::*;
pub use config::*;
pub use sensors::*;
