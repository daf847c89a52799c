//! Moving-horizon estimation for multirotor attitude and inertial parameters
//!
//! Jointly estimates attitude, body rates, principal inertia `J` and the
//! horizontal center-of-mass offset `r` from noisy attitude and rate
//! measurements plus the commanded rotor thrusts.
//!
//! # Architecture
//!
//! Each window of N+1 samples is a multiple-shooting least-squares problem:
//!
//! ```text
//! minimize    ½‖x₀ − x̄₀‖²_Q0 + Σ ½‖yₖ − xₖ[0:7]‖²_R + Σ ½‖wₖ‖²_Q
//! subject to  xₖ₊₁ = F(xₖ, wₖ, uₖ)
//! ```
//!
//! # Components
//!
//! - [`model`]: process model with additive noise
//! - [`ocp`]: horizon, weights and the typestate problem builder
//! - [`solver`]: NLP backend trait and the Gauss-Newton SQP backend
//! - [`estimator`]: per-window solve and estimate accessors
//! - [`window`]: sliding-window driver over a sample stream
//! - [`config`]: TOML configuration

pub mod config;
pub mod error;
pub mod estimator;
pub mod model;
pub mod ocp;
pub mod solver;
pub mod window;

// acados backend (only when feature is enabled)
#[cfg(feature = "acados")]
pub mod acados_ffi;

pub use config::EstimatorConfig;
pub use error::EstimatorError;
pub use estimator::{HorizonWindow, MheEstimate, MovingHorizonEstimator};
pub use model::MheModel;
pub use ocp::{MheProblem, MheProblemBuilder};
pub use solver::{GaussNewtonSolver, NlpSolverBackend, SolveStatus, SolverOptions};
pub use window::SlidingHorizon;
