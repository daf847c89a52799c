//! Moving-horizon estimator
//!
//! Each solve takes one window of N+1 measurements, the rotor thrusts
//! applied between them and an arrival prior for the first node, and returns
//! the smoothed augmented trajectory. The parameter estimates (`J`, `r`) of
//! the latest node are the identification result.

use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use quadmhe_core::dynamics::AugmentedState;

use crate::error::{check_dim, EstimatorError};
use crate::ocp::MheProblem;
use crate::solver::{
    BackendSolution, GaussNewtonSolver, InitialGuess, NlpSolverBackend, SolveStatistics,
    SolveStatus,
};

/// Data for one horizon solve
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonWindow {
    measurements: Vec<DVector<f64>>,
    controls: Vec<DVector<f64>>,
    arrival: AugmentedState,
}

impl HorizonWindow {
    /// Validate a window against `problem`
    ///
    /// # Arguments
    /// * `measurements` - N+1 measured states `[q; ω]`
    /// * `controls` - N (or N+1) rotor thrust vectors
    /// * `arrival` - Prior on the first node, its inertia must be non-singular
    pub fn new(
        problem: &MheProblem,
        measurements: Vec<DVector<f64>>,
        controls: Vec<DVector<f64>>,
        arrival: AugmentedState,
    ) -> Result<Self, EstimatorError> {
        problem
            .model()
            .dynamics()
            .check_inertia(&arrival.inertia)?;
        problem.stage_data(&measurements, &controls, &arrival.to_vector())?;

        Ok(Self {
            measurements,
            controls,
            arrival,
        })
    }

    pub fn measurements(&self) -> &[DVector<f64>] {
        &self.measurements
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.controls
    }

    pub fn arrival(&self) -> &AugmentedState {
        &self.arrival
    }
}

/// Result of one horizon solve
#[derive(Debug, Clone)]
pub struct MheEstimate {
    /// Augmented states, one column per node (`12 × (N+1)`)
    pub trajectory: DMatrix<f64>,
    /// Process noise, one column per interval (`7 × N`)
    pub noise: DMatrix<f64>,
    pub status: SolveStatus,
    pub statistics: SolveStatistics,
}

impl MheEstimate {
    fn from_solution(solution: BackendSolution) -> Self {
        Self {
            trajectory: DMatrix::from_columns(&solution.states),
            noise: DMatrix::from_columns(&solution.noise),
            status: solution.status,
            statistics: solution.statistics,
        }
    }

    /// Number of nodes (N+1)
    pub fn len(&self) -> usize {
        self.trajectory.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory.ncols() == 0
    }

    /// State at node `k`
    pub fn state(&self, k: usize) -> Option<AugmentedState> {
        if k >= self.len() {
            return None;
        }
        let x = self.trajectory.column(k).into_owned();
        AugmentedState::from_slice(x.as_slice()).ok()
    }

    /// State at the last node
    pub fn latest(&self) -> Option<AugmentedState> {
        self.len().checked_sub(1).and_then(|k| self.state(k))
    }

    /// Principal inertia estimate at the last node
    pub fn inertia(&self) -> Vector3<f64> {
        self.latest()
            .map(|s| s.inertia)
            .unwrap_or_else(Vector3::zeros)
    }

    /// COM offset estimate at the last node
    pub fn com_offset(&self) -> Vector2<f64> {
        self.latest()
            .map(|s| s.com_offset)
            .unwrap_or_else(Vector2::zeros)
    }

    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }

    /// Turn a non-converged result into `SolverNonConvergence`
    pub fn ensure_converged(self) -> Result<Self, EstimatorError> {
        if self.is_converged() {
            Ok(self)
        } else {
            Err(EstimatorError::SolverNonConvergence {
                status: self.status,
                iterations: self.statistics.iterations,
            })
        }
    }
}

/// Moving-horizon estimator over a prepared problem
///
/// # Example
/// ```ignore
/// let mut mhe = MheProblemBuilder::new(model, 0.01, 0.5, r, q0, q, 5)?
///     .set_cost()
///     .set_solver(SolverOptions::default())?
///     .build_estimator(GaussNewtonSolver::new())?;
/// let estimate = mhe.solve(&window)?;
/// ```
pub struct MovingHorizonEstimator<B: NlpSolverBackend = GaussNewtonSolver> {
    problem: MheProblem,
    backend: B,
    /// Last solution, used for warm starting
    previous: Option<MheEstimate>,
}

impl<B: NlpSolverBackend> MovingHorizonEstimator<B> {
    /// Prepare `backend` for `problem`
    pub fn new(problem: MheProblem, mut backend: B) -> Result<Self, EstimatorError> {
        backend.prepare(&problem).map_err(|e| match e {
            EstimatorError::BackendFailure(_) => e,
            other => EstimatorError::BackendFailure(other.to_string()),
        })?;

        log::info!(
            "prepared {} backend: N = {}, dt = {} s",
            backend.name(),
            problem.dims().n,
            problem.horizon().dt()
        );

        Ok(Self {
            problem,
            backend,
            previous: None,
        })
    }

    pub fn problem(&self) -> &MheProblem {
        &self.problem
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Last estimate, if any
    pub fn previous(&self) -> Option<&MheEstimate> {
        self.previous.as_ref()
    }

    /// Forget the previous solution
    pub fn reset_warm_start(&mut self) {
        self.previous = None;
    }

    /// Starting point: measured sub-state per node, parameters from the
    /// previous solution when warm starting, else from the arrival prior
    fn initial_guess(&self, window: &HorizonWindow) -> InitialGuess {
        let d = self.problem.dims();

        let warm = self
            .previous
            .as_ref()
            .filter(|_| self.problem.options().warm_start)
            .and_then(|p| p.latest());
        let params = match warm {
            Some(state) => state.parameters(),
            None => window.arrival.parameters(),
        };

        let states = window
            .measurements
            .iter()
            .map(|y| {
                let mut x = DVector::zeros(d.nx_aug);
                x.rows_mut(0, d.nx).copy_from(y);
                x.rows_mut(d.nx, d.num_param).copy_from(&params);
                x
            })
            .collect();

        InitialGuess {
            states,
            noise: vec![DVector::zeros(d.nu); d.n],
        }
    }

    /// Solve one horizon window
    ///
    /// A non-converged solve still returns the best iterate with its
    /// status; use [`MheEstimate::ensure_converged`] to make it an error.
    pub fn solve(&mut self, window: &HorizonWindow) -> Result<MheEstimate, EstimatorError> {
        let stages = self.problem.stage_data(
            &window.measurements,
            &window.controls,
            &window.arrival.to_vector(),
        )?;
        let guess = self.initial_guess(window);

        let solution = self.backend.solve(&self.problem, &stages, Some(&guess))?;
        check_solution(&solution, &self.problem)?;
        let estimate = MheEstimate::from_solution(solution);

        let j = estimate.inertia();
        let r = estimate.com_offset();
        log::info!(
            "{:?} after {} iterations ({:.1} ms): J = [{:.5}, {:.5}, {:.5}], r = [{:.5}, {:.5}]",
            estimate.status,
            estimate.statistics.iterations,
            estimate.statistics.solve_time_ms,
            j.x,
            j.y,
            j.z,
            r.x,
            r.y
        );
        if !estimate.is_converged() {
            log::warn!(
                "horizon solve ended with {:?}, cost {:.3e}, max gap {:.3e}",
                estimate.status,
                estimate.statistics.cost,
                estimate.statistics.max_gap
            );
        }

        self.previous = Some(estimate.clone());
        Ok(estimate)
    }
}

/// Check a backend solution against the problem dimensions
fn check_solution(solution: &BackendSolution, problem: &MheProblem) -> Result<(), EstimatorError> {
    let d = problem.dims();
    let malformed = |e: EstimatorError| EstimatorError::BackendFailure(format!("malformed solution: {}", e));

    check_dim("solution states", d.n + 1, solution.states.len()).map_err(malformed)?;
    check_dim("solution noise", d.n, solution.noise.len()).map_err(malformed)?;
    for x in &solution.states {
        check_dim("solution state", d.nx_aug, x.len()).map_err(malformed)?;
    }
    for w in &solution.noise {
        check_dim("solution noise", d.nu, w.len()).map_err(malformed)?;
    }
    Ok(())
}
