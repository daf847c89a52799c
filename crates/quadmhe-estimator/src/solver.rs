//! NLP solver backends
//!
//! The estimator hands an assembled [`MheProblem`] to a backend through the
//! [`NlpSolverBackend`] trait and interprets only the returned trajectory and
//! status. Two backends exist:
//!
//! - [`GaussNewtonSolver`]: in-tree SQP with a Gauss-Newton Hessian, fully
//!   condensed dense QP subproblems and finite-difference sensitivities
//! - `AcadosSolver` (feature `acados`): an acados-generated solver linked
//!   through FFI, see [`crate::acados_ffi`]

use std::time::Instant;

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{check_dim, EstimatorError};
use crate::ocp::{MheDimensions, MheProblem, StageData};

/// Outcome of a solve
///
/// Anything other than `Converged` is reported, not raised: the returned
/// trajectory is the best available iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    MaxIterations,
    Infeasible,
}

impl SolveStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveStatus::Converged)
    }

    /// Map an acados return code (acados/utils/types.h)
    ///
    /// `ACADOS_SUCCESS` and `ACADOS_MAXITER` map directly; NaN detection,
    /// minimum step, QP failure and the remaining codes are all infeasible.
    pub fn from_acados_code(code: i32) -> Self {
        match code {
            0 => SolveStatus::Converged,
            2 => SolveStatus::MaxIterations,
            _ => SolveStatus::Infeasible,
        }
    }
}

/// Solution statistics from solver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    /// Number of SQP iterations
    pub iterations: usize,
    /// Least-squares objective at the returned iterate
    pub cost: f64,
    /// Largest continuity gap ‖F(xₖ, wₖ, uₖ) − xₖ₊₁‖∞
    pub max_gap: f64,
    /// ∞-norm of the last primal step
    pub step_norm: f64,
    /// Total solve time [ms]
    pub solve_time_ms: f64,
    /// Number of Levenberg regularizations applied
    pub regularizations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HessianApproximation {
    GaussNewton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorType {
    /// Explicit Runge-Kutta (RK4)
    Erk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NlpSolverType {
    Sqp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpSolverType {
    /// Dense QP over the initial state and the noise sequence
    FullCondensingDense,
}

/// Solution strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub hessian_approx: HessianApproximation,
    pub integrator_type: IntegratorType,
    pub nlp_solver_type: NlpSolverType,
    pub qp_solver: QpSolverType,
    /// RK4 sub-steps per shooting interval
    pub integrator_steps: usize,
    /// Maximum SQP iterations
    pub max_iterations: usize,
    /// Bound on the step ∞-norm and the continuity gap at convergence
    pub tolerance: f64,
    /// Seed the parameter guess from the previous solution
    pub warm_start: bool,
    /// Relative perturbation for finite-difference sensitivities
    pub fd_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            hessian_approx: HessianApproximation::GaussNewton,
            integrator_type: IntegratorType::Erk,
            nlp_solver_type: NlpSolverType::Sqp,
            qp_solver: QpSolverType::FullCondensingDense,
            integrator_steps: 1,
            max_iterations: 200,
            tolerance: 1e-6,
            warm_start: true,
            fd_step: 1e-6,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), EstimatorError> {
        if self.integrator_steps == 0 {
            return Err(EstimatorError::InvalidParameter(
                "integrator_steps must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(EstimatorError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(EstimatorError::InvalidParameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.fd_step.is_finite() && self.fd_step > 0.0 && self.fd_step <= 1e-2) {
            return Err(EstimatorError::InvalidParameter(format!(
                "fd_step must lie in (0, 1e-2], got {}",
                self.fd_step
            )));
        }
        Ok(())
    }
}

/// Starting point for a solve
#[derive(Debug, Clone, PartialEq)]
pub struct InitialGuess {
    /// N+1 augmented states
    pub states: Vec<DVector<f64>>,
    /// N process-noise vectors
    pub noise: Vec<DVector<f64>>,
}

impl InitialGuess {
    /// Measured sub-state from the references, parameters from the arrival
    /// prior, zero noise; the last node is propagated from the one before
    pub fn from_stages(problem: &MheProblem, stages: &StageData) -> Result<Self, EstimatorError> {
        let d = problem.dims();
        let arrival = stages.yref[0].rows(d.nx + d.nu, d.nx_aug).into_owned();

        let mut states: Vec<DVector<f64>> = stages
            .yref
            .iter()
            .map(|yref| {
                let mut x = arrival.clone();
                x.rows_mut(0, d.nx).copy_from(&yref.rows(0, d.nx));
                x
            })
            .collect();
        let noise = vec![DVector::zeros(d.nu); d.n];

        let last = problem.transition(&states[d.n - 1], &noise[d.n - 1], &stages.thrust[d.n - 1])?;
        states.push(last);

        Ok(Self { states, noise })
    }

    /// Check lengths against the problem
    pub fn check(&self, dims: &MheDimensions) -> Result<(), EstimatorError> {
        check_dim("initial guess states", dims.n + 1, self.states.len())?;
        check_dim("initial guess noise", dims.n, self.noise.len())?;
        for x in &self.states {
            check_dim("initial guess state", dims.nx_aug, x.len())?;
        }
        for w in &self.noise {
            check_dim("initial guess noise", dims.nu, w.len())?;
        }
        Ok(())
    }
}

/// Trajectory and outcome returned by a backend
#[derive(Debug, Clone)]
pub struct BackendSolution {
    /// N+1 augmented states
    pub states: Vec<DVector<f64>>,
    /// N process-noise vectors
    pub noise: Vec<DVector<f64>>,
    pub status: SolveStatus,
    pub statistics: SolveStatistics,
}

/// Numerical optimizer for an assembled MHE problem
pub trait NlpSolverBackend: Send {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// One-time setup for `problem`; failures surface as `BackendFailure`
    fn prepare(&mut self, problem: &MheProblem) -> Result<(), EstimatorError>;

    /// Solve one window starting from `initial_guess`, or from
    /// [`InitialGuess::from_stages`] when none is given
    fn solve(
        &mut self,
        problem: &MheProblem,
        stages: &StageData,
        initial_guess: Option<&InitialGuess>,
    ) -> Result<BackendSolution, EstimatorError>;
}

/// Armijo sufficient-decrease constant
const ARMIJO: f64 = 1e-4;
/// Smallest line-search step before giving up
const MIN_STEP_LENGTH: f64 = 1e-8;
/// Penalty margin over the largest continuity multiplier
const PENALTY_MARGIN: f64 = 2.0;
/// First Levenberg shift, relative to the largest Hessian diagonal entry
const INITIAL_REGULARIZATION: f64 = 1e-10;
const MAX_REGULARIZATIONS: usize = 8;

/// Central-difference Jacobian of `f` at `v`
fn central_difference<F>(
    f: F,
    v: &DVector<f64>,
    rows: usize,
    step: f64,
) -> Result<DMatrix<f64>, EstimatorError>
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>, EstimatorError>,
{
    let mut jac = DMatrix::zeros(rows, v.len());
    let mut probe = v.clone();

    for j in 0..v.len() {
        let h = step * v[j].abs().max(1.0);
        probe[j] = v[j] + h;
        let plus = f(&probe)?;
        probe[j] = v[j] - h;
        let minus = f(&probe)?;
        probe[j] = v[j];

        jac.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    Ok(jac)
}

/// Cost, gaps and merit ingredients at one iterate
struct Evaluation {
    cost: f64,
    gaps: Vec<DVector<f64>>,
    gap_l1: f64,
    max_gap: f64,
}

impl Evaluation {
    fn new(
        problem: &MheProblem,
        stages: &StageData,
        states: &[DVector<f64>],
        noise: &[DVector<f64>],
    ) -> Result<Self, EstimatorError> {
        let n = problem.dims().n;
        let mut gaps = Vec::with_capacity(n);
        for k in 0..n {
            let next = problem.transition(&states[k], &noise[k], &stages.thrust[k])?;
            gaps.push(next - &states[k + 1]);
        }
        let cost = problem.objective(stages, states, noise);

        Ok(Self {
            cost,
            gap_l1: gaps.iter().map(|d| d.lp_norm(1)).sum(),
            max_gap: gaps.iter().map(|d| d.amax()).fold(0.0, f64::max),
            gaps,
        })
    }

    fn merit(&self, penalty: f64) -> f64 {
        self.cost + penalty * self.gap_l1
    }

    fn is_finite(&self) -> bool {
        self.cost.is_finite() && self.gap_l1.is_finite()
    }
}

/// Sensitivities of the transition and stage outputs along the horizon
struct Linearization {
    /// ∂F/∂x
    a: Vec<DMatrix<f64>>,
    /// ∂F/∂w
    b: Vec<DMatrix<f64>>,
    /// ∂y/∂x
    cx: Vec<DMatrix<f64>>,
    /// ∂y/∂w
    cw: Vec<DMatrix<f64>>,
    /// y − yref
    residuals: Vec<DVector<f64>>,
}

impl Linearization {
    fn new(
        problem: &MheProblem,
        stages: &StageData,
        states: &[DVector<f64>],
        noise: &[DVector<f64>],
    ) -> Result<Self, EstimatorError> {
        let d = problem.dims();
        let step = problem.options().fd_step;
        let mut lin = Self {
            a: Vec::with_capacity(d.n),
            b: Vec::with_capacity(d.n),
            cx: Vec::with_capacity(d.n),
            cw: Vec::with_capacity(d.n),
            residuals: Vec::with_capacity(d.n),
        };

        for k in 0..d.n {
            let (x, w, u) = (&states[k], &noise[k], &stages.thrust[k]);
            let ny = problem.output_dim(k);

            lin.a.push(central_difference(|x| problem.transition(x, w, u), x, d.nx_aug, step)?);
            lin.b.push(central_difference(|w| problem.transition(x, w, u), w, d.nx_aug, step)?);
            lin.cx.push(central_difference(|x| Ok(problem.stage_output(k, x, w)), x, ny, step)?);
            lin.cw.push(central_difference(|w| Ok(problem.stage_output(k, x, w)), w, ny, step)?);
            lin.residuals.push(problem.stage_output(k, x, w) - &stages.yref[k]);
        }
        Ok(lin)
    }
}

/// Dense Gauss-Newton normal equations over δz = [δx₀; δw₀; …; δw_{N−1}]
///
/// The shooting states are eliminated with the sensitivity recursion
///
/// ```text
/// δxₖ = Sₖ δz + sₖ,   S₀ = [I 0],  s₀ = 0
/// Sₖ₊₁ = Aₖ Sₖ + Bₖ Eₖ,   sₖ₊₁ = Aₖ sₖ + dₖ
/// ```
///
/// where `Eₖ` selects δwₖ and `dₖ` is the continuity gap. Stage k only
/// touches the first `nx_aug + nu (k + 1)` columns.
fn condense(
    problem: &MheProblem,
    lin: &Linearization,
    gaps: &[DVector<f64>],
) -> (DMatrix<f64>, DVector<f64>) {
    let d = problem.dims();
    let (nxa, nw) = (d.nx_aug, d.nu);
    let nz = nxa + nw * d.n;

    let mut h = DMatrix::zeros(nz, nz);
    let mut g = DVector::zeros(nz);
    let mut s_mat = DMatrix::zeros(nxa, nz);
    s_mat.view_mut((0, 0), (nxa, nxa)).fill_with_identity();
    let mut s_vec = DVector::zeros(nxa);

    for k in 0..d.n {
        let col_w = nxa + nw * k;
        let nc = col_w + nw;

        let mut m = &lin.cx[k] * s_mat.columns(0, nc);
        {
            let mut m_w = m.columns_mut(col_w, nw);
            m_w += &lin.cw[k];
        }
        let m_off = &lin.residuals[k] + &lin.cx[k] * &s_vec;
        let wm = problem.stage_weight(k) * &m;

        h.view_mut((0, 0), (nc, nc)).gemm_tr(1.0, &m, &wm, 1.0);
        g.rows_mut(0, nc).gemv_tr(1.0, &wm, &m_off, 1.0);

        let mut s_next = DMatrix::zeros(nxa, nz);
        s_next
            .columns_mut(0, nc)
            .gemm(1.0, &lin.a[k], &s_mat.columns(0, nc), 0.0);
        {
            let mut s_w = s_next.columns_mut(col_w, nw);
            s_w += &lin.b[k];
        }
        s_vec = &lin.a[k] * &s_vec + &gaps[k];
        s_mat = s_next;
    }
    (h, g)
}

/// Solve `H δz = −g`, shifting the diagonal when `H` is not positive definite
fn solve_regularized(h: &DMatrix<f64>, g: &DVector<f64>) -> Option<(DVector<f64>, usize)> {
    let rhs = -g;
    let base = h.diagonal().amax().max(1.0) * INITIAL_REGULARIZATION;
    let mut shift = 0.0;

    for attempt in 0..=MAX_REGULARIZATIONS {
        let mut shifted = h.clone();
        if shift > 0.0 {
            for i in 0..shifted.nrows() {
                shifted[(i, i)] += shift;
            }
        }
        if let Some(chol) = Cholesky::new(shifted) {
            let dz = chol.solve(&rhs);
            if dz.iter().all(|v| v.is_finite()) {
                return Some((dz, attempt));
            }
        }
        shift = if shift == 0.0 { base } else { shift * 100.0 };
        log::warn!("condensed Hessian not positive definite, regularizing with {:e}", shift);
    }
    None
}

/// SQP with Gauss-Newton Hessian and full condensing
///
/// Sensitivities come from central differences of the transition and stage
/// output callables. Each QP step is globalized by a backtracking line
/// search on the ℓ1 merit `cost + μ Σ‖gapₖ‖₁`, with μ kept above the
/// continuity multipliers. Iterates on which the model fails (for example a
/// singular inertia) are rejected by the line search.
#[derive(Debug, Clone, Default)]
pub struct GaussNewtonSolver {
    prepared: Option<MheDimensions>,
}

impl GaussNewtonSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuity multipliers of the QP solution, by backward recursion
    ///
    /// ```text
    /// λ_{N−1} = 0
    /// λ_{k−1} = Cxₖᵀ Wₖ (rₖ + Cxₖ δxₖ + Cwₖ δwₖ) + Aₖᵀ λₖ
    /// ```
    fn multiplier_bound(
        problem: &MheProblem,
        lin: &Linearization,
        dx: &[DVector<f64>],
        dw: &[DVector<f64>],
    ) -> f64 {
        let n = problem.dims().n;
        let mut lambda = DVector::zeros(problem.dims().nx_aug);
        let mut bound: f64 = 0.0;

        for k in (1..n).rev() {
            let r_lin = &lin.residuals[k] + &lin.cx[k] * &dx[k] + &lin.cw[k] * &dw[k];
            lambda = lin.cx[k].transpose() * (problem.stage_weight(k) * r_lin)
                + lin.a[k].transpose() * &lambda;
            bound = bound.max(lambda.amax());
        }
        bound
    }

    /// Directional derivative of the cost along the step
    fn cost_slope(
        problem: &MheProblem,
        lin: &Linearization,
        dx: &[DVector<f64>],
        dw: &[DVector<f64>],
    ) -> f64 {
        (0..problem.dims().n)
            .map(|k| {
                let wr = problem.stage_weight(k) * &lin.residuals[k];
                wr.dot(&(&lin.cx[k] * &dx[k] + &lin.cw[k] * &dw[k]))
            })
            .sum()
    }

    /// Recover the full step from the condensed variables
    fn expand_step(
        problem: &MheProblem,
        lin: &Linearization,
        gaps: &[DVector<f64>],
        dz: &DVector<f64>,
    ) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        let d = problem.dims();
        let dw: Vec<DVector<f64>> = (0..d.n)
            .map(|k| dz.rows(d.nx_aug + d.nu * k, d.nu).into_owned())
            .collect();

        let mut dx = Vec::with_capacity(d.n + 1);
        dx.push(dz.rows(0, d.nx_aug).into_owned());
        for k in 0..d.n {
            let next = &lin.a[k] * &dx[k] + &lin.b[k] * &dw[k] + &gaps[k];
            dx.push(next);
        }
        (dx, dw)
    }
}

fn apply_step(
    states: &[DVector<f64>],
    noise: &[DVector<f64>],
    dx: &[DVector<f64>],
    dw: &[DVector<f64>],
    alpha: f64,
) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
    (
        states.iter().zip(dx).map(|(x, d)| x + d * alpha).collect(),
        noise.iter().zip(dw).map(|(w, d)| w + d * alpha).collect(),
    )
}

impl NlpSolverBackend for GaussNewtonSolver {
    fn name(&self) -> &'static str {
        "gauss-newton"
    }

    fn prepare(&mut self, problem: &MheProblem) -> Result<(), EstimatorError> {
        problem
            .options()
            .validate()
            .map_err(|e| EstimatorError::BackendFailure(e.to_string()))?;
        self.prepared = Some(*problem.dims());
        Ok(())
    }

    fn solve(
        &mut self,
        problem: &MheProblem,
        stages: &StageData,
        initial_guess: Option<&InitialGuess>,
    ) -> Result<BackendSolution, EstimatorError> {
        let d = *problem.dims();
        match self.prepared {
            Some(prepared) if prepared == d => {}
            Some(_) => {
                return Err(EstimatorError::BackendFailure(
                    "problem dimensions differ from the prepared problem".to_string(),
                ))
            }
            None => {
                return Err(EstimatorError::BackendFailure(
                    "backend used before prepare".to_string(),
                ))
            }
        }

        let start = Instant::now();
        let options = problem.options();

        let guess = match initial_guess {
            Some(guess) => guess.clone(),
            None => InitialGuess::from_stages(problem, stages)?,
        };
        guess.check(&d)?;
        let InitialGuess {
            mut states,
            mut noise,
        } = guess;

        let mut eval = Evaluation::new(problem, stages, &states, &noise)?;
        let mut penalty: f64 = 0.0;
        let mut stats = SolveStatistics::default();
        let mut status = SolveStatus::MaxIterations;

        for iter in 1..=options.max_iterations {
            stats.iterations = iter;

            let lin = match Linearization::new(problem, stages, &states, &noise) {
                Ok(lin) => lin,
                Err(e) => {
                    log::warn!("linearization failed: {}", e);
                    status = SolveStatus::Infeasible;
                    break;
                }
            };

            let (h, g) = condense(problem, &lin, &eval.gaps);
            let Some((dz, shifts)) = solve_regularized(&h, &g) else {
                status = SolveStatus::Infeasible;
                break;
            };
            stats.regularizations += shifts;

            let (dx, dw) = Self::expand_step(problem, &lin, &eval.gaps, &dz);
            let step_norm = dx
                .iter()
                .chain(dw.iter())
                .map(|v| v.amax())
                .fold(0.0, f64::max);
            stats.step_norm = step_norm;
            if !step_norm.is_finite() {
                status = SolveStatus::Infeasible;
                break;
            }

            if step_norm < options.tolerance && eval.max_gap < options.tolerance {
                let (x_new, w_new) = apply_step(&states, &noise, &dx, &dw, 1.0);
                if let Ok(next) = Evaluation::new(problem, stages, &x_new, &w_new) {
                    if next.is_finite() {
                        states = x_new;
                        noise = w_new;
                        eval = next;
                    }
                }
                status = SolveStatus::Converged;
                break;
            }

            penalty = penalty.max(PENALTY_MARGIN * Self::multiplier_bound(problem, &lin, &dx, &dw));
            let merit0 = eval.merit(penalty);
            let slope = (Self::cost_slope(problem, &lin, &dx, &dw) - penalty * eval.gap_l1).min(0.0);
            let slack = 1e-12 * merit0.abs().max(1.0);

            let mut alpha = 1.0;
            let mut accepted = None;
            while alpha >= MIN_STEP_LENGTH {
                let (x_new, w_new) = apply_step(&states, &noise, &dx, &dw, alpha);
                match Evaluation::new(problem, stages, &x_new, &w_new) {
                    Ok(next) if next.is_finite() => {
                        if next.merit(penalty) <= merit0 + ARMIJO * alpha * slope + slack {
                            accepted = Some((x_new, w_new, next));
                            break;
                        }
                    }
                    Ok(_) => log::debug!("non-finite iterate at step {}", alpha),
                    Err(e) => log::debug!("rejected step {}: {}", alpha, e),
                }
                alpha *= 0.5;
            }

            let Some((x_new, w_new, next)) = accepted else {
                log::warn!("line search failed at iteration {}", iter);
                status = SolveStatus::Infeasible;
                break;
            };
            states = x_new;
            noise = w_new;
            eval = next;

            log::debug!(
                "sqp iter {}: cost {:.6e}, max gap {:.3e}, step {:.3e}, alpha {}",
                iter,
                eval.cost,
                eval.max_gap,
                step_norm,
                alpha
            );
        }

        stats.cost = eval.cost;
        stats.max_gap = eval.max_gap;
        stats.solve_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(BackendSolution {
            states,
            noise,
            status,
            statistics: stats,
        })
    }
}
