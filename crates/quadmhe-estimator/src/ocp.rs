//! Moving-horizon estimation problem definition
//!
//! Multiple-shooting nonlinear least squares over N intervals:
//!
//! ```text
//! minimize    ½‖[x₀[0:nx]; w₀; x₀] − [y₀; 0; x̄₀]‖²_W0
//!           + Σₖ ½‖[xₖ[0:nx]; wₖ] − [yₖ; 0]‖²_W       k = 1..N−1
//! subject to  xₖ₊₁ = F(xₖ, wₖ, uₖ)                    k = 0..N−1
//!
//! W0 = blockdiag(R, Q, Q0),   W = blockdiag(R, Q)
//! ```
//!
//! The first stage carries the arrival cost anchoring `x₀` to the prior
//! `x̄₀`. The terminal node has no cost.
//!
//! The problem is assembled by a typestate builder:
//!
//! ```text
//! MheProblemBuilder<Configured> --set_cost()--> MheProblemBuilder<CostSet>
//!     --set_solver(options)--> MheProblemBuilder<SolverConfigured>
//!     --build()--> MheProblem
//! ```

use nalgebra::{DMatrix, DVector};
use quadmhe_core::dynamics::MEASURED_DIM;

use crate::error::{check_dim, EstimatorError};
use crate::estimator::MovingHorizonEstimator;
use crate::model::MheModel;
use crate::solver::{NlpSolverBackend, SolverOptions};

/// Relative tolerance on `tf / dt` being an integer
const HORIZON_TOLERANCE: f64 = 1e-9;

/// Relative tolerance for weight symmetry and semi-definiteness checks
const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Equally spaced horizon of N intervals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Horizon {
    dt: f64,
    tf: f64,
    n: usize,
}

impl Horizon {
    /// Partition `tf` into intervals of length `dt`
    ///
    /// Fails with `InvalidHorizon` unless `tf / dt` is a positive integer.
    pub fn new(dt: f64, tf: f64) -> Result<Self, EstimatorError> {
        let invalid = || EstimatorError::InvalidHorizon { dt, tf };

        if !(dt.is_finite() && tf.is_finite() && dt > 0.0 && tf > 0.0) {
            return Err(invalid());
        }
        let ratio = tf / dt;
        let n = ratio.round();
        if n < 1.0 || (ratio - n).abs() > HORIZON_TOLERANCE * ratio.max(1.0) {
            return Err(invalid());
        }

        Ok(Self {
            dt,
            tf,
            n: n as usize,
        })
    }

    /// Number of shooting intervals
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn tf(&self) -> f64 {
        self.tf
    }

    /// Times of the N+1 nodes relative to the window start
    pub fn node_times(&self) -> Vec<f64> {
        (0..=self.n).map(|k| k as f64 * self.dt).collect()
    }
}

/// Problem dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MheDimensions {
    /// Shooting intervals
    pub n: usize,
    /// Augmented state
    pub nx_aug: usize,
    /// Measured sub-state, `nx_aug − num_param`
    pub nx: usize,
    /// Process noise (shooting control)
    pub nu: usize,
    /// Stage parameters (rotor thrusts)
    pub np: usize,
    /// Estimated parameters
    pub num_param: usize,
    /// Intermediate stage output
    pub ny: usize,
    /// Initial stage output
    pub ny_0: usize,
    /// Terminal stage output
    pub ny_e: usize,
}

/// Inverse-covariance weights
#[derive(Debug, Clone, PartialEq)]
pub struct MheWeights {
    /// Measurement weight, `nx × nx`
    pub r: DMatrix<f64>,
    /// Process-noise weight, `nu × nu`
    pub q: DMatrix<f64>,
    /// Arrival-cost weight, `nx_aug × nx_aug`
    pub q0: DMatrix<f64>,
}

fn check_weight(what: &'static str, m: &DMatrix<f64>, dim: usize) -> Result<(), EstimatorError> {
    check_dim(what, dim, m.nrows())?;
    check_dim(what, dim, m.ncols())?;

    if m.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::InvalidParameter(format!(
            "{} weight has non-finite entries",
            what
        )));
    }

    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > WEIGHT_TOLERANCE * scale {
        return Err(EstimatorError::InvalidParameter(format!(
            "{} weight is not symmetric",
            what
        )));
    }

    let min_eig = m.symmetric_eigenvalues().min();
    if min_eig < -WEIGHT_TOLERANCE * scale {
        return Err(EstimatorError::InvalidParameter(format!(
            "{} weight is not positive semi-definite (eigenvalue {:e})",
            what, min_eig
        )));
    }
    Ok(())
}

fn block_diag(blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let dim = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::zeros(dim, dim);
    let mut offset = 0;
    for block in blocks {
        let n = block.nrows();
        out.view_mut((offset, offset), (n, n)).copy_from(*block);
        offset += n;
    }
    out
}

/// Least-squares stage cost definitions
#[derive(Debug, Clone, PartialEq)]
pub struct CostDefinition {
    /// Initial stage weight `blockdiag(R, Q, Q0)`
    pub w_0: DMatrix<f64>,
    /// Intermediate stage weight `blockdiag(R, Q)`
    pub w: DMatrix<f64>,
}

/// Builder state before the costs are defined
#[derive(Debug, Clone)]
pub struct Configured;

/// Builder state with costs defined
#[derive(Debug, Clone)]
pub struct CostSet {
    cost: CostDefinition,
}

/// Builder state with costs and solver options
#[derive(Debug, Clone)]
pub struct SolverConfigured {
    cost: CostDefinition,
    options: SolverOptions,
}

/// Typestate builder for [`MheProblem`]
#[derive(Debug, Clone)]
pub struct MheProblemBuilder<S> {
    model: MheModel,
    horizon: Horizon,
    dims: MheDimensions,
    weights: MheWeights,
    state: S,
}

impl MheProblemBuilder<Configured> {
    /// Configure the horizon and weights
    ///
    /// # Arguments
    /// * `model` - Process model
    /// * `dt` - Sampling step [s]
    /// * `tf` - Horizon span [s], must be an integer multiple of `dt`
    /// * `r` - Measurement weight, `nx × nx`
    /// * `q0` - Arrival-cost weight, `nx_aug × nx_aug`
    /// * `q` - Process-noise weight, `nu × nu`
    /// * `num_param` - Number of estimated parameters at the end of the state,
    ///   must equal the model's parameter block `[J; r]`
    pub fn new(
        model: MheModel,
        dt: f64,
        tf: f64,
        r: DMatrix<f64>,
        q0: DMatrix<f64>,
        q: DMatrix<f64>,
        num_param: usize,
    ) -> Result<Self, EstimatorError> {
        let horizon = Horizon::new(dt, tf)?;

        let nx_aug = model.nx_aug();
        check_dim("parameter count", nx_aug - MEASURED_DIM, num_param)?;
        let nx = nx_aug - num_param;
        let nu = model.nw();

        check_weight("measurement", &r, nx)?;
        check_weight("process noise", &q, nu)?;
        check_weight("arrival", &q0, nx_aug)?;

        let ny = r.nrows() + q.nrows();
        let dims = MheDimensions {
            n: horizon.n(),
            nx_aug,
            nx,
            nu,
            np: model.np(),
            num_param,
            ny,
            ny_0: ny + q0.nrows(),
            ny_e: 0,
        };

        log::debug!(
            "configured horizon: N = {}, nx_aug = {}, nx = {}, ny_0 = {}, ny = {}",
            dims.n,
            dims.nx_aug,
            dims.nx,
            dims.ny_0,
            dims.ny
        );

        Ok(Self {
            model,
            horizon,
            dims,
            weights: MheWeights { r, q, q0 },
            state: Configured,
        })
    }

    /// Define the stage costs
    pub fn set_cost(self) -> MheProblemBuilder<CostSet> {
        let w = &self.weights;
        let cost = CostDefinition {
            w_0: block_diag(&[&w.r, &w.q, &w.q0]),
            w: block_diag(&[&w.r, &w.q]),
        };
        MheProblemBuilder {
            model: self.model,
            horizon: self.horizon,
            dims: self.dims,
            weights: self.weights,
            state: CostSet { cost },
        }
    }
}

impl MheProblemBuilder<CostSet> {
    /// Select the solution strategy
    pub fn set_solver(
        self,
        options: SolverOptions,
    ) -> Result<MheProblemBuilder<SolverConfigured>, EstimatorError> {
        options.validate()?;
        Ok(MheProblemBuilder {
            model: self.model,
            horizon: self.horizon,
            dims: self.dims,
            weights: self.weights,
            state: SolverConfigured {
                cost: self.state.cost,
                options,
            },
        })
    }

    pub fn cost(&self) -> &CostDefinition {
        &self.state.cost
    }
}

impl MheProblemBuilder<SolverConfigured> {
    /// Finish the problem description
    pub fn build(self) -> MheProblem {
        MheProblem {
            model: self.model,
            horizon: self.horizon,
            dims: self.dims,
            weights: self.weights,
            cost: self.state.cost,
            options: self.state.options,
        }
    }

    /// Finish the problem and hand it to `backend`
    ///
    /// Fails with `BackendFailure` if the backend cannot prepare the problem.
    pub fn build_estimator<B: NlpSolverBackend>(
        self,
        backend: B,
    ) -> Result<MovingHorizonEstimator<B>, EstimatorError> {
        MovingHorizonEstimator::new(self.build(), backend)
    }
}

impl<S> MheProblemBuilder<S> {
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn dims(&self) -> &MheDimensions {
        &self.dims
    }

    pub fn weights(&self) -> &MheWeights {
        &self.weights
    }
}

/// Per-stage references and parameters for one solve
#[derive(Debug, Clone, PartialEq)]
pub struct StageData {
    /// Output references for stages `0..N`; stage 0 has `ny_0` entries
    pub yref: Vec<DVector<f64>>,
    /// Rotor thrusts held over each interval
    pub thrust: Vec<DVector<f64>>,
}

/// Fully assembled estimation problem
#[derive(Debug, Clone)]
pub struct MheProblem {
    model: MheModel,
    horizon: Horizon,
    dims: MheDimensions,
    weights: MheWeights,
    cost: CostDefinition,
    options: SolverOptions,
}

impl MheProblem {
    pub fn model(&self) -> &MheModel {
        &self.model
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn dims(&self) -> &MheDimensions {
        &self.dims
    }

    pub fn weights(&self) -> &MheWeights {
        &self.weights
    }

    pub fn cost(&self) -> &CostDefinition {
        &self.cost
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Output dimension of stage `k`
    pub fn output_dim(&self, k: usize) -> usize {
        if k == 0 {
            self.dims.ny_0
        } else {
            self.dims.ny
        }
    }

    /// Least-squares weight of stage `k` (`k < N`)
    pub fn stage_weight(&self, k: usize) -> &DMatrix<f64> {
        if k == 0 {
            &self.cost.w_0
        } else {
            &self.cost.w
        }
    }

    /// Stage output `[x[0:nx]; w]`, extended with the full state at stage 0
    pub fn stage_output(&self, k: usize, x: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64> {
        let nx = self.dims.nx;
        let mut y = DVector::zeros(self.output_dim(k));
        y.rows_mut(0, nx).copy_from(&x.rows(0, nx));
        y.rows_mut(nx, noise.len()).copy_from(noise);
        if k == 0 {
            y.rows_mut(nx + noise.len(), x.len()).copy_from(x);
        }
        y
    }

    /// Discrete transition over one sampling step
    pub fn transition(
        &self,
        x: &DVector<f64>,
        noise: &DVector<f64>,
        thrust: &DVector<f64>,
    ) -> Result<DVector<f64>, EstimatorError> {
        Ok(self.model.transition(
            x,
            noise,
            thrust,
            self.horizon.dt(),
            self.options.integrator_steps,
        )?)
    }

    /// References and thrusts for one window
    ///
    /// `measurements` holds N+1 vectors of length nx, `controls` N or N+1
    /// vectors of length np (a trailing (N+1)-th control is ignored) and
    /// `arrival` the prior on the first node.
    pub fn stage_data(
        &self,
        measurements: &[DVector<f64>],
        controls: &[DVector<f64>],
        arrival: &DVector<f64>,
    ) -> Result<StageData, EstimatorError> {
        let d = &self.dims;

        check_dim("measurement window", d.n + 1, measurements.len())?;
        if controls.len() != d.n && controls.len() != d.n + 1 {
            return Err(EstimatorError::InvalidDimension {
                what: "control window",
                expected: d.n,
                got: controls.len(),
            });
        }
        for y in measurements {
            check_dim("measurement", d.nx, y.len())?;
        }
        for u in controls {
            check_dim("control", d.np, u.len())?;
        }
        check_dim("arrival prior", d.nx_aug, arrival.len())?;

        let yref = (0..d.n)
            .map(|k| {
                let mut r = DVector::zeros(self.output_dim(k));
                r.rows_mut(0, d.nx).copy_from(&measurements[k]);
                if k == 0 {
                    r.rows_mut(d.nx + d.nu, d.nx_aug).copy_from(arrival);
                }
                r
            })
            .collect();

        Ok(StageData {
            yref,
            thrust: controls[..d.n].to_vec(),
        })
    }

    /// Least-squares cost ½ Σₖ ‖yₖ − yrefₖ‖²_Wₖ of a candidate trajectory
    pub fn objective(
        &self,
        stages: &StageData,
        states: &[DVector<f64>],
        noise: &[DVector<f64>],
    ) -> f64 {
        (0..self.dims.n)
            .map(|k| {
                let r = self.stage_output(k, &states[k], &noise[k]) - &stages.yref[k];
                0.5 * (self.stage_weight(k) * &r).dot(&r)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadmhe_core::simulation::AirframeConfig;

    fn model() -> MheModel {
        MheModel::from_airframe(&AirframeConfig::default()).unwrap()
    }

    fn builder(dt: f64, tf: f64) -> Result<MheProblemBuilder<Configured>, EstimatorError> {
        MheProblemBuilder::new(
            model(),
            dt,
            tf,
            DMatrix::identity(7, 7),
            DMatrix::identity(12, 12),
            DMatrix::identity(7, 7),
            5,
        )
    }

    #[test]
    fn test_horizon_node_count() {
        assert_eq!(Horizon::new(0.01, 1.0).unwrap().n(), 100);
        assert_eq!(Horizon::new(0.01, 0.5).unwrap().n(), 50);
        assert_eq!(Horizon::new(0.1, 0.3).unwrap().n(), 3);
    }

    #[test]
    fn test_horizon_rejects_non_integer() {
        assert_eq!(
            Horizon::new(0.03, 1.0).unwrap_err(),
            EstimatorError::InvalidHorizon { dt: 0.03, tf: 1.0 }
        );
        assert!(Horizon::new(0.01, 0.0).is_err());
        assert!(Horizon::new(0.0, 1.0).is_err());
        assert!(Horizon::new(1.0, 0.4).is_err());
    }

    #[test]
    fn test_dimensions() {
        let b = builder(0.01, 0.5).unwrap();
        let d = b.dims();

        assert_eq!(d.n, 50);
        assert_eq!(d.nx_aug, 12);
        assert_eq!(d.nx, 7);
        assert_eq!(d.nu, 7);
        assert_eq!(d.np, 4);
        assert_eq!(d.ny, 14);
        assert_eq!(d.ny_0, 26);
        assert_eq!(d.ny_e, 0);
    }

    #[test]
    fn test_parameter_count_must_match_model() {
        // Weights sized to the mismatched split must not get past the check
        for num_param in [4, 6, 11] {
            let nx = 12 - num_param;
            let err = MheProblemBuilder::new(
                model(),
                0.01,
                0.1,
                DMatrix::identity(nx, nx),
                DMatrix::identity(12, 12),
                DMatrix::identity(7, 7),
                num_param,
            )
            .unwrap_err();

            assert_eq!(
                err,
                EstimatorError::InvalidDimension {
                    what: "parameter count",
                    expected: 5,
                    got: num_param
                }
            );
        }
    }

    #[test]
    fn test_weight_shape_mismatch() {
        let err = MheProblemBuilder::new(
            model(),
            0.01,
            0.5,
            DMatrix::identity(6, 6),
            DMatrix::identity(12, 12),
            DMatrix::identity(7, 7),
            5,
        )
        .unwrap_err();

        assert_eq!(
            err,
            EstimatorError::InvalidDimension {
                what: "measurement",
                expected: 7,
                got: 6
            }
        );
    }

    #[test]
    fn test_weight_must_be_psd_and_symmetric() {
        let mut indefinite = DMatrix::identity(7, 7);
        indefinite[(3, 3)] = -1.0;
        let result = MheProblemBuilder::new(
            model(),
            0.01,
            0.5,
            DMatrix::identity(7, 7),
            DMatrix::identity(12, 12),
            indefinite,
            5,
        );
        assert!(matches!(result, Err(EstimatorError::InvalidParameter(_))));

        let mut asymmetric = DMatrix::identity(12, 12);
        asymmetric[(0, 1)] = 0.5;
        let result = MheProblemBuilder::new(
            model(),
            0.01,
            0.5,
            DMatrix::identity(7, 7),
            asymmetric,
            DMatrix::identity(7, 7),
            5,
        );
        assert!(matches!(result, Err(EstimatorError::InvalidParameter(_))));
    }

    #[test]
    fn test_cost_block_structure() {
        let mut r = DMatrix::identity(7, 7);
        r *= 2.0;
        let b = MheProblemBuilder::new(
            model(),
            0.01,
            0.1,
            r,
            DMatrix::identity(12, 12) * 5.0,
            DMatrix::identity(7, 7) * 3.0,
            5,
        )
        .unwrap()
        .set_cost();

        let cost = b.cost();
        assert_eq!(cost.w_0.shape(), (26, 26));
        assert_eq!(cost.w.shape(), (14, 14));
        assert_eq!(cost.w_0[(0, 0)], 2.0);
        assert_eq!(cost.w_0[(7, 7)], 3.0);
        assert_eq!(cost.w_0[(14, 14)], 5.0);
        assert_eq!(cost.w_0[(0, 14)], 0.0);
        assert_eq!(cost.w[(13, 13)], 3.0);
    }

    #[test]
    fn test_stage_outputs_and_references() {
        let problem = builder(0.01, 0.03)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build();

        let x = DVector::from_fn(12, |i, _| i as f64);
        let w = DVector::from_element(7, -1.0);

        let y0 = problem.stage_output(0, &x, &w);
        assert_eq!(y0.len(), 26);
        assert_eq!(y0[6], 6.0);
        assert_eq!(y0[7], -1.0);
        assert_eq!(y0[14], 0.0);
        assert_eq!(y0[25], 11.0);

        let y1 = problem.stage_output(1, &x, &w);
        assert_eq!(y1.len(), 14);

        let measurements = vec![DVector::from_element(7, 1.0); 4];
        let controls = vec![DVector::zeros(4); 4];
        let arrival = DVector::from_element(12, 9.0);
        let stages = problem.stage_data(&measurements, &controls, &arrival).unwrap();

        assert_eq!(stages.yref.len(), 3);
        assert_eq!(stages.thrust.len(), 3);
        assert_eq!(stages.yref[0][0], 1.0);
        assert_eq!(stages.yref[0][7], 0.0);
        assert_eq!(stages.yref[0][14], 9.0);
        assert_eq!(stages.yref[2].len(), 14);
    }

    #[test]
    fn test_stage_data_window_lengths() {
        let problem = builder(0.01, 0.03)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build();
        let arrival = DVector::zeros(12);

        let short = vec![DVector::zeros(7); 3];
        let controls = vec![DVector::zeros(4); 3];
        assert_eq!(
            problem.stage_data(&short, &controls, &arrival).unwrap_err(),
            EstimatorError::InvalidDimension {
                what: "measurement window",
                expected: 4,
                got: 3
            }
        );

        let measurements = vec![DVector::zeros(7); 4];
        let too_few = vec![DVector::zeros(4); 2];
        assert!(problem.stage_data(&measurements, &too_few, &arrival).is_err());

        let wrong_thrust = vec![DVector::zeros(3); 3];
        assert!(problem.stage_data(&measurements, &wrong_thrust, &arrival).is_err());
    }

    #[test]
    fn test_objective_zero_at_reference() {
        let problem = builder(0.01, 0.02)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build();
        let x = DVector::from_fn(12, |i, _| 0.1 * i as f64);
        let y = x.rows(0, 7).into_owned();
        let stages = problem
            .stage_data(&vec![y; 3], &vec![DVector::zeros(4); 2], &x)
            .unwrap();

        let states = vec![x.clone(); 3];
        let noise = vec![DVector::zeros(7); 2];
        assert_eq!(problem.objective(&stages, &states, &noise), 0.0);

        let mut moved = noise.clone();
        moved[1][0] = 2.0;
        // ½ · q · 2²
        assert_eq!(problem.objective(&stages, &states, &moved), 2.0);
    }
}
