//! acados FFI backend
//!
//! Raw bindings to the acados-generated `mhe_attitude` solver and an
//! [`NlpSolverBackend`] wrapping them. The generated solver must be built
//! for the same model: 12 states, 7 noise inputs, 4 stage parameters
//! (rotor thrusts), nonlinear least-squares costs with `ny_0 = 26`,
//! `ny = 14` and no terminal cost.

#![allow(non_camel_case_types)]

use std::os::raw::{c_double, c_int, c_void};
use std::time::Instant;

use crate::error::EstimatorError;
use crate::ocp::{MheProblem, StageData};
use crate::solver::{
    BackendSolution, InitialGuess, NlpSolverBackend, SolveStatistics, SolveStatus,
};

pub const NX: usize = 12;
pub const NU: usize = 7;
pub const NP: usize = 4;
pub const NY: usize = 14;
pub const NY0: usize = 26;

#[repr(C)]
pub struct ocp_nlp_in {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_out {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_solver {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_config {
    _private: [u8; 0],
}

#[repr(C)]
pub struct ocp_nlp_dims {
    _private: [u8; 0],
}

#[repr(C)]
pub struct mhe_attitude_solver_capsule {
    _private: [u8; 0],
}

extern "C" {
    fn mhe_attitude_acados_create_capsule() -> *mut mhe_attitude_solver_capsule;
    fn mhe_attitude_acados_free_capsule(capsule: *mut mhe_attitude_solver_capsule) -> c_int;
    fn mhe_attitude_acados_create_with_discretization(
        capsule: *mut mhe_attitude_solver_capsule,
        n_time_steps: c_int,
        new_time_steps: *const c_double,
    ) -> c_int;
    fn mhe_attitude_acados_free(capsule: *mut mhe_attitude_solver_capsule) -> c_int;
    fn mhe_attitude_acados_solve(capsule: *mut mhe_attitude_solver_capsule) -> c_int;
    fn mhe_attitude_acados_update_params(
        capsule: *mut mhe_attitude_solver_capsule,
        stage: c_int,
        value: *const c_double,
        np: c_int,
    ) -> c_int;
    fn mhe_attitude_acados_get_nlp_in(capsule: *mut mhe_attitude_solver_capsule) -> *mut ocp_nlp_in;
    fn mhe_attitude_acados_get_nlp_out(
        capsule: *mut mhe_attitude_solver_capsule,
    ) -> *mut ocp_nlp_out;
    fn mhe_attitude_acados_get_nlp_solver(
        capsule: *mut mhe_attitude_solver_capsule,
    ) -> *mut ocp_nlp_solver;
    fn mhe_attitude_acados_get_nlp_config(
        capsule: *mut mhe_attitude_solver_capsule,
    ) -> *mut ocp_nlp_config;
    fn mhe_attitude_acados_get_nlp_dims(
        capsule: *mut mhe_attitude_solver_capsule,
    ) -> *mut ocp_nlp_dims;

    fn ocp_nlp_cost_model_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const i8,
        value: *mut c_void,
    ) -> c_int;
    fn ocp_nlp_out_set(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        in_: *mut ocp_nlp_in,
        stage: c_int,
        field: *const i8,
        value: *mut c_void,
    );
    fn ocp_nlp_out_get(
        config: *mut ocp_nlp_config,
        dims: *mut ocp_nlp_dims,
        out: *mut ocp_nlp_out,
        stage: c_int,
        field: *const i8,
        value: *mut c_void,
    );
    fn ocp_nlp_get(solver: *mut ocp_nlp_solver, field: *const i8, value: *mut c_void);
}

/// Owned acados solver instance
struct AcadosCapsule {
    capsule: *mut mhe_attitude_solver_capsule,
    config: *mut ocp_nlp_config,
    dims: *mut ocp_nlp_dims,
    nlp_in: *mut ocp_nlp_in,
    nlp_out: *mut ocp_nlp_out,
    solver: *mut ocp_nlp_solver,
    n: usize,
}

impl AcadosCapsule {
    /// Create a solver with `n` intervals of length `dt`
    fn new(n: usize, dt: f64) -> Result<Self, i32> {
        let steps = vec![dt; n];
        unsafe {
            let capsule = mhe_attitude_acados_create_capsule();
            if capsule.is_null() {
                return Err(-1);
            }
            let status =
                mhe_attitude_acados_create_with_discretization(capsule, n as c_int, steps.as_ptr());
            if status != 0 {
                mhe_attitude_acados_free_capsule(capsule);
                return Err(status);
            }

            Ok(Self {
                config: mhe_attitude_acados_get_nlp_config(capsule),
                dims: mhe_attitude_acados_get_nlp_dims(capsule),
                nlp_in: mhe_attitude_acados_get_nlp_in(capsule),
                nlp_out: mhe_attitude_acados_get_nlp_out(capsule),
                solver: mhe_attitude_acados_get_nlp_solver(capsule),
                capsule,
                n,
            })
        }
    }

    fn set_cost(&mut self, stage: usize, field: &[u8], value: &[f64]) -> Result<(), i32> {
        let status = unsafe {
            ocp_nlp_cost_model_set(
                self.config,
                self.dims,
                self.nlp_in,
                stage as c_int,
                field.as_ptr() as *const i8,
                value.as_ptr() as *mut c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }

    fn set_parameters(&mut self, stage: usize, params: &[f64]) -> Result<(), i32> {
        let status = unsafe {
            mhe_attitude_acados_update_params(
                self.capsule,
                stage as c_int,
                params.as_ptr(),
                params.len() as c_int,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }

    fn set_out(&mut self, stage: usize, field: &[u8], value: &[f64]) {
        unsafe {
            ocp_nlp_out_set(
                self.config,
                self.dims,
                self.nlp_out,
                self.nlp_in,
                stage as c_int,
                field.as_ptr() as *const i8,
                value.as_ptr() as *mut c_void,
            );
        }
    }

    fn get_out(&self, stage: usize, field: &[u8], len: usize) -> Vec<f64> {
        let mut value = vec![0.0; len];
        unsafe {
            ocp_nlp_out_get(
                self.config,
                self.dims,
                self.nlp_out,
                stage as c_int,
                field.as_ptr() as *const i8,
                value.as_mut_ptr() as *mut c_void,
            );
        }
        value
    }

    fn solve(&mut self) -> i32 {
        unsafe { mhe_attitude_acados_solve(self.capsule) }
    }

    fn sqp_iterations(&self) -> usize {
        let mut iters: c_int = 0;
        unsafe {
            ocp_nlp_get(
                self.solver,
                b"sqp_iter\0".as_ptr() as *const i8,
                &mut iters as *mut c_int as *mut c_void,
            );
        }
        iters.max(0) as usize
    }
}

impl Drop for AcadosCapsule {
    fn drop(&mut self) {
        unsafe {
            mhe_attitude_acados_free(self.capsule);
            mhe_attitude_acados_free_capsule(self.capsule);
        }
    }
}

// The capsule is only touched through `&mut self`
unsafe impl Send for AcadosCapsule {}

fn failure(what: &str, code: i32) -> EstimatorError {
    EstimatorError::BackendFailure(format!("acados {} failed with status {}", what, code))
}

/// Backend driving the generated acados solver
#[derive(Default)]
pub struct AcadosSolver {
    capsule: Option<AcadosCapsule>,
}

impl AcadosSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NlpSolverBackend for AcadosSolver {
    fn name(&self) -> &'static str {
        "acados"
    }

    fn prepare(&mut self, problem: &MheProblem) -> Result<(), EstimatorError> {
        let d = problem.dims();
        if (d.nx_aug, d.nu, d.np, d.ny, d.ny_0) != (NX, NU, NP, NY, NY0) {
            return Err(EstimatorError::BackendFailure(format!(
                "generated solver dimensions do not match the problem: {:?}",
                d
            )));
        }

        let mut capsule =
            AcadosCapsule::new(d.n, problem.horizon().dt()).map_err(|c| failure("create", c))?;

        // acados expects column-major weights; ours are symmetric
        let cost = problem.cost();
        capsule
            .set_cost(0, b"W\0", cost.w_0.as_slice())
            .map_err(|c| failure("set W_0", c))?;
        for k in 1..d.n {
            capsule
                .set_cost(k, b"W\0", cost.w.as_slice())
                .map_err(|c| failure("set W", c))?;
        }

        log::info!("acados solver created: N = {}", capsule.n);
        self.capsule = Some(capsule);
        Ok(())
    }

    fn solve(
        &mut self,
        problem: &MheProblem,
        stages: &StageData,
        initial_guess: Option<&InitialGuess>,
    ) -> Result<BackendSolution, EstimatorError> {
        let d = *problem.dims();
        let guess = match initial_guess {
            Some(guess) => guess.clone(),
            None => InitialGuess::from_stages(problem, stages)?,
        };
        guess.check(&d)?;

        let capsule = self
            .capsule
            .as_mut()
            .ok_or_else(|| EstimatorError::BackendFailure("backend used before prepare".to_string()))?;
        if capsule.n != d.n {
            return Err(EstimatorError::BackendFailure(format!(
                "solver created for N = {}, problem has N = {}",
                capsule.n, d.n
            )));
        }

        let start = Instant::now();
        for k in 0..d.n {
            capsule
                .set_cost(k, b"yref\0", stages.yref[k].as_slice())
                .map_err(|c| failure("set yref", c))?;
            capsule
                .set_parameters(k, stages.thrust[k].as_slice())
                .map_err(|c| failure("update params", c))?;
            capsule.set_out(k, b"x\0", guess.states[k].as_slice());
            capsule.set_out(k, b"u\0", guess.noise[k].as_slice());
        }
        capsule.set_out(d.n, b"x\0", guess.states[d.n].as_slice());

        let code = capsule.solve();
        let status = SolveStatus::from_acados_code(code);
        if !status.is_converged() {
            log::warn!("acados returned status {}", code);
        }

        let states: Vec<_> = (0..=d.n)
            .map(|k| nalgebra::DVector::from_vec(capsule.get_out(k, b"x\0", NX)))
            .collect();
        let noise: Vec<_> = (0..d.n)
            .map(|k| nalgebra::DVector::from_vec(capsule.get_out(k, b"u\0", NU)))
            .collect();

        let mut max_gap: f64 = 0.0;
        for k in 0..d.n {
            let next = problem.transition(&states[k], &noise[k], &stages.thrust[k])?;
            max_gap = max_gap.max((next - &states[k + 1]).amax());
        }

        let statistics = SolveStatistics {
            iterations: capsule.sqp_iterations(),
            cost: problem.objective(stages, &states, &noise),
            max_gap,
            step_norm: 0.0,
            solve_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            regularizations: 0,
        };

        Ok(BackendSolution {
            states,
            noise,
            status,
            statistics,
        })
    }
}
