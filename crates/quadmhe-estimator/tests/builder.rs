//! Problem assembly tests
//!
//! Builder state transitions, horizon partitioning and backend preparation
//! through the public API.

use nalgebra::DMatrix;

use quadmhe_core::simulation::AirframeConfig;
use quadmhe_estimator::ocp::StageData;
use quadmhe_estimator::solver::{BackendSolution, InitialGuess};
use quadmhe_estimator::{
    EstimatorConfig, EstimatorError, GaussNewtonSolver, MheModel, MheProblem, MheProblemBuilder,
    NlpSolverBackend, SolverOptions,
};

fn model() -> MheModel {
    MheModel::from_airframe(&AirframeConfig::default()).unwrap()
}

fn builder(tf: f64) -> Result<MheProblemBuilder<quadmhe_estimator::ocp::Configured>, EstimatorError> {
    MheProblemBuilder::new(
        model(),
        0.01,
        tf,
        DMatrix::identity(7, 7) * 1e6,
        DMatrix::identity(12, 12) * 1e4,
        DMatrix::identity(7, 7) * 1e4,
        5,
    )
}

/// Backend whose preparation always fails
struct Unavailable(EstimatorError);

impl NlpSolverBackend for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn prepare(&mut self, _problem: &MheProblem) -> Result<(), EstimatorError> {
        Err(self.0.clone())
    }

    fn solve(
        &mut self,
        _problem: &MheProblem,
        _stages: &StageData,
        _initial_guess: Option<&InitialGuess>,
    ) -> Result<BackendSolution, EstimatorError> {
        Err(EstimatorError::BackendFailure("not prepared".to_string()))
    }
}

mod horizon {
    use super::*;

    #[test]
    fn test_one_second_horizon_has_100_intervals() {
        let problem = builder(1.0)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build();

        assert_eq!(problem.dims().n, 100);
        assert_eq!(problem.horizon().node_times().len(), 101);
        assert_eq!(problem.cost().w_0.nrows(), problem.dims().ny_0);
    }

    #[test]
    fn test_non_integer_ratio_rejected() {
        let err = MheProblemBuilder::new(
            model(),
            0.03,
            1.0,
            DMatrix::identity(7, 7),
            DMatrix::identity(12, 12),
            DMatrix::identity(7, 7),
            5,
        )
        .unwrap_err();

        assert_eq!(err, EstimatorError::InvalidHorizon { dt: 0.03, tf: 1.0 });
    }

    #[test]
    fn test_full_state_as_parameters_rejected() {
        let err = MheProblemBuilder::new(
            model(),
            0.01,
            0.1,
            DMatrix::identity(0, 0),
            DMatrix::identity(12, 12),
            DMatrix::identity(7, 7),
            12,
        )
        .unwrap_err();

        assert!(matches!(err, EstimatorError::InvalidDimension { .. }));
    }
}

mod backend {
    use super::*;

    #[test]
    fn test_prepare_failure_surfaces_as_backend_failure() {
        let result = builder(0.1)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build_estimator(Unavailable(EstimatorError::BackendFailure(
                "library missing".to_string(),
            )));

        assert_eq!(
            result.err(),
            Some(EstimatorError::BackendFailure("library missing".to_string()))
        );
    }

    #[test]
    fn test_other_prepare_errors_are_wrapped() {
        let result = builder(0.1)
            .unwrap()
            .set_cost()
            .set_solver(SolverOptions::default())
            .unwrap()
            .build_estimator(Unavailable(EstimatorError::Config("bad".to_string())));

        assert!(matches!(result.err(), Some(EstimatorError::BackendFailure(_))));
    }

    #[test]
    fn test_invalid_options_rejected_before_build() {
        let result = builder(0.1).unwrap().set_cost().set_solver(SolverOptions {
            tolerance: -1.0,
            ..Default::default()
        });

        assert!(matches!(result.err(), Some(EstimatorError::InvalidParameter(_))));
    }

    #[test]
    fn test_estimator_from_config() {
        let config = EstimatorConfig::default();
        let mhe = config
            .builder()
            .unwrap()
            .set_cost()
            .set_solver(config.solver.clone())
            .unwrap()
            .build_estimator(GaussNewtonSolver::new())
            .unwrap();

        assert_eq!(mhe.backend_name(), "gauss-newton");
        assert_eq!(mhe.problem().dims().n, 50);
        assert!(mhe.previous().is_none());
    }
}
