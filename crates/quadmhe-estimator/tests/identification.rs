//! Closed-loop identification tests
//!
//! Simulate the airframe, corrupt the attitude and rate with sensor noise
//! and feed the stream through the sliding-window estimator.
//!
//! Under a pure roll input only `Jxx` is excited: `ωy = ωz = 0` and the
//! collective thrust is zero, so `Jyy`, `Jzz` and `r` are held by the prior.
//! The multi-axis experiment hovers on a collective thrust, which makes `r`
//! observable, and drives all three axes at distinct frequencies.

use std::f64::consts::PI;

use nalgebra::{DVector, Vector2, Vector3, Vector4};

use quadmhe_core::simulation::{AttitudeSensor, AttitudeSimulator, SimConfig, TruthConfig};
use quadmhe_estimator::{EstimatorConfig, GaussNewtonSolver, MheEstimate, SlidingHorizon};

const J_TRUE: [f64; 3] = [0.023, 0.026, 0.041];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulate `sim_config` under `input`, stream it through the default
/// estimator and return every window estimate
fn run_experiment<F>(
    sim_config: SimConfig,
    input: F,
    stride: usize,
    prior_inertia: Vector3<f64>,
    prior_com_offset: Vector2<f64>,
) -> Vec<MheEstimate>
where
    F: FnMut(f64) -> Vector4<f64>,
{
    let mut sensor = AttitudeSensor::from_config(&sim_config.sensors).unwrap();
    let mut sim = AttitudeSimulator::new(sim_config).unwrap();
    let history = sim.run(input).unwrap().clone();

    let config = EstimatorConfig::default();
    let mhe = config
        .builder()
        .unwrap()
        .set_cost()
        .set_solver(config.solver.clone())
        .unwrap()
        .build_estimator(GaussNewtonSolver::new())
        .unwrap();
    let mut horizon = SlidingHorizon::new(mhe, stride, prior_inertia, prior_com_offset).unwrap();

    // The last sample closes a window and its control is never used
    let last = *history.thrusts.last().unwrap();
    history
        .states
        .iter()
        .enumerate()
        .filter_map(|(k, state)| {
            let thrust = history.thrusts.get(k).copied().unwrap_or(last);
            let u = DVector::from_column_slice(thrust.as_slice());
            horizon.push(sensor.measure(state), u).unwrap()
        })
        .collect()
}

/// Constant roll moment with zero collective thrust
fn roll_experiment(duration: f64, stride: usize, prior: Vector3<f64>) -> Vec<MheEstimate> {
    let sim_config = SimConfig {
        duration,
        ..Default::default()
    };
    let thrust = Vector4::new(0.01, -0.01, -0.01, 0.01);
    run_experiment(sim_config, |_| thrust, stride, prior, Vector2::zeros())
}

/// Rotor thrusts for a collective `f` plus roll, pitch and yaw terms on the
/// X layout
fn mix(f: f64, roll: f64, pitch: f64, yaw: f64) -> Vector4<f64> {
    let hover = f / 4.0;
    Vector4::new(
        hover + roll + pitch + yaw,
        hover - roll + pitch - yaw,
        hover - roll - pitch + yaw,
        hover + roll - pitch - yaw,
    )
}

fn assert_relative(estimate: f64, truth: f64, tolerance: f64, what: &str) {
    let relative = (estimate - truth).abs() / truth.abs();
    assert!(relative < tolerance, "{} = {} vs {}", what, estimate, truth);
}

#[test]
fn test_roll_inertia_identified() {
    init_logging();
    let prior = Vector3::new(0.03, J_TRUE[1] * 1.02, J_TRUE[2] * 0.98);

    let estimates = roll_experiment(2.0, 10, prior);

    // 201 samples, first window at sample 50, then every 10
    assert_eq!(estimates.len(), 16);
    assert!(estimates.iter().all(|e| e.is_converged()));

    let last = estimates.last().unwrap();
    let j = last.inertia();
    for (axis, truth) in J_TRUE.iter().enumerate() {
        assert_relative(j[axis], *truth, 0.05, &format!("J[{}]", axis));
    }
    assert!(last.com_offset().amax() < 1e-3);
}

#[test]
fn test_estimated_attitude_tracks_truth() {
    init_logging();

    let estimates = roll_experiment(1.0, 25, Vector3::from(J_TRUE));

    // 101 samples: windows close at 50, 75 and 100
    assert_eq!(estimates.len(), 3);
    for estimate in &estimates {
        assert!(estimate.is_converged());
        assert_eq!(estimate.trajectory.shape(), (12, 51));
        assert!(estimate.noise.amax() < 1.0);
    }

    let latest = estimates[2].latest().unwrap();
    let lever = 0.330 * 2.0_f64.sqrt() / 2.0;
    let rate = 0.04 * lever / J_TRUE[0];
    assert!((latest.angular_velocity.x - rate).abs() < 5e-3);
    assert!(latest.angular_velocity.y.abs() < 5e-3);
}

#[test]
fn test_multi_axis_inertia_and_com_identified() {
    init_logging();
    let com_true = Vector2::new(0.004, -0.003);
    let sim_config = SimConfig {
        duration: 2.0,
        truth: TruthConfig {
            com_offset: com_true,
            ..Default::default()
        },
        ..Default::default()
    };
    let input = |t: f64| {
        mix(
            1.0,
            0.04 * (2.0 * PI * 1.0 * t).sin(),
            0.04 * (2.0 * PI * 0.7 * t).cos(),
            0.005 * (2.0 * PI * 0.5 * t).sin(),
        )
    };
    let prior = Vector3::new(0.03, 0.03, 0.035);

    let estimates = run_experiment(sim_config, input, 10, prior, Vector2::zeros());

    assert_eq!(estimates.len(), 16);
    let last = estimates.last().unwrap();
    assert!(last.is_converged());

    let j = last.inertia();
    for (axis, truth) in J_TRUE.iter().enumerate() {
        assert_relative(j[axis], *truth, 0.05, &format!("J[{}]", axis));
    }

    // r only enters through the collective thrust, a bias on roll and pitch
    let r = last.com_offset();
    assert!((r - com_true).amax() < 4e-4, "r = {} vs {}", r, com_true);
    assert!(r.x > 0.0 && r.y < 0.0);
}
