//! Fixed-step numerical integration
//!
//! Classical 4th-order Runge-Kutta for dynamics of the form
//! `f(t, x, u) -> dx/dt`, with the input held constant over the step.
//! The same scheme advances the reference simulator and realizes the
//! shooting-interval transition of the estimator, so both discretize the
//! model identically.
//!
//! The integrator performs no state-space projection: in particular a
//! quaternion stored in `x` is not renormalized after the step.

use nalgebra::DVector;

/// Advance `x` over `tspan = [t0, t1]` with one classical RK4 step
///
/// ```text
/// k1 = f(t0,        x,             u)
/// k2 = f(t0 + dt/2, x + dt/2 k1,   u)
/// k3 = f(t0 + dt/2, x + dt/2 k2,   u)
/// k4 = f(t1,        x + dt k3,     u)
/// x⁺ = x + dt/6 (k1 + 2k2 + 2k3 + k4)
/// ```
///
/// Errors raised by `f` are propagated unchanged.
pub fn rk4_step<F, E>(
    f: F,
    x: &DVector<f64>,
    u: &DVector<f64>,
    tspan: [f64; 2],
) -> Result<DVector<f64>, E>
where
    F: Fn(f64, &DVector<f64>, &DVector<f64>) -> Result<DVector<f64>, E>,
{
    let [t0, t1] = tspan;
    let dt = t1 - t0;
    let tm = t0 + dt / 2.0;

    let k1 = f(t0, x, u)?;
    let k2 = f(tm, &(x + &k1 * (dt / 2.0)), u)?;
    let k3 = f(tm, &(x + &k2 * (dt / 2.0)), u)?;
    let k4 = f(t1, &(x + &k3 * dt), u)?;

    Ok(x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
}

/// Advance `x` over `tspan` with `num_steps` equal RK4 sub-steps
///
/// `num_steps == 1` is exactly [`rk4_step`]. A value of zero is treated as one.
pub fn rk4_substeps<F, E>(
    f: F,
    x: &DVector<f64>,
    u: &DVector<f64>,
    tspan: [f64; 2],
    num_steps: usize,
) -> Result<DVector<f64>, E>
where
    F: Fn(f64, &DVector<f64>, &DVector<f64>) -> Result<DVector<f64>, E>,
{
    let num_steps = num_steps.max(1);
    let h = (tspan[1] - tspan[0]) / num_steps as f64;

    let mut state = x.clone();
    for i in 0..num_steps {
        let t = tspan[0] + i as f64 * h;
        state = rk4_step(&f, &state, u, [t, t + h])?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::convert::Infallible;

    /// ṡ = [v, F/m] with m = 1
    fn double_integrator(
        _t: f64,
        s: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, Infallible> {
        let mass = 1.0;
        Ok(DVector::from_vec(vec![s[1], u[0] / mass]))
    }

    #[test]
    fn test_rk4_double_integrator_closed_form() {
        let dt = 0.01;
        let (s0, v0, a) = (0.5, 2.0, -1.0);
        let u = DVector::from_element(1, a);
        let mut s = DVector::from_vec(vec![s0, v0]);

        for i in 0..1000 {
            let t0 = i as f64 * dt;
            s = rk4_step(double_integrator, &s, &u, [t0, t0 + dt]).unwrap();

            let t = t0 + dt;
            assert_relative_eq!(s[0], s0 + v0 * t + 0.5 * a * t * t, epsilon = 1e-6);
            assert_relative_eq!(s[1], v0 + a * t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rk4_exponential_decay() {
        // ẋ = -x, x(0) = 1
        let mut x = DVector::from_element(1, 1.0);
        let u = DVector::zeros(0);
        let dt = 0.01;

        for i in 0..100 {
            let t0 = i as f64 * dt;
            x = rk4_step(|_t, x: &DVector<f64>, _u: &DVector<f64>| Ok::<_, Infallible>(-x), &x, &u, [t0, t0 + dt])
                .unwrap();
        }

        assert_relative_eq!(x[0], (-1.0_f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn test_rk4_uses_stage_times() {
        // ẋ = t integrates to t²/2 exactly under RK4
        let x = DVector::from_element(1, 0.0);
        let u = DVector::zeros(0);

        let x1 = rk4_step(
            |t, _x: &DVector<f64>, _u: &DVector<f64>| Ok::<_, Infallible>(DVector::from_element(1, t)),
            &x,
            &u,
            [1.0, 1.5],
        )
        .unwrap();

        assert_relative_eq!(x1[0], 0.5 * (1.5 * 1.5 - 1.0), epsilon = 1e-14);
    }

    #[test]
    fn test_substeps_improve_accuracy() {
        // ẋ = x over a coarse step
        let x = DVector::from_element(1, 1.0);
        let u = DVector::zeros(0);
        let growth = |_t: f64, x: &DVector<f64>, _u: &DVector<f64>| Ok::<_, Infallible>(x.clone());

        let single = rk4_substeps(growth, &x, &u, [0.0, 1.0], 1).unwrap();
        let four = rk4_substeps(growth, &x, &u, [0.0, 1.0], 4).unwrap();
        let exact = 1.0_f64.exp();

        assert!((four[0] - exact).abs() < (single[0] - exact).abs() / 100.0);
        assert_eq!(rk4_substeps(growth, &x, &u, [0.0, 1.0], 0).unwrap(), single);
    }

    #[test]
    fn test_errors_propagate() {
        let x = DVector::from_element(1, 1.0);
        let u = DVector::zeros(0);

        let result = rk4_step(
            |_t, _x: &DVector<f64>, _u: &DVector<f64>| Err::<DVector<f64>, _>("bad model"),
            &x,
            &u,
            [0.0, 0.1],
        );

        assert_eq!(result.unwrap_err(), "bad model");
    }
}
