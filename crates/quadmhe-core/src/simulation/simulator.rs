//! Reference trajectory simulator
//!
//! Integrates the augmented attitude dynamics with the same RK4 scheme the
//! estimator assumes, recording true states and the thrusts applied.

use nalgebra::{DVector, Vector4};

use super::SimConfig;
use crate::dynamics::{AttitudeDynamics, AugmentedState};
use crate::error::ModelError;
use crate::math::normalize;

/// Simulation output for one timestep
#[derive(Debug, Clone)]
pub struct SimStep {
    /// Simulation time at the end of the step [s]
    pub time: f64,
    /// State at `time`
    pub state: AugmentedState,
    /// Thrusts held over the step
    pub thrust: Vector4<f64>,
}

/// Simulation history
///
/// `states[k]` is the state at `times[k]`; `thrusts[k]` is applied over
/// `[times[k], times[k + 1]]`, so there is one fewer thrust than states.
#[derive(Debug, Clone, Default)]
pub struct SimHistory {
    pub times: Vec<f64>,
    pub states: Vec<AugmentedState>,
    pub thrusts: Vec<Vector4<f64>>,
}

impl SimHistory {
    fn start(time: f64, state: AugmentedState) -> Self {
        Self {
            times: vec![time],
            states: vec![state],
            thrusts: Vec::new(),
        }
    }

    /// Record a simulation step
    pub fn record(&mut self, step: &SimStep) {
        self.times.push(step.time);
        self.states.push(step.state.clone());
        self.thrusts.push(step.thrust);
    }

    /// Get simulation duration
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Get number of recorded states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if history is empty
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Attitude simulator
pub struct AttitudeSimulator {
    /// Configuration
    pub config: SimConfig,
    dynamics: AttitudeDynamics,
    state: DVector<f64>,
    time: f64,
    history: SimHistory,
}

impl AttitudeSimulator {
    /// Create a simulator starting from the configured true state
    pub fn new(config: SimConfig) -> Result<Self, ModelError> {
        if !(config.dt.is_finite() && config.dt > 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "simulation step must be positive, got {}",
                config.dt
            )));
        }
        let dynamics = config.airframe.to_dynamics()?;
        let initial = config.truth.initial_state();
        dynamics.check_inertia(&initial.inertia)?;

        Ok(Self {
            state: initial.to_vector(),
            history: SimHistory::start(0.0, initial),
            time: 0.0,
            dynamics,
            config,
        })
    }

    pub fn dynamics(&self) -> &AttitudeDynamics {
        &self.dynamics
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Current true state
    pub fn state(&self) -> Result<AugmentedState, ModelError> {
        AugmentedState::from_slice(self.state.as_slice())
    }

    pub fn history(&self) -> &SimHistory {
        &self.history
    }

    /// Advance by one sampling step holding `thrust` constant
    pub fn step(&mut self, thrust: &Vector4<f64>) -> Result<SimStep, ModelError> {
        let u = DVector::from_column_slice(thrust.as_slice());
        let t1 = self.time + self.config.dt;

        let mut next = self.dynamics.step(
            &self.state,
            &u,
            [self.time, t1],
            self.config.integrator_steps,
        )?;
        if self.config.renormalize {
            let q = normalize(&next.fixed_rows::<4>(0).into_owned());
            next.fixed_rows_mut::<4>(0).copy_from(&q);
        }

        self.state = next;
        self.time = t1;

        let step = SimStep {
            time: t1,
            state: self.state()?,
            thrust: *thrust,
        };
        self.history.record(&step);
        Ok(step)
    }

    /// Run for the configured duration with `input(t)` giving the thrusts
    pub fn run<F>(&mut self, mut input: F) -> Result<&SimHistory, ModelError>
    where
        F: FnMut(f64) -> Vector4<f64>,
    {
        for _ in 0..self.config.num_steps() {
            let thrust = input(self.time);
            self.step(&thrust)?;
        }
        log::debug!(
            "simulated {} steps over {:.3} s",
            self.history.len().saturating_sub(1),
            self.history.duration()
        );
        Ok(&self.history)
    }

    /// Return to the initial state and clear the history
    pub fn reset(&mut self) {
        let initial = self.config.truth.initial_state();
        self.state = initial.to_vector();
        self.time = 0.0;
        self.history = SimHistory::start(0.0, initial);
    }
}
