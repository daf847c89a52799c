//! Sliding-window driver
//!
//! Buffers a measurement stream and solves a horizon each time N+1 samples
//! are available. After a solve the oldest `stride` samples are dropped and
//! the estimate at node `stride` becomes the arrival prior of the next
//! window.

use std::collections::VecDeque;

use nalgebra::{DVector, Vector2, Vector3};
use quadmhe_core::dynamics::AugmentedState;

use crate::error::{check_dim, EstimatorError};
use crate::estimator::{HorizonWindow, MheEstimate, MovingHorizonEstimator};
use crate::solver::{GaussNewtonSolver, NlpSolverBackend};

/// Streaming estimator over overlapping windows
pub struct SlidingHorizon<B: NlpSolverBackend = GaussNewtonSolver> {
    estimator: MovingHorizonEstimator<B>,
    stride: usize,
    prior_inertia: Vector3<f64>,
    prior_com_offset: Vector2<f64>,
    measurements: VecDeque<DVector<f64>>,
    controls: VecDeque<DVector<f64>>,
    arrival: Option<AugmentedState>,
    solves: usize,
}

impl<B: NlpSolverBackend> SlidingHorizon<B> {
    /// # Arguments
    /// * `estimator` - Prepared estimator
    /// * `stride` - Samples dropped between solves, `1..=N`
    /// * `prior_inertia` - Initial guess of `J`
    /// * `prior_com_offset` - Initial guess of `r`
    pub fn new(
        estimator: MovingHorizonEstimator<B>,
        stride: usize,
        prior_inertia: Vector3<f64>,
        prior_com_offset: Vector2<f64>,
    ) -> Result<Self, EstimatorError> {
        let n = estimator.problem().dims().n;
        if stride == 0 || stride > n {
            return Err(EstimatorError::InvalidParameter(format!(
                "stride must lie in 1..={}, got {}",
                n, stride
            )));
        }
        estimator
            .problem()
            .model()
            .dynamics()
            .check_inertia(&prior_inertia)?;

        Ok(Self {
            estimator,
            stride,
            prior_inertia,
            prior_com_offset,
            measurements: VecDeque::with_capacity(n + 1),
            controls: VecDeque::with_capacity(n + 1),
            arrival: None,
            solves: 0,
        })
    }

    pub fn estimator(&self) -> &MovingHorizonEstimator<B> {
        &self.estimator
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Samples currently buffered
    pub fn buffered(&self) -> usize {
        self.measurements.len()
    }

    /// Number of horizon solves so far
    pub fn solves(&self) -> usize {
        self.solves
    }

    /// Prior on the first node of the next window
    pub fn arrival(&self) -> Option<&AugmentedState> {
        self.arrival.as_ref()
    }

    /// Add one sample
    ///
    /// `control` is the thrust applied from this sample to the next. Returns
    /// the estimate when the sample completes a window.
    ///
    /// The oldest `stride` samples are dropped whether or not the solve
    /// succeeds. After a failed solve the arrival prior is re-seeded from
    /// the new first sample, keeping its parameter guess unless that guess
    /// is not a valid inertia, and the warm start is dropped.
    pub fn push(
        &mut self,
        measurement: DVector<f64>,
        control: DVector<f64>,
    ) -> Result<Option<MheEstimate>, EstimatorError> {
        let d = *self.estimator.problem().dims();
        check_dim("measurement", d.nx, measurement.len())?;
        check_dim("control", d.np, control.len())?;

        let (inertia, com_offset) = (self.prior_inertia, self.prior_com_offset);
        let arrival = self
            .arrival
            .get_or_insert_with(|| seeded(inertia, com_offset, &measurement))
            .clone();

        self.measurements.push_back(measurement);
        self.controls.push_back(control);
        if self.measurements.len() < d.n + 1 {
            return Ok(None);
        }

        let result = HorizonWindow::new(
            self.estimator.problem(),
            self.measurements.iter().cloned().collect(),
            self.controls.iter().take(d.n).cloned().collect(),
            arrival.clone(),
        )
        .and_then(|window| self.estimator.solve(&window));

        self.measurements.drain(..self.stride);
        self.controls.drain(..self.stride);

        match result {
            Ok(estimate) => {
                self.solves += 1;
                if let Some(next) = estimate.state(self.stride) {
                    self.arrival = Some(next);
                }
                log::debug!(
                    "window {} solved, {} samples carried over",
                    self.solves,
                    self.measurements.len()
                );
                Ok(Some(estimate))
            }
            Err(err) => {
                let dynamics = self.estimator.problem().model().dynamics();
                let (inertia, com_offset) = match dynamics.check_inertia(&arrival.inertia) {
                    Ok(()) => (arrival.inertia, arrival.com_offset),
                    Err(_) => (self.prior_inertia, self.prior_com_offset),
                };
                if let Some(first) = self.measurements.front() {
                    self.arrival = Some(seeded(inertia, com_offset, first));
                }
                self.estimator.reset_warm_start();
                log::warn!("window dropped after failed solve: {}", err);
                Err(err)
            }
        }
    }

    /// Drop buffered samples and the arrival prior
    pub fn reset(&mut self) {
        self.measurements.clear();
        self.controls.clear();
        self.arrival = None;
        self.estimator.reset_warm_start();
    }
}

/// Prior at rest on `measurement` with the given parameter guess
fn seeded(inertia: Vector3<f64>, com_offset: Vector2<f64>, measurement: &DVector<f64>) -> AugmentedState {
    let mut prior = AugmentedState::at_rest(inertia, com_offset);
    prior.quaternion.copy_from(&measurement.rows(0, 4));
    prior.angular_velocity.copy_from(&measurement.rows(4, 3));
    prior
}
