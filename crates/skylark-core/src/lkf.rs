//! Hover-linearised Kalman recursion with a reduced measurement, run beside
//! a constant-gain observer on the nonlinear model.

use crate::config::{CovarianceGuard, EstimatorTuning};
use crate::estimator::{
    check_covariance, clamp_altitude, Covariance, EstimatorKind, FilterStatus, FusionInputs,
    StateEstimator, StateVector, ATTITUDE, POSITION, RATES, STATE_DIM, VELOCITY,
};
use crate::model::RigidBodyModel;
use crate::Scalar;
use nalgebra::{SMatrix, SVector, Vector3};

pub const MEAS_DIM: usize = 6;

type Measurement = SVector<Scalar, MEAS_DIM>;
type MeasurementMatrix = SMatrix<Scalar, MEAS_DIM, STATE_DIM>;
type GainMatrix = SMatrix<Scalar, STATE_DIM, MEAS_DIM>;

/// State rows observed by the reduced measurement.
pub const OBSERVED: [usize; MEAS_DIM] = [
    ATTITUDE,
    ATTITUDE + 1,
    ATTITUDE + 2,
    POSITION,
    POSITION + 1,
    POSITION + 2,
];

fn measurement_matrix() -> MeasurementMatrix {
    let mut h = MeasurementMatrix::zeros();
    for (row, col) in OBSERVED.iter().enumerate() {
        h[(row, *col)] = 1.0;
    }
    h
}

/// Offline steady-state covariance pattern, scaled by `beta`.
pub fn steady_state_covariance(beta: Scalar) -> Covariance {
    let mut p = Covariance::zeros();
    p.fixed_view_mut::<3, 3>(ATTITUDE, ATTITUDE).fill_diagonal(2.4);
    p.fixed_view_mut::<3, 3>(RATES, RATES).fill_diagonal(1.6);
    p.fixed_view_mut::<3, 3>(VELOCITY, VELOCITY).fill_diagonal(0.8);
    p.fixed_view_mut::<3, 3>(POSITION, POSITION).fill_diagonal(1.2);

    p.fixed_view_mut::<3, 3>(ATTITUDE, RATES).fill_diagonal(-0.8);
    p.fixed_view_mut::<3, 3>(RATES, ATTITUDE).fill_diagonal(-0.8);
    p.fixed_view_mut::<3, 3>(VELOCITY, POSITION).fill_diagonal(0.4);
    p.fixed_view_mut::<3, 3>(POSITION, VELOCITY).fill_diagonal(0.4);
    p * beta
}

#[derive(Clone, Debug)]
pub struct LinearEstimator {
    /// Observer state on the nonlinear model.
    observer: StateVector,
    observer_gain: GainMatrix,

    x: StateVector,
    p: Covariance,
    h: MeasurementMatrix,
    r: SMatrix<Scalar, MEAS_DIM, MEAS_DIM>,
    guard: CovarianceGuard,
    clamp: bool,
}

impl LinearEstimator {
    pub fn new(tuning: &EstimatorTuning) -> Self {
        let h = measurement_matrix();
        Self {
            observer: StateVector::zeros(),
            observer_gain: steady_state_covariance(tuning.observer_beta) * h.transpose(),
            x: StateVector::zeros(),
            p: Covariance::from_diagonal_element(tuning.initial_covariance),
            h,
            r: SMatrix::from_diagonal_element(tuning.linear_measurement_noise),
            guard: tuning.covariance_guard,
            clamp: tuning.clamp_altitude,
        }
    }

    /// State of the hover-linearised recursion.
    pub fn linear_state(&self) -> &StateVector {
        &self.x
    }

    pub fn observer_gain(&self) -> &GainMatrix {
        &self.observer_gain
    }

    fn measurement(inputs: &FusionInputs) -> Measurement {
        let mut z = Measurement::zeros();
        z.fixed_rows_mut::<3>(0).copy_from(&inputs.euler);
        z.fixed_rows_mut::<3>(3).copy_from(&inputs.gps.position);
        z
    }
}

impl Default for LinearEstimator {
    fn default() -> Self {
        Self::new(&EstimatorTuning::linear())
    }
}

impl StateEstimator for LinearEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Linear
    }

    fn step(&mut self, model: &RigidBodyModel, inputs: &FusionInputs, dt: Scalar) -> FilterStatus {
        if !inputs.attitude_fresh {
            return FilterStatus::SkippedNoAttitude;
        }
        if !(dt > 0.0) {
            return FilterStatus::SkippedSmallDt;
        }
        let z = Self::measurement(inputs);

        // Observer
        let obs_dot = model.derivative(&self.observer, &inputs.wrench)
            + self.observer_gain * (z - self.h * self.observer);
        self.observer += obs_dot * dt;

        // Predict
        let f = model.hover_dynamics();
        let phi = Covariance::identity() + f * dt;
        let p_prior = phi * self.p * phi.transpose();
        let x_prior =
            self.x + (f * self.x + model.input_matrix() * model.trim_input(&inputs.wrench)) * dt;

        // Correct
        let s = self.h * p_prior * self.h.transpose() + self.r;
        let status = match s.try_inverse() {
            Some(s_inv) => {
                let k = p_prior * self.h.transpose() * s_inv;
                self.x = x_prior + k * (z - self.h * x_prior);
                self.p = (Covariance::identity() - k * self.h) * p_prior;
                FilterStatus::Updated
            }
            None => {
                self.x = x_prior;
                self.p = p_prior;
                FilterStatus::SingularInnovation
            }
        };

        if self.guard == CovarianceGuard::Symmetrize {
            self.p = (self.p + self.p.transpose()) * 0.5;
        }
        check_covariance(&self.p, EstimatorKind::Linear);

        if self.clamp {
            clamp_altitude(&mut self.observer);
            clamp_altitude(&mut self.x);
        }
        status
    }

    /// Reported estimate is the observer.
    fn state(&self) -> &StateVector {
        &self.observer
    }

    fn covariance(&self) -> &Covariance {
        &self.p
    }

    fn retune(&mut self, tuning: &EstimatorTuning) {
        self.observer_gain = steady_state_covariance(tuning.observer_beta) * self.h.transpose();
        self.r = SMatrix::from_diagonal_element(tuning.linear_measurement_noise);
        self.guard = tuning.covariance_guard;
        self.clamp = tuning.clamp_altitude;
    }

    /// Raw Euler angles of the attitude source.
    fn aux(&self, inputs: &FusionInputs) -> Vector3<Scalar> {
        inputs.euler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::LocalFix;

    fn inputs(model: &RigidBodyModel, euler: Vector3<Scalar>, pos: Vector3<Scalar>) -> FusionInputs {
        FusionInputs {
            euler,
            attitude_fresh: true,
            body_rates: Vector3::zeros(),
            gps: LocalFix {
                timestamp_us: 0,
                position: pos,
                velocity: Vector3::zeros(),
            },
            wrench: model.hover_wrench(),
        }
    }

    #[test]
    fn test_steady_state_pattern() {
        let p = steady_state_covariance(200.0);
        assert_eq!(p, p.transpose());
        assert_eq!(p[(0, 0)], 480.0);
        assert_eq!(p[(2, 5)], -160.0);
        assert_eq!(p[(8, 11)], 80.0);
        assert_eq!(p[(11, 11)], 240.0);

        let k = LinearEstimator::default();
        // Column 3 of K picks the x-position column of P
        assert_eq!(k.observer_gain()[(POSITION, 3)], 240.0);
        assert_eq!(k.observer_gain()[(VELOCITY, 3)], 80.0);
    }

    #[test]
    fn test_no_fresh_attitude_no_change() {
        let model = RigidBodyModel::default();
        let mut lkf = LinearEstimator::default();
        let mut i = inputs(&model, Vector3::new(0.1, 0.0, 0.0), Vector3::new(1.0, 2.0, -3.0));
        i.attitude_fresh = false;

        let before = (*lkf.state(), *lkf.linear_state(), *lkf.covariance());
        assert_eq!(lkf.step(&model, &i, 0.001), FilterStatus::SkippedNoAttitude);
        assert_eq!((*lkf.state(), *lkf.linear_state(), *lkf.covariance()), before);
    }

    #[test]
    fn test_correction_pulls_toward_measurement() {
        let model = RigidBodyModel::default();
        let mut lkf = LinearEstimator::default();
        let target = Vector3::new(2.0, -1.0, -4.0);
        let i = inputs(&model, Vector3::zeros(), target);

        assert_eq!(lkf.step(&model, &i, 0.001), FilterStatus::Updated);
        // P = I, R = 0.01·I: first correction lands almost on the measurement
        let pos = lkf.linear_state().fixed_rows::<3>(POSITION).into_owned();
        assert!((pos - target).norm() < 0.1, "linear position {pos:?}");
        assert!(lkf.covariance()[(POSITION, POSITION)] < 0.02);
    }

    #[test]
    fn test_observer_tracks_position() {
        let model = RigidBodyModel::default();
        let mut lkf = LinearEstimator::default();
        let target = Vector3::new(5.0, 3.0, -8.0);
        let i = inputs(&model, Vector3::zeros(), target);
        for _ in 0..2000 {
            lkf.step(&model, &i, 0.001);
        }
        assert!((lkf.position() - target).norm() < 0.05, "observer {:?}", lkf.position());
    }

    #[test]
    fn test_altitude_clamped_on_both_states() {
        let model = RigidBodyModel::default();
        let mut lkf = LinearEstimator::default();
        let i = inputs(&model, Vector3::zeros(), Vector3::new(0.0, 0.0, 3.0));
        for _ in 0..100 {
            lkf.step(&model, &i, 0.001);
            assert!(lkf.state()[POSITION + 2] <= 0.0);
            assert!(lkf.linear_state()[POSITION + 2] <= 0.0);
        }
    }

    #[test]
    fn test_aux_is_raw_euler() {
        let model = RigidBodyModel::default();
        let lkf = LinearEstimator::default();
        let e = Vector3::new(0.1, -0.2, 0.3);
        assert_eq!(lkf.aux(&inputs(&model, e, Vector3::zeros())), e);
    }
}
