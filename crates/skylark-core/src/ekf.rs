use crate::config::{CovarianceGuard, EstimatorTuning, GainMode};
use crate::estimator::{
    check_covariance, clamp_altitude, full_measurement, Covariance, EstimatorKind, FilterStatus,
    FusionInputs, StateEstimator, StateVector, ATTITUDE, POSITION, RATES, STATE_DIM, VELOCITY,
};
use crate::model::RigidBodyModel;
use crate::Scalar;
use nalgebra::Vector3;

/// Per-row measurement information (`R⁻¹` diagonal).
fn information(tuning: &EstimatorTuning) -> StateVector {
    let mut r_inv = StateVector::zeros();
    r_inv.fixed_rows_mut::<3>(ATTITUDE).fill(tuning.attitude_information);
    r_inv.fixed_rows_mut::<3>(RATES).fill(tuning.attitude_information);
    r_inv.fixed_rows_mut::<3>(VELOCITY).fill(tuning.gps_information);
    r_inv.fixed_rows_mut::<3>(POSITION).fill(tuning.gps_information);
    r_inv
}

/// One explicit Euler step of `Ṗ = F·P + P·Fᵀ + Q − P·Hᵀ·R⁻¹·H·P` with `H = I`.
pub fn riccati_step(
    p: &Covariance,
    f: &Covariance,
    q: &Covariance,
    r_inv: &StateVector,
    dt: Scalar,
) -> Covariance {
    let p_dot = f * p + p * f.transpose() + q - p * Covariance::from_diagonal(r_inv) * p;
    p + p_dot * dt
}

/// Continuous-time extended estimator over the full 12-state measurement.
///
/// The correction gain defaults to `K = P₀·R⁻¹`, computed once; the covariance
/// keeps evolving through the Riccati equation regardless of [`GainMode`].
#[derive(Clone, Debug)]
pub struct ExtendedEstimator {
    x: StateVector,
    p: Covariance,
    k: Covariance,
    q: Covariance,
    r_inv: StateVector,
    gain_mode: GainMode,
    guard: CovarianceGuard,
    clamp: bool,
}

impl ExtendedEstimator {
    pub fn new(tuning: &EstimatorTuning) -> Self {
        let p = Covariance::from_diagonal_element(tuning.initial_covariance);
        let r_inv = information(tuning);
        Self {
            x: StateVector::zeros(),
            p,
            k: p * Covariance::from_diagonal(&r_inv),
            q: Covariance::from_diagonal_element(tuning.process_noise),
            r_inv,
            gain_mode: tuning.gain_mode,
            guard: tuning.covariance_guard,
            clamp: tuning.clamp_altitude,
        }
    }

    pub fn gain(&self) -> &Covariance {
        &self.k
    }
}

impl Default for ExtendedEstimator {
    fn default() -> Self {
        Self::new(&EstimatorTuning::extended())
    }
}

impl StateEstimator for ExtendedEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Extended
    }

    fn step(&mut self, model: &RigidBodyModel, inputs: &FusionInputs, dt: Scalar) -> FilterStatus {
        if !(dt > 0.0) {
            return FilterStatus::SkippedSmallDt;
        }

        let z = full_measurement(inputs);
        let f = model.jacobian(&self.x);

        if self.gain_mode == GainMode::Recursive {
            self.k = self.p * Covariance::from_diagonal(&self.r_inv);
        }

        let x_dot = model.derivative(&self.x, &inputs.wrench) + self.k * (z - self.x);
        self.x += x_dot * dt;

        self.p = riccati_step(&self.p, &f, &self.q, &self.r_inv, dt);
        if self.guard == CovarianceGuard::Symmetrize {
            self.p = (self.p + self.p.transpose()) * 0.5;
        }
        check_covariance(&self.p, EstimatorKind::Extended);

        if self.clamp {
            clamp_altitude(&mut self.x);
        }
        FilterStatus::Updated
    }

    fn state(&self) -> &StateVector {
        &self.x
    }

    fn covariance(&self) -> &Covariance {
        &self.p
    }

    fn retune(&mut self, tuning: &EstimatorTuning) {
        self.q = Covariance::from_diagonal_element(tuning.process_noise);
        self.r_inv = information(tuning);
        self.gain_mode = tuning.gain_mode;
        self.guard = tuning.covariance_guard;
        self.clamp = tuning.clamp_altitude;
        if self.gain_mode == GainMode::Frozen {
            // Frozen gain is always tied to the initial covariance
            let p0 = Covariance::from_diagonal_element(tuning.initial_covariance);
            self.k = p0 * Covariance::from_diagonal(&self.r_inv);
        }
    }

    /// GPS-derived position.
    fn aux(&self, inputs: &FusionInputs) -> Vector3<Scalar> {
        inputs.gps.position
    }
}

const _: () = assert!(STATE_DIM == 12);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::LocalFix;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn hover_inputs(model: &RigidBodyModel, position: Vector3<Scalar>) -> FusionInputs {
        FusionInputs {
            euler: Vector3::zeros(),
            attitude_fresh: true,
            body_rates: Vector3::zeros(),
            gps: LocalFix {
                timestamp_us: 0,
                position,
                velocity: Vector3::zeros(),
            },
            wrench: model.hover_wrench(),
        }
    }

    fn random_spd(rng: &mut StdRng) -> Covariance {
        let a = Covariance::from_fn(|_, _| rng.gen_range(-1.0..1.0));
        a * a.transpose() + Covariance::identity() * 0.1
    }

    fn random_state(rng: &mut StdRng) -> StateVector {
        let mut x = StateVector::zeros();
        for i in 0..3 {
            x[ATTITUDE + i] = rng.gen_range(-0.5..0.5);
            x[RATES + i] = rng.gen_range(-1.0..1.0);
            x[VELOCITY + i] = rng.gen_range(-5.0..5.0);
            x[POSITION + i] = rng.gen_range(-20.0..20.0);
        }
        x
    }

    #[test]
    fn test_riccati_step_bounded_without_noise() {
        let model = RigidBodyModel::default();
        let mut rng = StdRng::seed_from_u64(7);
        let zero_q = Covariance::zeros();
        let zero_r = StateVector::zeros();
        let dt = 1e-4;

        for _ in 0..200 {
            let p = random_spd(&mut rng);
            let f = model.jacobian(&random_state(&mut rng));
            let next = riccati_step(&p, &f, &zero_q, &zero_r, dt);

            let moved = (next - p).norm();
            let bound = 2.0 * dt * f.norm() * p.norm();
            assert!(moved <= bound + 1e-9, "moved {moved} > {bound}");
            assert!(next.diagonal().iter().all(|d| *d > 0.0));
            assert!((next - next.transpose()).norm() < 1e-9);
        }
    }

    #[test]
    fn test_riccati_measurement_term_shrinks_trace() {
        let mut rng = StdRng::seed_from_u64(11);
        let zero = Covariance::zeros();
        for _ in 0..200 {
            let p = random_spd(&mut rng);
            let r_inv = StateVector::from_fn(|_, _| rng.gen_range(0.0..2.0));
            let next = riccati_step(&p, &zero, &zero, &r_inv, 1e-3);
            assert!(next.trace() <= p.trace() + 1e-12);
        }
    }

    #[test]
    fn test_frozen_gain_does_not_follow_covariance() {
        let model = RigidBodyModel::default();
        let mut ekf = ExtendedEstimator::default();
        let k0 = *ekf.gain();
        let inputs = hover_inputs(&model, Vector3::new(1.0, -1.0, -2.0));
        for _ in 0..50 {
            assert_eq!(ekf.step(&model, &inputs, 0.005), FilterStatus::Updated);
        }
        assert_eq!(*ekf.gain(), k0);
        assert_ne!(*ekf.covariance(), Covariance::identity());
    }

    #[test]
    fn test_recursive_gain_tracks_covariance() {
        let model = RigidBodyModel::default();
        let tuning = EstimatorTuning {
            gain_mode: GainMode::Recursive,
            ..EstimatorTuning::extended()
        };
        let mut ekf = ExtendedEstimator::new(&tuning);
        let k0 = *ekf.gain();
        let inputs = hover_inputs(&model, Vector3::zeros());
        for _ in 0..20 {
            ekf.step(&model, &inputs, 0.005);
        }
        let p_before = *ekf.covariance();
        ekf.step(&model, &inputs, 0.005);

        // Gain comes from P before this last propagation
        let expected = p_before * Covariance::from_diagonal(&information(&tuning));
        assert!((ekf.gain() - expected).norm() < 1e-12);
        assert_ne!(*ekf.gain(), k0);
    }

    #[test]
    fn test_converges_to_gps_position() {
        let model = RigidBodyModel::default();
        let mut ekf = ExtendedEstimator::default();
        let target = Vector3::new(4.0, -3.0, -10.0);
        let inputs = hover_inputs(&model, target);
        for _ in 0..4000 {
            ekf.step(&model, &inputs, 0.005);
        }
        let err = (ekf.position() - target).norm();
        assert!(err < 0.1, "position error {err}");
        assert!(ekf.state().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_altitude_clamped_on_ground() {
        let model = RigidBodyModel::default();
        let mut ekf = ExtendedEstimator::default();
        // GPS reads below the take-off point
        let inputs = hover_inputs(&model, Vector3::new(0.0, 0.0, 2.0));
        for _ in 0..200 {
            ekf.step(&model, &inputs, 0.005);
            assert!(ekf.position().z <= 0.0);
        }
    }

    #[test]
    fn test_symmetrize_guard() {
        let model = RigidBodyModel::default();
        let tuning = EstimatorTuning {
            covariance_guard: CovarianceGuard::Symmetrize,
            ..EstimatorTuning::extended()
        };
        let mut ekf = ExtendedEstimator::new(&tuning);
        let mut inputs = hover_inputs(&model, Vector3::new(1.0, 1.0, -1.0));
        inputs.body_rates = Vector3::new(0.3, -0.2, 0.1);
        for _ in 0..100 {
            ekf.step(&model, &inputs, 0.005);
        }
        let p = ekf.covariance();
        assert_eq!(*p, p.transpose());
    }

    #[test]
    fn test_non_positive_dt_skipped() {
        let model = RigidBodyModel::default();
        let mut ekf = ExtendedEstimator::default();
        let inputs = hover_inputs(&model, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(ekf.step(&model, &inputs, 0.0), FilterStatus::SkippedSmallDt);
        assert_eq!(*ekf.state(), StateVector::zeros());
    }
}
