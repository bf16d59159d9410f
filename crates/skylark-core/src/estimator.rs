//! Shared state layout and the seam between the fusion engine and the two
//! estimator variants.

use crate::config::EstimatorTuning;
use crate::gps::LocalFix;
use crate::model::RigidBodyModel;
use crate::wrench::BodyWrench;
use crate::Scalar;
use nalgebra::{SMatrix, SVector, Vector3};

// ---------------------------------------------------------------------------
// STATE LAYOUT
// ---------------------------------------------------------------------------
pub const STATE_DIM: usize = 12;

pub type StateVector = SVector<Scalar, STATE_DIM>;
pub type Covariance = SMatrix<Scalar, STATE_DIM, STATE_DIM>;

/// `[roll, pitch, yaw]`
pub const ATTITUDE: usize = 0;
/// `[p, q, r]`
pub const RATES: usize = 3;
/// `[u, v, w]`
pub const VELOCITY: usize = 6;
/// `[x, y, z]`, NED, z positive down
pub const POSITION: usize = 9;
pub const ALTITUDE: usize = POSITION + 2;

// ---------------------------------------------------------------------------
// STATUS
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStatus {
    Updated,
    /// No fresh attitude sample this cycle.
    SkippedNoAttitude,
    SkippedSmallDt,
    /// Innovation covariance could not be inverted; prediction kept.
    SingularInnovation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    Extended,
    Linear,
}

impl EstimatorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Extended => "extended",
            Self::Linear => "linear",
        }
    }
}

/// Everything one estimator step may read, assembled by the fusion engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionInputs {
    /// `(roll, pitch, yaw)` from the selected attitude source.
    pub euler: Vector3<Scalar>,
    /// Whether `euler` comes from a sample that arrived this cycle.
    pub attitude_fresh: bool,
    pub body_rates: Vector3<Scalar>,
    pub gps: LocalFix,
    pub wrench: BodyWrench,
}

// ---------------------------------------------------------------------------
// CORRECTION STRATEGY
// ---------------------------------------------------------------------------

/// A state estimator driven once per fusion cycle.
///
/// Both variants share [`RigidBodyModel`]; they differ in how the measurement
/// corrects the propagated state.
pub trait StateEstimator {
    fn kind(&self) -> EstimatorKind;

    /// Advance the estimate by `dt` and fold in the measurement.
    fn step(&mut self, model: &RigidBodyModel, inputs: &FusionInputs, dt: Scalar) -> FilterStatus;

    fn state(&self) -> &StateVector;

    fn covariance(&self) -> &Covariance;

    /// Pick up new gains and noise levels without resetting the state.
    fn retune(&mut self, tuning: &EstimatorTuning);

    /// Third group of the output record.
    fn aux(&self, inputs: &FusionInputs) -> Vector3<Scalar>;

    fn attitude(&self) -> Vector3<Scalar> {
        self.state().fixed_rows::<3>(ATTITUDE).into_owned()
    }

    fn position(&self) -> Vector3<Scalar> {
        self.state().fixed_rows::<3>(POSITION).into_owned()
    }
}

/// Full-state measurement `[euler, rates, gps velocity, gps position]`.
pub fn full_measurement(inputs: &FusionInputs) -> StateVector {
    let mut z = StateVector::zeros();
    z.fixed_rows_mut::<3>(ATTITUDE).copy_from(&inputs.euler);
    z.fixed_rows_mut::<3>(RATES).copy_from(&inputs.body_rates);
    z.fixed_rows_mut::<3>(VELOCITY).copy_from(&inputs.gps.velocity);
    z.fixed_rows_mut::<3>(POSITION).copy_from(&inputs.gps.position);
    z
}

/// Forces the altitude component to stay at or above ground (`z ≤ 0`).
pub fn clamp_altitude(x: &mut StateVector) {
    if x[ALTITUDE] > 0.0 {
        x[ALTITUDE] = 0.0;
    }
}

/// Warns once per call about negative or non-finite diagonal entries.
pub(crate) fn check_covariance(p: &Covariance, kind: EstimatorKind) -> bool {
    let bad = p.diagonal().iter().position(|d| !d.is_finite() || *d < 0.0);
    if let Some(index) = bad {
        tracing::warn!(
            estimator = kind.label(),
            index,
            value = p[(index, index)],
            "covariance diagonal out of range"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_measurement_layout() {
        let inputs = FusionInputs {
            euler: Vector3::new(1.0, 2.0, 3.0),
            attitude_fresh: true,
            body_rates: Vector3::new(4.0, 5.0, 6.0),
            gps: LocalFix {
                timestamp_us: 0,
                position: Vector3::new(10.0, 11.0, 12.0),
                velocity: Vector3::new(7.0, 8.0, 9.0),
            },
            wrench: BodyWrench::default(),
        };
        let z = full_measurement(&inputs);
        for i in 0..STATE_DIM {
            assert_eq!(z[i], (i + 1) as Scalar, "index {i}");
        }
    }

    #[test]
    fn test_clamp_altitude_only_touches_z() {
        let mut x = StateVector::from_element(3.0);
        clamp_altitude(&mut x);
        assert_eq!(x[ALTITUDE], 0.0);
        assert_eq!(x[POSITION], 3.0);

        x[ALTITUDE] = -4.0;
        clamp_altitude(&mut x);
        assert_eq!(x[ALTITUDE], -4.0);
    }

    #[test]
    fn test_check_covariance_flags_negative_diagonal() {
        let mut p = Covariance::identity();
        assert!(check_covariance(&p, EstimatorKind::Extended));
        p[(4, 4)] = -1e-3;
        assert!(!check_covariance(&p, EstimatorKind::Extended));
        p[(4, 4)] = Scalar::NAN;
        assert!(!check_covariance(&p, EstimatorKind::Linear));
    }
}
