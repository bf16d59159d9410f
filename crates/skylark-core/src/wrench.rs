//! Actuator outputs to body torques and collective thrust.
//!
//! Outputs are numbered for an X-quad: 0 and 1 pitch the vehicle, 2 and 3 roll it,
//! 0/1 spin one way and 2/3 the other.

use crate::config::{SmootherTuning, WrenchCoefficients};
use crate::Scalar;
use nalgebra::Vector3;

#[cfg(not(feature = "std"))]
use nalgebra::ComplexField as _;

pub const NUM_ACTUATORS: usize = 4;

/// Torques `τ` (N·m) in FRD and collective thrust `T` (N) along −z.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BodyWrench {
    pub torque: Vector3<Scalar>,
    pub thrust: Scalar,
}

impl BodyWrench {
    pub fn as_array(&self) -> [Scalar; 4] {
        [self.torque.x, self.torque.y, self.torque.z, self.thrust]
    }

    fn from_array(a: [Scalar; 4]) -> Self {
        Self {
            torque: Vector3::new(a[0], a[1], a[2]),
            thrust: a[3],
        }
    }
}

// ---------------------------------------------------------------------------
// SCALAR SMOOTHER
// ---------------------------------------------------------------------------

/// One-dimensional Kalman smoother with an adaptive estimate error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarKalman {
    measurement_error: Scalar,
    estimate_error: Scalar,
    process_noise: Scalar,
    estimate: Scalar,
}

impl ScalarKalman {
    pub fn new(tuning: SmootherTuning) -> Self {
        Self {
            measurement_error: tuning.measurement_error,
            estimate_error: tuning.estimate_error,
            process_noise: tuning.process_noise,
            estimate: 0.0,
        }
    }

    pub fn update(&mut self, measurement: Scalar) -> Scalar {
        let gain = self.estimate_error / (self.estimate_error + self.measurement_error);
        let previous = self.estimate;
        self.estimate += gain * (measurement - self.estimate);
        self.estimate_error =
            (1.0 - gain) * self.estimate_error + (previous - self.estimate).abs() * self.process_noise;
        self.estimate
    }

    pub fn estimate(&self) -> Scalar {
        self.estimate
    }

    /// Swaps the noise model, keeping the running estimate.
    pub fn retune(&mut self, tuning: SmootherTuning) {
        self.measurement_error = tuning.measurement_error;
        self.estimate_error = tuning.estimate_error;
        self.process_noise = tuning.process_noise;
    }
}

// ---------------------------------------------------------------------------
// WRENCH ESTIMATOR
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct WrenchEstimator {
    coeffs: WrenchCoefficients,
    smoothers: [ScalarKalman; 4],
    last: BodyWrench,
}

impl WrenchEstimator {
    pub fn new(coeffs: WrenchCoefficients, smoother: SmootherTuning) -> Self {
        Self {
            coeffs,
            smoothers: [ScalarKalman::new(smoother); 4],
            last: BodyWrench::default(),
        }
    }

    /// Quadratic map before gains and smoothing. Negative outputs count as zero.
    pub fn raw_wrench(&self, outputs: &[Scalar; NUM_ACTUATORS]) -> BodyWrench {
        let WrenchCoefficients {
            thrust_coeff: b,
            arm_length: l,
            drag_coeff: d,
            ..
        } = self.coeffs;
        let u2 = outputs.map(|u| {
            let u = u.max(0.0);
            u * u
        });

        BodyWrench {
            torque: Vector3::new(
                b * l * (u2[3] - u2[2]),
                b * l * (u2[1] - u2[0]),
                d * (u2[0] + u2[1] - u2[2] - u2[3]),
            ),
            thrust: b * u2.iter().sum::<Scalar>(),
        }
    }

    /// Raw map scaled by the per-channel gain, as fed to the smoothers.
    pub fn gained_wrench(&self, outputs: &[Scalar; NUM_ACTUATORS]) -> BodyWrench {
        let raw = self.raw_wrench(outputs).as_array();
        let gain = self.coeffs.channel_gain;
        BodyWrench::from_array([0, 1, 2, 3].map(|i| raw[i] * gain[i]))
    }

    /// Maps one actuator sample and advances every smoother. Torques keep
    /// their sign.
    pub fn update(&mut self, outputs: &[Scalar; NUM_ACTUATORS]) -> BodyWrench {
        let gained = self.gained_wrench(outputs).as_array();
        let mut smoothed = [0.0; 4];
        for (i, value) in smoothed.iter_mut().enumerate() {
            *value = self.smoothers[i].update(gained[i]);
        }
        self.last = BodyWrench::from_array(smoothed);
        self.last
    }

    /// Most recent smoothed wrench, zero before the first actuator sample.
    pub fn wrench(&self) -> BodyWrench {
        self.last
    }

    pub fn retune(&mut self, coeffs: WrenchCoefficients, smoother: SmootherTuning) {
        self.coeffs = coeffs;
        for s in &mut self.smoothers {
            s.retune(smoother);
        }
    }
}

impl Default for WrenchEstimator {
    fn default() -> Self {
        Self::new(WrenchCoefficients::default(), SmootherTuning::default())
    }
}
