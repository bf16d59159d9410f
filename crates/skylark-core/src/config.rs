use crate::Scalar;
use nalgebra::Vector3;

// ---------------------------------------------------------------------------
// VEHICLE
// ---------------------------------------------------------------------------

/// Rigid-body constants of the airframe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleParams {
    /// Principal moments of inertia `[Ix, Iy, Iz]` (kg·m²).
    pub inertia: Vector3<Scalar>,
    /// Take-off mass (kg).
    pub mass: Scalar,
    /// Gravitational acceleration, positive magnitude (m/s²). Acts along +z (down).
    pub gravity: Scalar,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            inertia: Vector3::new(0.04, 0.04, 0.1),
            mass: 1.535,
            gravity: 9.8,
        }
    }
}

impl VehicleParams {
    /// The model divides by mass and every inertia; reject anything it cannot.
    pub fn validate(&self) -> Result<(), InvalidParams> {
        if !(self.mass > 0.0) || !self.mass.is_finite() {
            return Err(InvalidParams::Mass(self.mass));
        }
        if self.inertia.iter().any(|i| !(*i > 0.0) || !i.is_finite()) {
            return Err(InvalidParams::Inertia);
        }
        if !self.gravity.is_finite() {
            return Err(InvalidParams::Gravity(self.gravity));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidParams {
    Mass(Scalar),
    Inertia,
    Gravity(Scalar),
}

impl core::fmt::Display for InvalidParams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Mass(m) => write!(f, "mass must be positive and finite, got {m}"),
            Self::Inertia => f.write_str("moments of inertia must be positive and finite"),
            Self::Gravity(g) => write!(f, "gravity must be finite, got {g}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidParams {}

// ---------------------------------------------------------------------------
// ACTUATORS
// ---------------------------------------------------------------------------

/// Motor-output to wrench proportionality constants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WrenchCoefficients {
    /// Thrust coefficient `b` (N per output²).
    pub thrust_coeff: Scalar,
    /// Arm length `l` (m).
    pub arm_length: Scalar,
    /// Rotor drag coefficient `d` (N·m per output²).
    pub drag_coeff: Scalar,
    /// Per-channel gain applied after the quadratic map, `[τx, τy, τz, T]`.
    pub channel_gain: [Scalar; 4],
}

impl WrenchCoefficients {
    pub const fn extended() -> Self {
        Self {
            thrust_coeff: 1.1e-7,
            arm_length: 0.25,
            drag_coeff: 5e-8,
            channel_gain: [1.0, 1.0, 1.0, 1.0],
        }
    }

    pub const fn linear() -> Self {
        Self {
            thrust_coeff: 1.3e-6,
            arm_length: 0.25,
            drag_coeff: 1e-6,
            channel_gain: [1.0 / 3.0, 1.0 / 6.0, 1.0 / 12.0, 1.2],
        }
    }
}

impl Default for WrenchCoefficients {
    fn default() -> Self {
        Self::extended()
    }
}

/// Noise model of the scalar smoothers sitting on every wrench channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmootherTuning {
    pub measurement_error: Scalar,
    pub estimate_error: Scalar,
    pub process_noise: Scalar,
}

impl Default for SmootherTuning {
    fn default() -> Self {
        Self {
            measurement_error: 1.0,
            estimate_error: 1.0,
            process_noise: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// ESTIMATOR
// ---------------------------------------------------------------------------

/// How the extended estimator obtains its correction gain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GainMode {
    /// `K = P₀·Hᵀ·R⁻¹` computed once at construction; the covariance still evolves.
    #[default]
    Frozen,
    /// `K = P·Hᵀ·R⁻¹` recomputed from the live covariance every cycle.
    Recursive,
}

/// Post-propagation treatment of the covariance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CovarianceGuard {
    #[default]
    None,
    /// Replace `P` with `(P + Pᵀ) / 2` after every update.
    Symmetrize,
}

/// Which quaternion feeds the attitude measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AttitudeSource {
    /// The engine's own gradient-descent filter.
    #[default]
    OrientationFilter,
    /// The externally published attitude quaternion.
    External,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorTuning {
    /// Orientation filter gradient gain.
    pub beta: Scalar,
    /// Integration step while on the ground (s).
    pub dt_preflight: Scalar,
    /// Integration step once airborne (s).
    pub dt_airborne: Scalar,
    /// Diagonal of the process noise `Q`.
    pub process_noise: Scalar,
    /// Diagonal of the initial covariance `P₀`.
    pub initial_covariance: Scalar,
    /// `R⁻¹` diagonal for the attitude and body-rate rows.
    pub attitude_information: Scalar,
    /// `R⁻¹` diagonal for the GPS velocity and position rows.
    pub gps_information: Scalar,
    /// `R` diagonal of the 6-dimensional linear measurement.
    pub linear_measurement_noise: Scalar,
    /// Scale of the offline steady-state covariance used by the observer gain.
    pub observer_beta: Scalar,
    pub gain_mode: GainMode,
    pub covariance_guard: CovarianceGuard,
    /// Keep the estimated `z` at or above the take-off ground level.
    pub clamp_altitude: bool,
    /// Altitude variance (m²) below which the GPS is considered settled.
    pub stationarity_threshold: Scalar,
    /// Run the estimator before the first actuator output, using `dt_preflight`.
    pub fuse_on_ground: bool,
    pub attitude_source: AttitudeSource,
}

impl EstimatorTuning {
    pub const fn extended() -> Self {
        Self {
            beta: 0.604_599_277_39,
            dt_preflight: 0.2,
            dt_airborne: 0.005,
            process_noise: 0.1,
            initial_covariance: 1.0,
            attitude_information: 100.0,
            gps_information: 1.0,
            linear_measurement_noise: 0.01,
            observer_beta: 200.0,
            gain_mode: GainMode::Frozen,
            covariance_guard: CovarianceGuard::None,
            clamp_altitude: true,
            stationarity_threshold: 1.0,
            fuse_on_ground: false,
            attitude_source: AttitudeSource::OrientationFilter,
        }
    }

    pub const fn linear() -> Self {
        let mut t = Self::extended();
        t.dt_airborne = 0.001;
        t
    }
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self::extended()
    }
}

/// Everything a parameter-change notice may replace.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct EstimatorParams {
    pub vehicle: VehicleParams,
    pub wrench: WrenchCoefficients,
    pub smoother: SmootherTuning,
    pub tuning: EstimatorTuning,
}

impl EstimatorParams {
    pub fn extended() -> Self {
        Self {
            wrench: WrenchCoefficients::extended(),
            tuning: EstimatorTuning::extended(),
            ..Self::default()
        }
    }

    pub fn linear() -> Self {
        Self {
            wrench: WrenchCoefficients::linear(),
            tuning: EstimatorTuning::linear(),
            ..Self::default()
        }
    }
}
