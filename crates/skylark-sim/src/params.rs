//! Tunable parameter definitions for sweeps and the command line.

use anyhow::{bail, Result};
use skylark_core::EstimatorParams;

/// Parameter specification with bounds and step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Name used on the command line and in config files.
    pub name: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Step size for sweeps.
    pub step: f64,
}

impl ParamSpec {
    pub const fn new(
        name: &'static str,
        label: &'static str,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        Self {
            name,
            label,
            min,
            max,
            step,
        }
    }

    /// `steps` evenly spaced values from `min` to `max` inclusive.
    pub fn sweep_values(&self, steps: usize) -> Vec<f64> {
        match steps {
            0 => Vec::new(),
            1 => vec![self.min],
            n => (0..n)
                .map(|i| self.min + (self.max - self.min) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }
}

/// Airframe parameters.
pub mod vehicle {
    use super::ParamSpec;

    pub const MASS: ParamSpec = ParamSpec::new("mass", "Mass (kg)", 0.2, 10.0, 0.05);
    pub const INERTIA_X: ParamSpec = ParamSpec::new("inertia_x", "Ixx (kg·m²)", 0.001, 1.0, 0.005);
    pub const INERTIA_Y: ParamSpec = ParamSpec::new("inertia_y", "Iyy (kg·m²)", 0.001, 1.0, 0.005);
    pub const INERTIA_Z: ParamSpec = ParamSpec::new("inertia_z", "Izz (kg·m²)", 0.001, 1.0, 0.005);
    pub const GRAVITY: ParamSpec = ParamSpec::new("gravity", "Gravity (m/s²)", 9.7, 9.9, 0.01);
}

/// Estimator tuning.
pub mod tuning {
    use super::ParamSpec;

    pub const BETA: ParamSpec = ParamSpec::new("beta", "Filter Gain β", 0.01, 2.0, 0.01);
    pub const PROCESS_NOISE: ParamSpec =
        ParamSpec::new("process_noise", "Process Noise Q", 1e-4, 10.0, 0.01);
    pub const INITIAL_COVARIANCE: ParamSpec =
        ParamSpec::new("initial_covariance", "Initial Covariance P₀", 0.01, 100.0, 0.1);
    pub const ATTITUDE_INFORMATION: ParamSpec =
        ParamSpec::new("attitude_information", "Attitude R⁻¹", 0.1, 1000.0, 1.0);
    pub const GPS_INFORMATION: ParamSpec =
        ParamSpec::new("gps_information", "GPS R⁻¹", 0.0, 100.0, 0.1);
    pub const LINEAR_MEASUREMENT_NOISE: ParamSpec =
        ParamSpec::new("linear_measurement_noise", "Linear R", 1e-4, 1.0, 0.001);
    pub const OBSERVER_BETA: ParamSpec =
        ParamSpec::new("observer_beta", "Observer Scale", 1.0, 1000.0, 10.0);
    pub const DT_AIRBORNE: ParamSpec =
        ParamSpec::new("dt_airborne", "Airborne Step (s)", 0.0005, 0.05, 0.0005);
    pub const DT_PREFLIGHT: ParamSpec =
        ParamSpec::new("dt_preflight", "Pre-flight Step (s)", 0.001, 0.5, 0.001);
    pub const STATIONARITY_THRESHOLD: ParamSpec =
        ParamSpec::new("stationarity_threshold", "GPS Variance Gate (m²)", 0.01, 10.0, 0.05);
}

/// Wrench smoother.
pub mod smoother {
    use super::ParamSpec;

    pub const MEASUREMENT_ERROR: ParamSpec =
        ParamSpec::new("smoother_measurement_error", "Smoother R", 0.01, 10.0, 0.05);
    pub const PROCESS_NOISE: ParamSpec =
        ParamSpec::new("smoother_process_noise", "Smoother Q", 1e-4, 1.0, 0.001);
}

pub const ALL: [ParamSpec; 17] = [
    vehicle::MASS,
    vehicle::INERTIA_X,
    vehicle::INERTIA_Y,
    vehicle::INERTIA_Z,
    vehicle::GRAVITY,
    tuning::BETA,
    tuning::PROCESS_NOISE,
    tuning::INITIAL_COVARIANCE,
    tuning::ATTITUDE_INFORMATION,
    tuning::GPS_INFORMATION,
    tuning::LINEAR_MEASUREMENT_NOISE,
    tuning::OBSERVER_BETA,
    tuning::DT_AIRBORNE,
    tuning::DT_PREFLIGHT,
    tuning::STATIONARITY_THRESHOLD,
    smoother::MEASUREMENT_ERROR,
    smoother::PROCESS_NOISE,
];

pub fn spec(name: &str) -> Option<&'static ParamSpec> {
    ALL.iter().find(|s| s.name == name)
}

fn field<'a>(params: &'a mut EstimatorParams, name: &str) -> Result<&'a mut f64> {
    let slot = match name {
        "mass" => &mut params.vehicle.mass,
        "inertia_x" => &mut params.vehicle.inertia.x,
        "inertia_y" => &mut params.vehicle.inertia.y,
        "inertia_z" => &mut params.vehicle.inertia.z,
        "gravity" => &mut params.vehicle.gravity,
        "beta" => &mut params.tuning.beta,
        "process_noise" => &mut params.tuning.process_noise,
        "initial_covariance" => &mut params.tuning.initial_covariance,
        "attitude_information" => &mut params.tuning.attitude_information,
        "gps_information" => &mut params.tuning.gps_information,
        "linear_measurement_noise" => &mut params.tuning.linear_measurement_noise,
        "observer_beta" => &mut params.tuning.observer_beta,
        "dt_airborne" => &mut params.tuning.dt_airborne,
        "dt_preflight" => &mut params.tuning.dt_preflight,
        "stationarity_threshold" => &mut params.tuning.stationarity_threshold,
        "smoother_measurement_error" => &mut params.smoother.measurement_error,
        "smoother_process_noise" => &mut params.smoother.process_noise,
        _ => bail!("unknown parameter `{name}`"),
    };
    Ok(slot)
}

pub fn get_param(params: &EstimatorParams, name: &str) -> Result<f64> {
    let mut copy = *params;
    field(&mut copy, name).map(|v| *v)
}

pub fn set_param(params: &mut EstimatorParams, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        bail!("`{name}` must be finite, got {value}");
    }
    *field(params, name)? = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_spec_is_addressable() {
        let params = EstimatorParams::extended();
        for s in ALL {
            assert!(get_param(&params, s.name).is_ok(), "{}", s.name);
            assert!(s.min < s.max && s.step > 0.0, "{}", s.name);
            assert_eq!(spec(s.name), Some(&s));
        }
    }

    #[test]
    fn test_set_param() {
        let mut params = EstimatorParams::linear();
        set_param(&mut params, "mass", 2.0).unwrap();
        set_param(&mut params, "inertia_z", 0.2).unwrap();
        assert_eq!(params.vehicle.mass, 2.0);
        assert_eq!(get_param(&params, "inertia_z").unwrap(), 0.2);

        assert!(set_param(&mut params, "warp_factor", 9.0).is_err());
        assert!(set_param(&mut params, "beta", f64::NAN).is_err());
        assert!(get_param(&params, "warp_factor").is_err());
    }

    #[test]
    fn test_sweep_values() {
        let spec = ParamSpec::new("t", "Test", 0.0, 1.0, 0.1);
        assert_eq!(spec.sweep_values(3), vec![0.0, 0.5, 1.0]);
        assert_eq!(spec.sweep_values(1), vec![0.0]);
        assert!(spec.sweep_values(0).is_empty());
    }
}
