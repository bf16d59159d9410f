//! JSON run configuration.

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use skylark_core::config::{
    AttitudeSource, CovarianceGuard, EstimatorTuning, GainMode, SmootherTuning, WrenchCoefficients,
};
use skylark_core::{EstimatorKind, EstimatorParams, VehicleParams};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Extended,
    Linear,
}

impl From<Variant> for EstimatorKind {
    fn from(v: Variant) -> Self {
        match v {
            Variant::Extended => EstimatorKind::Extended,
            Variant::Linear => EstimatorKind::Linear,
        }
    }
}

impl From<EstimatorKind> for Variant {
    fn from(k: EstimatorKind) -> Self {
        match k {
            EstimatorKind::Extended => Variant::Extended,
            EstimatorKind::Linear => Variant::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    Frozen,
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    None,
    Symmetrize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attitude {
    OrientationFilter,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub mass: f64,
    pub inertia: [f64; 3],
    pub gravity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrenchConfig {
    pub thrust_coeff: f64,
    pub arm_length: f64,
    pub drag_coeff: f64,
    pub channel_gain: [f64; 4],
    pub smoother_measurement_error: f64,
    pub smoother_estimate_error: f64,
    pub smoother_process_noise: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub beta: f64,
    pub dt_preflight: f64,
    pub dt_airborne: f64,
    pub process_noise: f64,
    pub initial_covariance: f64,
    pub attitude_information: f64,
    pub gps_information: f64,
    pub linear_measurement_noise: f64,
    pub observer_beta: f64,
    pub gain_mode: Gain,
    pub covariance_guard: Guard,
    pub clamp_altitude: bool,
    pub stationarity_threshold: f64,
    pub fuse_on_ground: bool,
    pub attitude_source: Attitude,
}

/// Everything needed to rebuild [`EstimatorParams`] for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub variant: Variant,
    pub vehicle: VehicleConfig,
    pub wrench: WrenchConfig,
    pub tuning: TuningConfig,
}

impl EstimatorConfig {
    pub fn new(kind: EstimatorKind) -> Self {
        let params = match kind {
            EstimatorKind::Extended => EstimatorParams::extended(),
            EstimatorKind::Linear => EstimatorParams::linear(),
        };
        Self::from_params(kind, &params)
    }

    pub fn from_params(kind: EstimatorKind, p: &EstimatorParams) -> Self {
        let t = &p.tuning;
        Self {
            variant: kind.into(),
            vehicle: VehicleConfig {
                mass: p.vehicle.mass,
                inertia: p.vehicle.inertia.into(),
                gravity: p.vehicle.gravity,
            },
            wrench: WrenchConfig {
                thrust_coeff: p.wrench.thrust_coeff,
                arm_length: p.wrench.arm_length,
                drag_coeff: p.wrench.drag_coeff,
                channel_gain: p.wrench.channel_gain,
                smoother_measurement_error: p.smoother.measurement_error,
                smoother_estimate_error: p.smoother.estimate_error,
                smoother_process_noise: p.smoother.process_noise,
            },
            tuning: TuningConfig {
                beta: t.beta,
                dt_preflight: t.dt_preflight,
                dt_airborne: t.dt_airborne,
                process_noise: t.process_noise,
                initial_covariance: t.initial_covariance,
                attitude_information: t.attitude_information,
                gps_information: t.gps_information,
                linear_measurement_noise: t.linear_measurement_noise,
                observer_beta: t.observer_beta,
                gain_mode: match t.gain_mode {
                    GainMode::Frozen => Gain::Frozen,
                    GainMode::Recursive => Gain::Recursive,
                },
                covariance_guard: match t.covariance_guard {
                    CovarianceGuard::None => Guard::None,
                    CovarianceGuard::Symmetrize => Guard::Symmetrize,
                },
                clamp_altitude: t.clamp_altitude,
                stationarity_threshold: t.stationarity_threshold,
                fuse_on_ground: t.fuse_on_ground,
                attitude_source: match t.attitude_source {
                    AttitudeSource::OrientationFilter => Attitude::OrientationFilter,
                    AttitudeSource::External => Attitude::External,
                },
            },
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        self.variant.into()
    }

    pub fn to_params(&self) -> EstimatorParams {
        let t = &self.tuning;
        let w = &self.wrench;
        EstimatorParams {
            vehicle: VehicleParams {
                inertia: Vector3::from(self.vehicle.inertia),
                mass: self.vehicle.mass,
                gravity: self.vehicle.gravity,
            },
            wrench: WrenchCoefficients {
                thrust_coeff: w.thrust_coeff,
                arm_length: w.arm_length,
                drag_coeff: w.drag_coeff,
                channel_gain: w.channel_gain,
            },
            smoother: SmootherTuning {
                measurement_error: w.smoother_measurement_error,
                estimate_error: w.smoother_estimate_error,
                process_noise: w.smoother_process_noise,
            },
            tuning: EstimatorTuning {
                beta: t.beta,
                dt_preflight: t.dt_preflight,
                dt_airborne: t.dt_airborne,
                process_noise: t.process_noise,
                initial_covariance: t.initial_covariance,
                attitude_information: t.attitude_information,
                gps_information: t.gps_information,
                linear_measurement_noise: t.linear_measurement_noise,
                observer_beta: t.observer_beta,
                gain_mode: match t.gain_mode {
                    Gain::Frozen => GainMode::Frozen,
                    Gain::Recursive => GainMode::Recursive,
                },
                covariance_guard: match t.covariance_guard {
                    Guard::None => CovarianceGuard::None,
                    Guard::Symmetrize => CovarianceGuard::Symmetrize,
                },
                clamp_altitude: t.clamp_altitude,
                stationarity_threshold: t.stationarity_threshold,
                fuse_on_ground: t.fuse_on_ground,
                attitude_source: match t.attitude_source {
                    Attitude::OrientationFilter => AttitudeSource::OrientationFilter,
                    Attitude::External => AttitudeSource::External,
                },
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing estimator config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.to_params()
            .vehicle
            .validate()
            .with_context(|| format!("config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).with_context(|| format!("writing {}", path.display()))
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::new(EstimatorKind::Extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_json() {
        for kind in [EstimatorKind::Extended, EstimatorKind::Linear] {
            let cfg = EstimatorConfig::new(kind);
            let text = cfg.to_json().unwrap();
            let back: EstimatorConfig = serde_json::from_str(&text).unwrap();
            assert_eq!(back, cfg);
            assert_eq!(back.kind(), kind);
        }
    }

    #[test]
    fn test_to_params_matches_presets() {
        assert_eq!(
            EstimatorConfig::new(EstimatorKind::Linear).to_params(),
            EstimatorParams::linear()
        );
        assert_eq!(
            EstimatorConfig::default().to_params(),
            EstimatorParams::extended()
        );
    }

    #[test]
    fn test_enum_spelling() {
        let text = EstimatorConfig::default().to_json().unwrap();
        assert!(text.contains("\"variant\": \"extended\""));
        assert!(text.contains("\"attitude_source\": \"orientation_filter\""));
    }

    #[test]
    fn test_load_rejects_bad_mass() {
        let mut cfg = EstimatorConfig::default();
        cfg.vehicle.mass = -1.0;
        let path = std::env::temp_dir().join(format!("skylark-bad-{}.json", std::process::id()));
        cfg.save(&path).unwrap();
        let err = EstimatorConfig::load(&path);
        let _ = fs::remove_file(&path);
        assert!(err.is_err());
    }
}
