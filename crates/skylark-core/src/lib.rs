//! # Skylark Core
//!
//! Multirotor state estimation engine. Everything that has to run next to the
//! flight controller lives here:
//! - Gradient-descent orientation filter (MARG / IMU)
//! - GPS reference calibration with a stationarity gate
//! - Actuator-to-wrench mapping with per-channel smoothing
//! - Rigid-body process model and its Jacobian
//! - Constant-gain extended estimator and recursive linear estimator
//! - Fusion engine tying one wake-up to one output record
//!
//! # Features
//! - `std` (default): host support, the cooperative worker loop and the
//!   latest-sample bus.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod ekf;
pub mod estimator;
pub mod fusion;
pub mod gps;
pub mod lkf;
pub mod model;
pub mod orientation;
pub mod phase;
pub mod wrench;

#[cfg(feature = "std")]
pub mod bus;
#[cfg(feature = "std")]
pub mod worker;

// Re-export core types
pub use config::{EstimatorParams, EstimatorTuning, GainMode, VehicleParams};
pub use ekf::ExtendedEstimator;
pub use estimator::{EstimatorKind, FilterStatus, FusionInputs, StateEstimator, StateVector};
pub use fusion::{CycleSamples, FusionEngine, OutputRecord};
pub use gps::{GpsCalibrator, GpsFix, LocalFix};
pub use lkf::LinearEstimator;
pub use model::RigidBodyModel;
pub use orientation::OrientationFilter;
pub use phase::{FlightPhase, PhaseTracker};
pub use wrench::{BodyWrench, WrenchEstimator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Floating point type used by every estimator.
pub type Scalar = f64;
