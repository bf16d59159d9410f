//! Skylark Simulation Library
//!
//! Quadrotor flight simulation, sensor stream generation and estimator replay.

pub mod config;
pub mod params;
pub mod runner;
pub mod sensor;
pub mod sim;

// Re-export main types
pub use config::EstimatorConfig;
pub use params::{get_param, set_param, ParamSpec};
pub use runner::{run_estimator, RunConfig, RunResult};
pub use sensor::{generate_sensor_data, Sample, SensorConfig, SensorData};
pub use sim::{simulate_quad, QuadParams, SimResult};
