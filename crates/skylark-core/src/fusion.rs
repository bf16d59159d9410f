//! One wake-up in, at most one estimate out.
//!
//! [`FusionEngine`] owns every stateful piece of the pipeline. The worker (or a
//! test) hands it the samples that arrived since the last cycle; the engine
//! updates attitude, wrench, phase and GPS reference, then steps the estimator
//! once the preconditions hold.

use crate::config::{AttitudeSource, EstimatorParams, InvalidParams};
use crate::ekf::ExtendedEstimator;
use crate::estimator::{EstimatorKind, FilterStatus, FusionInputs, StateEstimator};
use crate::gps::{CalibrationStatus, GpsCalibrator, GpsFix, LocalFix};
use crate::lkf::LinearEstimator;
use crate::model::RigidBodyModel;
use crate::orientation::{OrientationFilter, OrientationStatus};
use crate::phase::{FlightPhase, PhaseTracker};
use crate::wrench::{WrenchEstimator, NUM_ACTUATORS};
use crate::Scalar;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// SAMPLES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub timestamp_us: u64,
    /// Accelerometer reading, FRD (m/s²).
    pub specific_force: Vector3<Scalar>,
    /// Gyroscope reading, FRD (rad/s).
    pub gyro: Vector3<Scalar>,
    pub mag: Option<Vector3<Scalar>>,
    /// Integration interval of this sample (s).
    pub dt: Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeSample {
    pub timestamp_us: u64,
    pub quaternion: UnitQuaternion<Scalar>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorSample {
    pub timestamp_us: u64,
    pub outputs: [Scalar; NUM_ACTUATORS],
}

/// Samples gathered for a single cycle. Absent fields mean "nothing new".
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSamples {
    pub timestamp_us: u64,
    pub imu: Option<ImuSample>,
    pub attitude: Option<AttitudeSample>,
    pub gps: Option<GpsFix>,
    pub actuators: Option<ActuatorSample>,
    pub params: Option<EstimatorParams>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRecord {
    pub timestamp_us: u64,
    /// `[roll, pitch, yaw]` (rad)
    pub attitude: [Scalar; 3],
    /// `[x, y, z]` NED (m)
    pub position: [Scalar; 3],
    /// GPS position (extended) or raw Euler angles (linear).
    pub aux: [Scalar; 3],
    pub kind: EstimatorKind,
}

// ---------------------------------------------------------------------------
// ENGINE
// ---------------------------------------------------------------------------

pub struct FusionEngine<E: StateEstimator> {
    params: EstimatorParams,
    orientation: OrientationFilter,
    calibrator: GpsCalibrator,
    wrench: WrenchEstimator,
    phase: PhaseTracker,
    model: RigidBodyModel,
    estimator: E,

    external_attitude: Option<UnitQuaternion<Scalar>>,
    body_rates: Vector3<Scalar>,
    last_fix: Option<LocalFix>,
    last_status: Option<FilterStatus>,
}

impl FusionEngine<ExtendedEstimator> {
    pub fn extended(params: EstimatorParams) -> Self {
        let estimator = ExtendedEstimator::new(&params.tuning);
        Self::new(params, estimator)
    }
}

impl FusionEngine<LinearEstimator> {
    pub fn linear(params: EstimatorParams) -> Self {
        let estimator = LinearEstimator::new(&params.tuning);
        Self::new(params, estimator)
    }
}

impl<E: StateEstimator> FusionEngine<E> {
    pub fn new(params: EstimatorParams, estimator: E) -> Self {
        Self {
            params,
            orientation: OrientationFilter::new(params.tuning.beta),
            calibrator: GpsCalibrator::new(params.tuning.stationarity_threshold),
            wrench: WrenchEstimator::new(params.wrench, params.smoother),
            phase: PhaseTracker::new(),
            model: RigidBodyModel::new(params.vehicle),
            estimator,
            external_attitude: None,
            body_rates: Vector3::zeros(),
            last_fix: None,
            last_status: None,
        }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn orientation(&self) -> &OrientationFilter {
        &self.orientation
    }

    pub fn calibrator(&self) -> &GpsCalibrator {
        &self.calibrator
    }

    pub fn wrench(&self) -> &WrenchEstimator {
        &self.wrench
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase.current_phase()
    }

    pub fn phase_tracker(&self) -> &PhaseTracker {
        &self.phase
    }

    pub fn model(&self) -> &RigidBodyModel {
        &self.model
    }

    /// Most recent projected GPS fix.
    pub fn last_fix(&self) -> Option<&LocalFix> {
        self.last_fix.as_ref()
    }

    pub fn last_status(&self) -> Option<FilterStatus> {
        self.last_status
    }

    /// Parameter-change notice. Invalid rigid-body constants reject the whole set.
    pub fn apply_params(&mut self, params: EstimatorParams) -> Result<(), InvalidParams> {
        if let Err(e) = params.vehicle.validate() {
            warn!(error = %e, "parameter update rejected");
            return Err(e);
        }
        self.model.set_params(params.vehicle);
        self.orientation.set_beta(params.tuning.beta);
        self.calibrator
            .set_variance_threshold(params.tuning.stationarity_threshold);
        self.wrench.retune(params.wrench, params.smoother);
        self.estimator.retune(&params.tuning);
        self.params = params;
        debug!("parameters applied");
        Ok(())
    }

    /// Runs one fusion cycle.
    pub fn cycle(&mut self, samples: &CycleSamples) -> Option<OutputRecord> {
        if let Some(params) = samples.params {
            // Rejection already logged
            let _ = self.apply_params(params);
        }

        let mut filter_updated = false;
        if let Some(imu) = &samples.imu {
            let status = match imu.mag {
                Some(mag) => self
                    .orientation
                    .update_marg(imu.specific_force, imu.gyro, mag, imu.dt),
                None => self.orientation.update_imu(imu.specific_force, imu.gyro, imu.dt),
            };
            filter_updated = status == OrientationStatus::Updated;
            self.body_rates = imu.gyro;
        }

        if let Some(att) = &samples.attitude {
            self.external_attitude = Some(att.quaternion);
        }

        if let Some(act) = &samples.actuators {
            self.wrench.update(&act.outputs);
            self.phase.on_actuator_output(act.timestamp_us);
        }

        if let Some(fix) = &samples.gps {
            self.ingest_gps(fix);
        }

        let (euler, attitude_fresh) = match self.params.tuning.attitude_source {
            AttitudeSource::OrientationFilter => (self.orientation.euler_angles(), filter_updated),
            AttitudeSource::External => match self.external_attitude {
                Some(q) => {
                    let (roll, pitch, yaw) = q.euler_angles();
                    (Vector3::new(roll, pitch, yaw), samples.attitude.is_some())
                }
                None => (Vector3::zeros(), false),
            },
        };

        let fix = self.last_fix?;
        let airborne = self.phase.current_phase() == FlightPhase::Airborne;
        if !airborne && !self.params.tuning.fuse_on_ground {
            return None;
        }

        let inputs = FusionInputs {
            euler,
            attitude_fresh,
            body_rates: self.body_rates,
            gps: fix,
            wrench: self.wrench.wrench(),
        };
        let dt = self.phase.cycle_dt(&self.params.tuning);
        let status = self.estimator.step(&self.model, &inputs, dt);
        self.last_status = Some(status);

        match status {
            FilterStatus::Updated | FilterStatus::SingularInnovation => {
                let attitude = self.estimator.attitude();
                let position = self.estimator.position();
                let aux = self.estimator.aux(&inputs);
                debug!(
                    estimator = self.estimator.kind().label(),
                    x = position.x,
                    y = position.y,
                    z = position.z,
                    "cycle"
                );
                Some(OutputRecord {
                    timestamp_us: samples.timestamp_us,
                    attitude: attitude.into(),
                    position: position.into(),
                    aux: aux.into(),
                    kind: self.estimator.kind(),
                })
            }
            FilterStatus::SkippedNoAttitude | FilterStatus::SkippedSmallDt => None,
        }
    }

    fn ingest_gps(&mut self, fix: &GpsFix) {
        if !self.calibrator.is_calibrated() {
            if let CalibrationStatus::Pending { .. } = self.calibrator.push(fix) {
                return;
            }
        }
        self.last_fix = self.calibrator.project(fix);
    }
}
