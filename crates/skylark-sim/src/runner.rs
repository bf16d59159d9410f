use crate::sensor::{Sample, SensorData};
use crate::sim::SimResult;
use anyhow::{anyhow, Context, Result};
use skylark_core::bus::SampleBus;
use skylark_core::worker::{run_worker, WorkerStats};
use skylark_core::{
    CycleSamples, EstimatorKind, EstimatorParams, FusionEngine, OutputRecord, StateEstimator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub variant: EstimatorKind,
    pub params: EstimatorParams,
    /// Replay through the sample bus and a background worker instead of
    /// calling the engine inline.
    pub threaded: bool,
    pub worker_wait: Duration,
}

impl RunConfig {
    pub fn new(variant: EstimatorKind) -> Self {
        let params = match variant {
            EstimatorKind::Extended => EstimatorParams::extended(),
            EstimatorKind::Linear => EstimatorParams::linear(),
        };
        Self {
            variant,
            params,
            threaded: false,
            worker_wait: Duration::from_millis(50),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(EstimatorKind::Extended)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub records: Vec<OutputRecord>,
    pub cycles: u64,
    pub timeouts: u64,
}

impl RunResult {
    /// RMS distance between estimated and true position over all records.
    pub fn position_rmse(&self, sim: &SimResult) -> Option<f64> {
        let mut sum = 0.0;
        let mut n = 0usize;
        for rec in &self.records {
            let Some(i) = sim.index_at(rec.timestamp_us as f64 * 1e-6) else {
                continue;
            };
            let truth = sim.pos[i];
            let err: f64 = (0..3).map(|k| (rec.position[k] - truth[k]).powi(2)).sum();
            sum += err;
            n += 1;
        }
        (n > 0).then(|| (sum / n as f64).sqrt())
    }
}

/// Run the selected estimator against a generated sample stream.
pub fn run_estimator(data: &SensorData, cfg: &RunConfig) -> Result<RunResult> {
    cfg.params
        .vehicle
        .validate()
        .context("invalid vehicle parameters")?;

    let result = match cfg.variant {
        EstimatorKind::Extended => run_engine(FusionEngine::extended(cfg.params), data, cfg),
        EstimatorKind::Linear => run_engine(FusionEngine::linear(cfg.params), data, cfg),
    }?;

    info!(
        estimator = cfg.variant.label(),
        cycles = result.cycles,
        records = result.records.len(),
        timeouts = result.timeouts,
        "run finished"
    );
    Ok(result)
}

fn run_engine<E: StateEstimator + Send>(
    mut engine: FusionEngine<E>,
    data: &SensorData,
    cfg: &RunConfig,
) -> Result<RunResult> {
    if cfg.threaded {
        run_threaded(&mut engine, data, cfg.worker_wait)
    } else {
        Ok(run_direct(&mut engine, data))
    }
}

fn groups(data: &SensorData) -> impl Iterator<Item = &[Sample]> {
    data.samples
        .chunk_by(|a, b| a.timestamp_us() == b.timestamp_us())
}

/// Overwrites `into` with the newest sample of each kind in `group`.
fn collect_group(group: &[Sample], into: &mut CycleSamples) {
    for sample in group {
        match *sample {
            Sample::Imu(s) => into.imu = Some(s),
            Sample::Attitude(s) => into.attitude = Some(s),
            Sample::Gps(s) => into.gps = Some(s),
            Sample::Actuators(s) => into.actuators = Some(s),
        }
    }
}

/// Inline replay. Samples accumulate latest-value style until an inertial or
/// actuator sample fires a cycle, the same way the bus hands them out.
pub fn run_direct<E: StateEstimator>(engine: &mut FusionEngine<E>, data: &SensorData) -> RunResult {
    let mut result = RunResult::default();
    let mut pending = CycleSamples::default();

    for group in groups(data) {
        collect_group(group, &mut pending);

        let Some(timestamp_us) = pending
            .imu
            .map(|s| s.timestamp_us)
            .or(pending.actuators.map(|a| a.timestamp_us))
        else {
            continue;
        };
        pending.timestamp_us = timestamp_us;

        result.cycles += 1;
        if let Some(record) = engine.cycle(&pending) {
            result.records.push(record);
        }
        pending = CycleSamples::default();
    }

    result
}

/// Producer/worker replay over the [`SampleBus`].
pub fn run_threaded<E: StateEstimator + Send>(
    engine: &mut FusionEngine<E>,
    data: &SensorData,
    wait: Duration,
) -> Result<RunResult> {
    let bus = SampleBus::new();
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<OutputRecord>();

    let stats: WorkerStats = thread::scope(|scope| {
        let (bus, stop) = (&bus, &stop);
        let worker = scope.spawn(move || {
            let mut tx = tx;
            run_worker(engine, bus, &mut tx, stop, wait)
        });

        for group in groups(data) {
            let mut samples = CycleSamples::default();
            collect_group(group, &mut samples);
            bus.publish_cycle(&samples);
            // Hold the next group until the worker has drained this one
            while bus.has_pending_trigger() && !worker.is_finished() {
                thread::yield_now();
            }
        }

        stop.store(true, Ordering::SeqCst);
        bus.close();
        worker.join()
    })
    .map_err(|_| anyhow!("fusion worker panicked"))?;

    Ok(RunResult {
        records: rx.try_iter().collect(),
        cycles: stats.cycles,
        timeouts: stats.timeouts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{generate_sensor_data, SensorConfig};
    use crate::sim::{simulate_quad, QuadParams};

    fn flight(duration: f64) -> (SimResult, SensorData) {
        let sim = simulate_quad(&QuadParams {
            duration,
            ..QuadParams::default()
        });
        let data = generate_sensor_data(&sim, &SensorConfig::default()).expect("sensors");
        (sim, data)
    }

    #[test]
    fn test_extended_tracks_truth() {
        let (sim, data) = flight(15.0);
        let res = run_estimator(&data, &RunConfig::new(EstimatorKind::Extended)).expect("run");

        // One cycle per inertial tick, records only once airborne
        assert_eq!(res.cycles, 15 * 250);
        assert!(!res.records.is_empty());
        assert!(res.records.iter().all(|r| r.timestamp_us >= 2_000_000));
        assert!(res.records.iter().all(|r| r.position[2] <= 0.0));

        let rmse = res.position_rmse(&sim).expect("records");
        assert!(rmse < 5.0, "position rmse {rmse}");
    }

    #[test]
    fn test_linear_produces_finite_records() {
        let (_, data) = flight(6.0);
        let res = run_estimator(&data, &RunConfig::new(EstimatorKind::Linear)).expect("run");
        assert!(!res.records.is_empty());
        for r in &res.records {
            assert_eq!(r.kind, EstimatorKind::Linear);
            assert!(r.attitude.iter().chain(&r.position).all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_threaded_matches_direct_cycle_count() {
        let (_, data) = flight(4.0);
        let direct = run_estimator(&data, &RunConfig::default()).expect("direct");
        let threaded = run_estimator(
            &data,
            &RunConfig {
                threaded: true,
                ..RunConfig::default()
            },
        )
        .expect("threaded");

        assert_eq!(threaded.cycles, direct.cycles);
        assert_eq!(threaded.records.len(), direct.records.len());
        assert_eq!(threaded.records.last(), direct.records.last());
        assert!(threaded
            .records
            .windows(2)
            .all(|w| w[0].timestamp_us < w[1].timestamp_us));
    }

    #[test]
    fn test_invalid_mass_rejected() {
        let (_, data) = flight(0.5);
        let mut cfg = RunConfig::default();
        cfg.params.vehicle.mass = 0.0;
        assert!(run_estimator(&data, &cfg).is_err());
    }
}
