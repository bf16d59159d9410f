//! Command line front end: simulate, replay and sweep.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use skylark_core::config::AttitudeSource;
use skylark_core::{EstimatorKind, OutputRecord};
use skylark_sim::params::{self, ParamSpec};
use skylark_sim::{
    generate_sensor_data, run_estimator, simulate_quad, EstimatorConfig, QuadParams, RunConfig,
    RunResult, Sample, SensorConfig, SensorData, SimResult,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
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

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Estimator variant, ignored when --config is given
    #[arg(short, long, value_enum, default_value = "extended")]
    variant: Variant,

    /// JSON estimator configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay through the sample bus on a worker thread
    #[arg(long)]
    threaded: bool,

    /// Fuse the published attitude instead of the on-board orientation filter
    #[arg(long)]
    external_attitude: bool,

    // ── Flight ────────────────────────────────────────────────
    #[arg(long, default_value_t = 30.0)]
    duration: f64,

    #[arg(long, default_value_t = 2.0)]
    arm_time: f64,

    // ── Sensors ───────────────────────────────────────────────
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 1.0)]
    noise_scale: f64,

    /// Drop the magnetometer (IMU-only orientation updates)
    #[arg(long)]
    no_mag: bool,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,
}

impl RunArgs {
    fn run_config(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let file = EstimatorConfig::load(path)?;
                info!(path = %path.display(), variant = file.kind().label(), "loaded config");
                RunConfig {
                    variant: file.kind(),
                    params: file.to_params(),
                    ..RunConfig::default()
                }
            }
            None => RunConfig::new(self.variant.into()),
        };
        cfg.threaded = self.threaded;
        if self.external_attitude {
            cfg.params.tuning.attitude_source = AttitudeSource::External;
        }
        Ok(cfg)
    }

    fn quad_params(&self, cfg: &RunConfig) -> QuadParams {
        QuadParams {
            vehicle: cfg.params.vehicle,
            wrench: cfg.params.wrench,
            arm_time: self.arm_time,
            duration: self.duration,
            ..QuadParams::default()
        }
    }

    fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            noise_scale: self.noise_scale,
            use_mag: !self.no_mag,
            seed: self.seed,
            ..SensorConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Single Run
// ---------------------------------------------------------------------------
pub fn run_simulate(args: &RunArgs, out: &OutputArgs) -> Result<()> {
    println!("Skylark State Estimator");
    println!("=======================\n");

    let cfg = args.run_config()?;
    let sim = simulate_quad(&args.quad_params(&cfg));
    print_sim_stats(&sim);

    let sensors = generate_sensor_data(&sim, &args.sensor_config())?;
    debug!(stream = %describe_stream(&sensors), "sensor stream generated");

    println!("Running {} estimator...", cfg.variant.label());
    let result = run_estimator(&sensors, &cfg)?;
    print_run_stats(&result, &sim);

    write_output(out, &sim, &result)
}

// ---------------------------------------------------------------------------
// Sweep Run
// ---------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Parameter to sweep (see `skylark params`)
    #[arg(short, long)]
    param: String,

    #[arg(long, default_value_t = 5)]
    steps: usize,

    /// Override the parameter's lower bound
    #[arg(long)]
    min: Option<f64>,

    /// Override the parameter's upper bound
    #[arg(long)]
    max: Option<f64>,
}

pub fn run_sweep(args: &RunArgs, sweep: &SweepArgs, out: &OutputArgs) -> Result<()> {
    let Some(base) = params::spec(&sweep.param) else {
        bail!("unknown parameter `{}`, see `skylark params`", sweep.param);
    };
    let spec = ParamSpec {
        min: sweep.min.unwrap_or(base.min),
        max: sweep.max.unwrap_or(base.max),
        ..*base
    };
    if spec.min > spec.max {
        bail!("sweep range is empty: {} > {}", spec.min, spec.max);
    }

    let base_cfg = args.run_config()?;
    // Truth and sensors stay fixed; only the estimator sees the swept value
    let sim = simulate_quad(&args.quad_params(&base_cfg));
    let sensors = generate_sensor_data(&sim, &args.sensor_config())?;

    println!("Sweeping {} over [{}, {}]", spec.label, spec.min, spec.max);
    let values = spec.sweep_values(sweep.steps);
    let mut summary_rows = Vec::with_capacity(values.len());

    for (i, val) in values.iter().copied().enumerate() {
        let mut cfg = base_cfg.clone();
        params::set_param(&mut cfg.params, spec.name, val)?;

        let rmse = match run_estimator(&sensors, &cfg) {
            Ok(res) => res.position_rmse(&sim),
            Err(e) => {
                println!(
                    "Run {}/{} | {} = {:.6} rejected: {:#}",
                    i + 1,
                    values.len(),
                    spec.name,
                    val,
                    e
                );
                None
            }
        };
        if let Some(rmse) = rmse {
            println!(
                "Run {}/{} | {} = {:.6} -> position rmse {:.3} m",
                i + 1,
                values.len(),
                spec.name,
                val,
                rmse
            );
        }
        summary_rows.push((val, rmse));
    }

    std::fs::create_dir_all(&out.output_dir)?;
    let path = out.output_dir.join("sweep_summary.csv");
    let mut wtr = csv::Writer::from_path(&path)?;
    wtr.write_record([spec.name, "position_rmse_m"])?;
    for (val, rmse) in summary_rows {
        wtr.write_record([
            format!("{:.6}", val),
            rmse.map(|r| format!("{:.4}", r)).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;

    println!("\nSweep complete. Summary at {:?}", path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------
pub fn run_params(variant: Variant, write: Option<&Path>) -> Result<()> {
    let cfg = EstimatorConfig::new(variant.into());
    let current = cfg.to_params();

    println!("{:<28} {:>12} {:>10} {:>10}  label", "name", "default", "min", "max");
    for spec in params::ALL {
        let value = params::get_param(&current, spec.name)?;
        println!(
            "{:<28} {:>12.6} {:>10} {:>10}  {}",
            spec.name, value, spec.min, spec.max, spec.label
        );
    }

    println!("\nDefault {} config:\n{}", variant_label(variant), cfg.to_json()?);

    if let Some(path) = write {
        cfg.save(path)?;
        println!("\nDefault {} config written to {:?}", variant_label(variant), path);
    }
    Ok(())
}

fn variant_label(v: Variant) -> &'static str {
    EstimatorKind::from(v).label()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_sim_stats(result: &SimResult) {
    let max_alt = result
        .pos
        .iter()
        .map(|p| -p.z)
        .fold(f64::NEG_INFINITY, f64::max);
    let flight_time = result.time.last().copied().unwrap_or(0.0);

    println!("\nSimulation Stats:");
    println!("  Steps:        {}", result.time.len());
    println!("  Duration:     {:.2} s", flight_time);
    println!("  Max Altitude: {:.2} m (AGL)", max_alt);
    println!("-----------------------------");
}

fn print_run_stats(result: &RunResult, sim: &SimResult) {
    println!("\nEstimator Stats:");
    println!("  Cycles:   {}", result.cycles);
    println!("  Records:  {}", result.records.len());
    if result.timeouts > 0 {
        println!("  Timeouts: {}", result.timeouts);
    }
    match result.position_rmse(sim) {
        Some(rmse) => println!("  Pos RMSE: {:.3} m", rmse),
        None => println!("  Pos RMSE: n/a (no records)"),
    }
    println!("-----------------------------");
}

fn truth_at(sim: &SimResult, rec: &OutputRecord) -> [f64; 3] {
    sim.index_at(rec.timestamp_us as f64 * 1e-6)
        .map(|i| sim.pos[i].into())
        .unwrap_or([f64::NAN; 3])
}

fn write_output(out: &OutputArgs, sim: &SimResult, result: &RunResult) -> Result<()> {
    std::fs::create_dir_all(&out.output_dir)
        .with_context(|| format!("creating {:?}", out.output_dir))?;

    let path = match out.format {
        OutputFormat::Csv => write_csv(&out.output_dir, sim, result)?,
        OutputFormat::Json => write_json(&out.output_dir, sim, result)?,
    };
    println!("Data written to {:?}", path);
    Ok(())
}

fn write_csv(dir: &Path, sim: &SimResult, result: &RunResult) -> Result<PathBuf> {
    let path = dir.join("estimate.csv");
    let mut wtr = csv::Writer::from_path(&path)?;

    wtr.write_record([
        "time",
        // Estimate
        "est_roll",
        "est_pitch",
        "est_yaw",
        "est_pos_n",
        "est_pos_e",
        "est_pos_d",
        // GPS position (extended) or raw Euler angles (linear)
        "aux_0",
        "aux_1",
        "aux_2",
        // Sim Truth
        "true_pos_n",
        "true_pos_e",
        "true_pos_d",
    ])?;

    for rec in &result.records {
        let truth = truth_at(sim, rec);
        let mut row = Vec::with_capacity(13);
        row.push(format!("{:.6}", rec.timestamp_us as f64 * 1e-6));
        row.extend(
            rec.attitude
                .iter()
                .chain(&rec.position)
                .chain(&rec.aux)
                .chain(&truth)
                .map(|v| format!("{:.4}", v)),
        );
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(path)
}

fn write_json(dir: &Path, sim: &SimResult, result: &RunResult) -> Result<PathBuf> {
    let path = dir.join("estimate.json");
    let records: Vec<_> = result
        .records
        .iter()
        .map(|rec| {
            serde_json::json!({
                "timestamp_us": rec.timestamp_us,
                "estimator": rec.kind.label(),
                "attitude": rec.attitude,
                "position": rec.position,
                "aux": rec.aux,
                "truth_position": truth_at(sim, rec),
            })
        })
        .collect();

    let doc = serde_json::json!({
        "cycles": result.cycles,
        "timeouts": result.timeouts,
        "position_rmse_m": result.position_rmse(sim),
        "records": records,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
    Ok(path)
}

fn describe_stream(data: &SensorData) -> String {
    let imu = data.count(|s| matches!(s, Sample::Imu(_)));
    let att = data.count(|s| matches!(s, Sample::Attitude(_)));
    let gps = data.count(|s| matches!(s, Sample::Gps(_)));
    let act = data.count(|s| matches!(s, Sample::Actuators(_)));
    format!("imu {imu}, attitude {att}, gps {gps}, actuators {act}")
}
