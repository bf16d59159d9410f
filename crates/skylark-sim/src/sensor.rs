use crate::sim::{SimResult, DT};
use anyhow::{ensure, Result};
use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use skylark_core::fusion::{ActuatorSample, AttitudeSample, ImuSample};
use skylark_core::gps::GeoReference;
use skylark_core::GpsFix;

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub noise_scale: f64,
    pub accel_noise_std: f64,    // m/s^2
    pub gyro_noise_std: f64,     // rad/s
    pub mag_noise_std: f64,      // Gauss
    pub attitude_noise_std: f64, // rad, external attitude
    pub gps_pos_noise_std: f64,  // meters
    pub gps_alt_noise_std: f64,  // meters
    pub gps_vel_noise_std: f64,  // m/s

    pub imu_rate_hz: f64,
    pub attitude_rate_hz: f64,
    pub gps_rate_hz: f64,
    /// Feed the magnetometer to the orientation filter.
    pub use_mag: bool,
    /// Earth field in NED (Gauss).
    pub mag_field_ned: Vector3<f64>,

    pub home_lat_deg: f64,
    pub home_lon_deg: f64,
    pub home_alt_m: f64,

    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            noise_scale: 1.0,
            accel_noise_std: 0.05,
            gyro_noise_std: 0.002,
            mag_noise_std: 0.002,
            attitude_noise_std: 0.005,
            gps_pos_noise_std: 0.5,
            gps_alt_noise_std: 0.5,
            gps_vel_noise_std: 0.1,
            imu_rate_hz: 250.0,
            attitude_rate_hz: 100.0,
            gps_rate_hz: 10.0,
            use_mag: true,
            mag_field_ned: Vector3::new(0.25, 0.0, 0.45),
            home_lat_deg: 55.3715,
            home_lon_deg: 10.4270,
            home_alt_m: 20.0,
            seed: 42,
        }
    }
}

/// One message as a producer would publish it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Imu(ImuSample),
    Attitude(AttitudeSample),
    Gps(GpsFix),
    Actuators(ActuatorSample),
}

impl Sample {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            Sample::Imu(s) => s.timestamp_us,
            Sample::Attitude(s) => s.timestamp_us,
            Sample::Gps(s) => s.timestamp_us,
            Sample::Actuators(s) => s.timestamp_us,
        }
    }
}

/// Time-ordered sample stream. Samples sharing a timestamp are adjacent.
#[derive(Debug, Clone, Default)]
pub struct SensorData {
    pub samples: Vec<Sample>,
}

impl SensorData {
    pub fn count(&self, pred: impl Fn(&Sample) -> bool) -> usize {
        self.samples.iter().filter(|s| pred(s)).count()
    }
}

fn decimation(rate_hz: f64) -> Result<usize> {
    ensure!(rate_hz > 0.0, "sample rate must be positive, got {rate_hz}");
    Ok(((1.0 / rate_hz) / DT).round().max(1.0) as usize)
}

fn noise(rng: &mut StdRng, d: &Normal<f64>) -> Vector3<f64> {
    Vector3::new(d.sample(rng), d.sample(rng), d.sample(rng))
}

pub fn generate_sensor_data(sim: &SimResult, cfg: &SensorConfig) -> Result<SensorData> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let imu_every = decimation(cfg.imu_rate_hz)?;
    let att_every = decimation(cfg.attitude_rate_hz)?;
    let gps_every = decimation(cfg.gps_rate_hz)?;
    let imu_dt = imu_every as f64 * DT;

    // Distributions
    let s = cfg.noise_scale;
    let d_accel = Normal::new(0.0, s * cfg.accel_noise_std)?;
    let d_gyro = Normal::new(0.0, s * cfg.gyro_noise_std)?;
    let d_mag = Normal::new(0.0, s * cfg.mag_noise_std)?;
    let d_att = Normal::new(0.0, s * cfg.attitude_noise_std)?;
    let d_gps_p = Normal::new(0.0, s * cfg.gps_pos_noise_std)?;
    let d_gps_a = Normal::new(0.0, s * cfg.gps_alt_noise_std)?;
    let d_gps_v = Normal::new(0.0, s * cfg.gps_vel_noise_std)?;

    let home = GeoReference::new(cfg.home_lat_deg, cfg.home_lon_deg, cfg.home_alt_m, 0);
    let mut data = SensorData::default();

    for i in 0..sim.time.len() {
        let t_us = (sim.time[i] * 1_000_000.0).round() as u64;

        // 1. IMU + actuator outputs share the inertial clock
        if i % imu_every == 0 {
            let specific_force = sim.specific_force[i] + noise(&mut rng, &d_accel);
            let gyro = sim.ang_vel[i] + noise(&mut rng, &d_gyro);
            let mag = cfg.use_mag.then(|| {
                sim.orientation[i].inverse_transform_vector(&cfg.mag_field_ned)
                    + noise(&mut rng, &d_mag)
            });
            data.samples.push(Sample::Imu(ImuSample {
                timestamp_us: t_us,
                specific_force,
                gyro,
                mag,
                dt: imu_dt,
            }));

            if let Some(outputs) = sim.outputs[i] {
                data.samples.push(Sample::Actuators(ActuatorSample {
                    timestamp_us: t_us,
                    outputs,
                }));
            }
        }

        // 2. External attitude
        if i % att_every == 0 {
            let err = UnitQuaternion::from_scaled_axis(noise(&mut rng, &d_att));
            data.samples.push(Sample::Attitude(AttitudeSample {
                timestamp_us: t_us,
                quaternion: sim.orientation[i] * err,
            }));
        }

        // 3. GPS, geodetic around home
        if i % gps_every == 0 {
            let p = sim.pos[i] + noise(&mut rng, &d_gps_p);
            let (lat_deg, lon_deg) = home.reproject(p.x, p.y);
            data.samples.push(Sample::Gps(GpsFix {
                timestamp_us: t_us,
                lat_deg,
                lon_deg,
                alt_m: cfg.home_alt_m - sim.pos[i].z + d_gps_a.sample(&mut rng),
                vel_ned: sim.vel[i] + noise(&mut rng, &d_gps_v),
            }));
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{simulate_quad, QuadParams};

    fn short_flight() -> SimResult {
        simulate_quad(&QuadParams {
            arm_time: 1.0,
            duration: 3.0,
            ..QuadParams::default()
        })
    }

    #[test]
    fn test_rates_and_ordering() {
        let sim = short_flight();
        let data = generate_sensor_data(&sim, &SensorConfig::default()).expect("sensors");

        assert_eq!(data.count(|s| matches!(s, Sample::Imu(_))), 750);
        assert_eq!(data.count(|s| matches!(s, Sample::Attitude(_))), 300);
        assert_eq!(data.count(|s| matches!(s, Sample::Gps(_))), 30);
        // Motors armed for the last two seconds
        let armed = data.count(|s| matches!(s, Sample::Actuators(_)));
        assert!((499..=500).contains(&armed), "{armed} actuator samples");

        assert!(data
            .samples
            .windows(2)
            .all(|w| w[0].timestamp_us() <= w[1].timestamp_us()));
    }

    #[test]
    fn test_seeded_streams_repeat() {
        let sim = short_flight();
        let cfg = SensorConfig::default();
        let a = generate_sensor_data(&sim, &cfg).expect("sensors");
        let b = generate_sensor_data(&sim, &cfg).expect("sensors");
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn test_gps_on_pad_is_home() {
        let sim = short_flight();
        let cfg = SensorConfig {
            noise_scale: 0.0,
            ..SensorConfig::default()
        };
        let data = generate_sensor_data(&sim, &cfg).expect("sensors");
        let Some(Sample::Gps(fix)) = data.samples.iter().find(|s| matches!(s, Sample::Gps(_)))
        else {
            panic!("no gps fix");
        };
        assert!((fix.lat_deg - cfg.home_lat_deg).abs() < 1e-12);
        assert!((fix.lon_deg - cfg.home_lon_deg).abs() < 1e-12);
        assert!((fix.alt_m - cfg.home_alt_m).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_rate() {
        let sim = short_flight();
        let cfg = SensorConfig {
            gps_rate_hz: 0.0,
            ..SensorConfig::default()
        };
        assert!(generate_sensor_data(&sim, &cfg).is_err());
    }
}
