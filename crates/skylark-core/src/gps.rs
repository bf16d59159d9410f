//! GPS reference calibration and local tangent-plane projection.

use crate::Scalar;
use nalgebra::Vector3;
use tracing::{debug, info};

#[cfg(not(feature = "std"))]
use nalgebra::{ComplexField as _, RealField as _};

// ---------------------------------------------------------------------------
// CONFIGURATION
// ---------------------------------------------------------------------------
pub const EARTH_RADIUS: Scalar = 6_371_000.0;
/// Altitude samples required before the stationarity gate is evaluated.
pub const STATIONARITY_WINDOW: usize = 6;
pub const DEFAULT_VARIANCE_THRESHOLD: Scalar = 1.0;

/// One receiver fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsFix {
    pub timestamp_us: u64,
    pub lat_deg: Scalar,
    pub lon_deg: Scalar,
    /// Altitude above mean sea level (m).
    pub alt_m: Scalar,
    /// Velocity in NED (m/s).
    pub vel_ned: Vector3<Scalar>,
}

impl GpsFix {
    /// Fix from integer receiver units: degrees·1e7 and millimetres.
    pub fn from_scaled(
        timestamp_us: u64,
        lat_e7: i32,
        lon_e7: i32,
        alt_mm: i32,
        vel_ned: Vector3<Scalar>,
    ) -> Self {
        Self {
            timestamp_us,
            lat_deg: lat_e7 as Scalar * 1e-7,
            lon_deg: lon_e7 as Scalar * 1e-7,
            alt_m: alt_mm as Scalar * 1e-3,
            vel_ned,
        }
    }
}

/// A fix expressed in the local NED frame around the reference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFix {
    pub timestamp_us: u64,
    pub position: Vector3<Scalar>,
    pub velocity: Vector3<Scalar>,
}

// ---------------------------------------------------------------------------
// REFERENCE
// ---------------------------------------------------------------------------

/// Tangent-plane origin. Immutable once created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoReference {
    lat0: Scalar,
    lon0: Scalar,
    sin_lat0: Scalar,
    cos_lat0: Scalar,
    alt0: Scalar,
    timestamp_us: u64,
}

impl GeoReference {
    pub fn new(lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar, timestamp_us: u64) -> Self {
        let lat0 = lat_deg.to_radians();
        Self {
            lat0,
            lon0: lon_deg.to_radians(),
            sin_lat0: lat0.sin(),
            cos_lat0: lat0.cos(),
            alt0: alt_m,
            timestamp_us,
        }
    }

    pub fn lat_deg(&self) -> Scalar {
        self.lat0.to_degrees()
    }

    pub fn lon_deg(&self) -> Scalar {
        self.lon0.to_degrees()
    }

    pub fn alt_m(&self) -> Scalar {
        self.alt0
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Azimuthal equidistant projection: `(north, east)` metres from the origin.
    pub fn project(&self, lat_deg: Scalar, lon_deg: Scalar) -> (Scalar, Scalar) {
        let lat = lat_deg.to_radians();
        let lon = lon_deg.to_radians();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let cos_d_lon = (lon - self.lon0).cos();

        let arg = (self.sin_lat0 * sin_lat + self.cos_lat0 * cos_lat * cos_d_lon).clamp(-1.0, 1.0);
        let c = arg.acos();
        let k = if c.abs() < Scalar::EPSILON { 1.0 } else { c / c.sin() };

        let x = k * (self.cos_lat0 * sin_lat - self.sin_lat0 * cos_lat * cos_d_lon) * EARTH_RADIUS;
        let y = k * cos_lat * (lon - self.lon0).sin() * EARTH_RADIUS;
        (x, y)
    }

    /// Inverse of [`GeoReference::project`].
    pub fn reproject(&self, x: Scalar, y: Scalar) -> (Scalar, Scalar) {
        let x_rad = x / EARTH_RADIUS;
        let y_rad = y / EARTH_RADIUS;
        let c = (x_rad * x_rad + y_rad * y_rad).sqrt();

        if c.abs() < Scalar::EPSILON {
            return (self.lat0.to_degrees(), self.lon0.to_degrees());
        }

        let (sin_c, cos_c) = (c.sin(), c.cos());
        let lat = (cos_c * self.sin_lat0 + (x_rad * sin_c * self.cos_lat0) / c).asin();
        let lon = self.lon0
            + (y_rad * sin_c).atan2(c * self.cos_lat0 * cos_c - x_rad * self.sin_lat0 * sin_c);
        (lat.to_degrees(), lon.to_degrees())
    }

    /// Down-positive height relative to the origin altitude.
    pub fn down(&self, alt_m: Scalar) -> Scalar {
        -(alt_m - self.alt0)
    }

    pub fn local_fix(&self, fix: &GpsFix) -> LocalFix {
        let (x, y) = self.project(fix.lat_deg, fix.lon_deg);
        LocalFix {
            timestamp_us: fix.timestamp_us,
            position: Vector3::new(x, y, self.down(fix.alt_m)),
            velocity: fix.vel_ned,
        }
    }
}

// ---------------------------------------------------------------------------
// CALIBRATOR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStatus {
    /// Window still filling or altitude still wandering.
    Pending { samples: usize, variance: Option<Scalar> },
    /// This fix fixed the origin.
    Calibrated(GeoReference),
    /// Origin already fixed, nothing done.
    AlreadyCalibrated,
}

#[derive(Clone, Copy, Debug)]
enum CalibrationState {
    Uncalibrated {
        window: [Scalar; STATIONARITY_WINDOW],
        len: usize,
    },
    Calibrated(GeoReference),
}

/// Holds the GPS reference back until the altitude has settled.
#[derive(Clone, Copy, Debug)]
pub struct GpsCalibrator {
    state: CalibrationState,
    variance_threshold: Scalar,
}

impl GpsCalibrator {
    pub fn new(variance_threshold: Scalar) -> Self {
        Self {
            state: CalibrationState::Uncalibrated {
                window: [0.0; STATIONARITY_WINDOW],
                len: 0,
            },
            variance_threshold,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated(_))
    }

    pub fn reference(&self) -> Option<&GeoReference> {
        match &self.state {
            CalibrationState::Calibrated(r) => Some(r),
            CalibrationState::Uncalibrated { .. } => None,
        }
    }

    pub fn set_variance_threshold(&mut self, threshold: Scalar) {
        self.variance_threshold = threshold;
    }

    /// Feeds one fix to the stationarity gate.
    pub fn push(&mut self, fix: &GpsFix) -> CalibrationStatus {
        let CalibrationState::Uncalibrated { window, len } = &mut self.state else {
            return CalibrationStatus::AlreadyCalibrated;
        };

        if *len == STATIONARITY_WINDOW {
            window.copy_within(1.., 0);
            *len -= 1;
        }
        window[*len] = fix.alt_m;
        *len += 1;

        if *len < STATIONARITY_WINDOW {
            return CalibrationStatus::Pending {
                samples: *len,
                variance: None,
            };
        }

        let variance = welford_variance(&window[..*len]);
        if variance > self.variance_threshold {
            debug!(variance, "GPS altitude not settled");
            // Oldest sample is evicted on the next push
            return CalibrationStatus::Pending {
                samples: *len,
                variance: Some(variance),
            };
        }

        let reference = GeoReference::new(fix.lat_deg, fix.lon_deg, fix.alt_m, fix.timestamp_us);
        info!(
            lat = fix.lat_deg,
            lon = fix.lon_deg,
            alt = fix.alt_m,
            variance,
            "GPS reference fixed"
        );
        self.state = CalibrationState::Calibrated(reference);
        CalibrationStatus::Calibrated(reference)
    }

    /// Local position of a fix, `None` until calibrated.
    pub fn project(&self, fix: &GpsFix) -> Option<LocalFix> {
        self.reference().map(|r| r.local_fix(fix))
    }
}

impl Default for GpsCalibrator {
    fn default() -> Self {
        Self::new(DEFAULT_VARIANCE_THRESHOLD)
    }
}

/// Population variance (`M2 / n`) in a single Welford pass.
pub fn welford_variance(samples: &[Scalar]) -> Scalar {
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &x) in samples.iter().enumerate() {
        let delta = x - mean;
        mean += delta / (i + 1) as Scalar;
        m2 += delta * (x - mean);
    }
    if samples.is_empty() {
        0.0
    } else {
        m2 / samples.len() as Scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(t: u64, lat: Scalar, lon: Scalar, alt: Scalar) -> GpsFix {
        GpsFix {
            timestamp_us: t,
            lat_deg: lat,
            lon_deg: lon,
            alt_m: alt,
            vel_ned: Vector3::zeros(),
        }
    }

    #[test]
    fn test_variance_constant_window_is_zero() {
        assert_eq!(welford_variance(&[42.0; 6]), 0.0);
        assert_eq!(welford_variance(&[]), 0.0);
    }

    #[test]
    fn test_variance_matches_closed_form() {
        let w = [10.0, 10.0, 10.0, 10.0, 10.0, 15.0];
        let mean = w.iter().sum::<Scalar>() / 6.0;
        let closed = w.iter().map(|x| (x - mean).powi(2)).sum::<Scalar>() / 6.0;
        assert!((welford_variance(&w) - closed).abs() < 1e-12);
        assert!((closed - 25.0 / 6.0 * (5.0 / 6.0)).abs() < 1e-12);
    }

    #[test]
    fn test_pending_until_window_full() {
        let mut cal = GpsCalibrator::default();
        for i in 0..5 {
            let s = cal.push(&fix(i, 55.0, 10.0, 100.0));
            assert_eq!(
                s,
                CalibrationStatus::Pending {
                    samples: i as usize + 1,
                    variance: None
                }
            );
        }
        assert!(!cal.is_calibrated());
        assert!(cal.project(&fix(9, 55.0, 10.0, 100.0)).is_none());
    }

    #[test]
    fn test_noisy_altitude_slides_window_then_calibrates() {
        let mut cal = GpsCalibrator::default();
        let alts = [100.0, 104.0, 97.0, 103.0, 100.0, 100.0];
        for (i, a) in alts.iter().enumerate() {
            cal.push(&fix(i as u64, 55.0, 10.0, *a));
        }
        assert!(!cal.is_calibrated());

        // Settled samples push the outliers out one by one
        let mut calibrated_at = None;
        for i in 0..10u64 {
            if let CalibrationStatus::Calibrated(r) = cal.push(&fix(100 + i, 55.0, 10.0, 100.2)) {
                calibrated_at = Some(i);
                assert_eq!(r.timestamp_us(), 100 + i);
                break;
            }
        }
        assert!(calibrated_at.is_some());
        assert!(cal.is_calibrated());
    }

    #[test]
    fn test_calibration_never_reverts() {
        let mut cal = GpsCalibrator::default();
        let mut transitions = 0;
        for i in 0..20u64 {
            let alt = if i < 6 { 50.0 } else { 50.0 + 30.0 * (i as Scalar) };
            if let CalibrationStatus::Calibrated(_) = cal.push(&fix(i, 1.0, 2.0, alt)) {
                transitions += 1;
            }
            if i >= 5 {
                assert!(cal.is_calibrated());
            }
        }
        assert_eq!(transitions, 1);
        assert_eq!(cal.push(&fix(99, 1.0, 2.0, 0.0)), CalibrationStatus::AlreadyCalibrated);
    }

    #[test]
    fn test_origin_projects_to_zero() {
        let r = GeoReference::new(55.367, 10.431, 12.0, 0);
        let (x, y) = r.project(55.367, 10.431);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
        assert_eq!(r.down(12.0), 0.0);
        assert!((r.down(22.0) + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_near_tangent_plane_formula() {
        let (lat0, lon0) = (47.397742, 8.545594);
        let r = GeoReference::new(lat0, lon0, 488.0, 0);
        let (dlat, dlon) = (0.004, -0.006);
        let (x, y) = r.project(lat0 + dlat, lon0 + dlon);

        let x_ltp = dlat.to_radians() * EARTH_RADIUS;
        let y_ltp = dlon.to_radians() * EARTH_RADIUS * lat0.to_radians().cos();
        assert!(((x - x_ltp) / x_ltp).abs() < 0.01, "x {x} vs {x_ltp}");
        assert!(((y - y_ltp) / y_ltp).abs() < 0.01, "y {y} vs {y_ltp}");

        // Same input, same output
        assert_eq!(r.project(lat0 + dlat, lon0 + dlon), (x, y));
    }

    #[test]
    fn test_reproject_inverts_project() {
        let r = GeoReference::new(-33.9, 151.2, 30.0, 0);
        let (lat, lon) = r.reproject(350.0, -820.0);
        let (x, y) = r.project(lat, lon);
        assert!((x - 350.0).abs() < 1e-6);
        assert!((y + 820.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_scaled_units() {
        let f = GpsFix::from_scaled(7, 473_977_420, 85_455_940, 488_123, Vector3::zeros());
        assert!((f.lat_deg - 47.397742).abs() < 1e-9);
        assert!((f.lon_deg - 8.545594).abs() < 1e-9);
        assert!((f.alt_m - 488.123).abs() < 1e-9);
    }
}
