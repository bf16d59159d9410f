//! Latest-value sample slots shared between producers and the fusion worker.

use crate::config::EstimatorParams;
use crate::fusion::{ActuatorSample, AttitudeSample, CycleSamples, ImuSample};
use crate::gps::GpsFix;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of waiting for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// An inertial or actuator sample is pending.
    Ready,
    TimedOut,
    /// The source will produce nothing more.
    Closed,
}

/// Where the worker pulls its inputs from.
pub trait SampleSource {
    /// Blocks until an inertial or actuator sample is pending, the source is
    /// closed, or `timeout` elapses. Pending samples win over `Closed`.
    fn wait_for_trigger(&self, timeout: Duration) -> Wake;

    /// Drains every slot at once. The cycle timestamp comes from the inertial
    /// sample, else the actuator sample.
    fn take_cycle(&self) -> CycleSamples;
}

#[derive(Default)]
struct Slots {
    imu: Option<ImuSample>,
    attitude: Option<AttitudeSample>,
    gps: Option<GpsFix>,
    actuators: Option<ActuatorSample>,
    params: Option<EstimatorParams>,
    closed: bool,
}

impl Slots {
    fn triggered(&self) -> bool {
        self.imu.is_some() || self.actuators.is_some()
    }
}

/// One slot per input type. Publishing overwrites whatever the worker has not
/// consumed yet; producers never block on the reader.
#[derive(Default)]
pub struct SampleBus {
    slots: Mutex<Slots>,
    ready: Condvar,
}

impl SampleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_imu(&self, sample: ImuSample) {
        self.slots.lock().imu = Some(sample);
        self.ready.notify_one();
    }

    pub fn publish_actuators(&self, sample: ActuatorSample) {
        self.slots.lock().actuators = Some(sample);
        self.ready.notify_one();
    }

    pub fn publish_attitude(&self, sample: AttitudeSample) {
        self.slots.lock().attitude = Some(sample);
    }

    pub fn publish_gps(&self, fix: GpsFix) {
        self.slots.lock().gps = Some(fix);
    }

    pub fn publish_params(&self, params: EstimatorParams) {
        self.slots.lock().params = Some(params);
    }

    /// Publishes every present field of `samples` under one lock with a single
    /// wake-up, so the worker never sees half of a group.
    pub fn publish_cycle(&self, samples: &CycleSamples) {
        let triggered = {
            let mut slots = self.slots.lock();
            if samples.imu.is_some() {
                slots.imu = samples.imu;
            }
            if samples.attitude.is_some() {
                slots.attitude = samples.attitude;
            }
            if samples.gps.is_some() {
                slots.gps = samples.gps;
            }
            if samples.actuators.is_some() {
                slots.actuators = samples.actuators;
            }
            if samples.params.is_some() {
                slots.params = samples.params;
            }
            slots.triggered()
        };
        if triggered {
            self.ready.notify_one();
        }
    }

    /// An inertial or actuator sample is waiting to be consumed.
    pub fn has_pending_trigger(&self) -> bool {
        self.slots.lock().triggered()
    }

    /// Marks the bus closed and wakes every waiter. A worker returns from its
    /// wait immediately once nothing is pending.
    pub fn close(&self) {
        self.slots.lock().closed = true;
        self.ready.notify_all();
    }
}

impl SampleSource for SampleBus {
    fn wait_for_trigger(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        loop {
            if slots.triggered() {
                return Wake::Ready;
            }
            if slots.closed {
                return Wake::Closed;
            }
            if self.ready.wait_until(&mut slots, deadline).timed_out() {
                return match (slots.triggered(), slots.closed) {
                    (true, _) => Wake::Ready,
                    (false, true) => Wake::Closed,
                    (false, false) => Wake::TimedOut,
                };
            }
        }
    }

    fn take_cycle(&self) -> CycleSamples {
        let mut slots = self.slots.lock();
        let imu = slots.imu.take();
        let actuators = slots.actuators.take();
        CycleSamples {
            timestamp_us: imu
                .map(|s| s.timestamp_us)
                .or(actuators.map(|a| a.timestamp_us))
                .unwrap_or_default(),
            imu,
            attitude: slots.attitude.take(),
            gps: slots.gps.take(),
            actuators,
            params: slots.params.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::sync::Arc;

    fn imu(t: u64) -> ImuSample {
        ImuSample {
            timestamp_us: t,
            specific_force: Vector3::new(0.0, 0.0, -9.8),
            gyro: Vector3::zeros(),
            mag: None,
            dt: 0.004,
        }
    }

    fn gps(t: u64) -> GpsFix {
        GpsFix {
            timestamp_us: t,
            lat_deg: 1.0,
            lon_deg: 2.0,
            alt_m: 3.0,
            vel_ned: Vector3::zeros(),
        }
    }

    #[test]
    fn test_latest_value_wins() {
        let bus = SampleBus::new();
        bus.publish_imu(imu(1));
        bus.publish_imu(imu(2));
        assert_eq!(bus.take_cycle().imu.map(|s| s.timestamp_us), Some(2));
        assert!(bus.take_cycle().imu.is_none());
    }

    #[test]
    fn test_wait_times_out_without_trigger() {
        let bus = SampleBus::new();
        bus.publish_gps(gps(0));
        // GPS alone does not wake the worker
        assert_eq!(bus.wait_for_trigger(Duration::from_millis(5)), Wake::TimedOut);
        assert!(bus.take_cycle().gps.is_some());
    }

    #[test]
    fn test_wait_returns_when_pending() {
        let bus = SampleBus::new();
        bus.publish_actuators(ActuatorSample {
            timestamp_us: 3,
            outputs: [1.0; 4],
        });
        assert!(bus.has_pending_trigger());
        assert_eq!(bus.wait_for_trigger(Duration::from_millis(1)), Wake::Ready);
        let cycle = bus.take_cycle();
        assert_eq!(cycle.timestamp_us, 3);
        assert!(cycle.actuators.is_some());
        assert!(!bus.has_pending_trigger());
    }

    #[test]
    fn test_cycle_published_and_taken_whole() {
        let bus = SampleBus::new();
        bus.publish_cycle(&CycleSamples {
            timestamp_us: 8,
            imu: Some(imu(8)),
            gps: Some(gps(8)),
            actuators: Some(ActuatorSample {
                timestamp_us: 8,
                outputs: [900.0; 4],
            }),
            ..CycleSamples::default()
        });
        let cycle = bus.take_cycle();
        assert_eq!(cycle.timestamp_us, 8);
        assert!(cycle.imu.is_some() && cycle.gps.is_some() && cycle.actuators.is_some());
        assert!(!bus.has_pending_trigger());
        assert!(bus.take_cycle().gps.is_none());
    }

    #[test]
    fn test_partial_cycle_keeps_other_slots() {
        let bus = SampleBus::new();
        bus.publish_gps(gps(4));
        bus.publish_cycle(&CycleSamples {
            timestamp_us: 5,
            imu: Some(imu(5)),
            ..CycleSamples::default()
        });
        let cycle = bus.take_cycle();
        assert_eq!(cycle.gps.map(|g| g.timestamp_us), Some(4));
        assert_eq!(cycle.imu.map(|s| s.timestamp_us), Some(5));
    }

    #[test]
    fn test_close_ends_wait_early() {
        let bus = Arc::new(SampleBus::new());
        let closer = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                bus.close();
            })
        };
        let start = Instant::now();
        assert_eq!(bus.wait_for_trigger(Duration::from_secs(10)), Wake::Closed);
        assert!(start.elapsed() < Duration::from_secs(5));
        closer.join().expect("closer thread");
    }

    #[test]
    fn test_pending_sample_wins_over_close() {
        let bus = SampleBus::new();
        bus.publish_imu(imu(9));
        bus.close();
        assert_eq!(bus.wait_for_trigger(Duration::from_millis(1)), Wake::Ready);
        bus.take_cycle();
        assert_eq!(bus.wait_for_trigger(Duration::from_millis(1)), Wake::Closed);
    }

    #[test]
    fn test_producer_wakes_waiting_worker() {
        let bus = Arc::new(SampleBus::new());
        let producer = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                bus.publish_imu(imu(7));
            })
        };
        assert_eq!(bus.wait_for_trigger(Duration::from_secs(5)), Wake::Ready);
        assert_eq!(bus.take_cycle().timestamp_us, 7);
        producer.join().expect("producer thread");
    }
}
