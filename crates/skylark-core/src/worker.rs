use crate::bus::{SampleSource, Wake};
use crate::estimator::StateEstimator;
use crate::fusion::{FusionEngine, OutputRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where finished records go. Returning `false` ends the worker.
pub trait RecordSink {
    fn publish(&mut self, record: OutputRecord) -> bool;
}

impl RecordSink for mpsc::Sender<OutputRecord> {
    fn publish(&mut self, record: OutputRecord) -> bool {
        self.send(record).is_ok()
    }
}

impl RecordSink for Vec<OutputRecord> {
    fn publish(&mut self, record: OutputRecord) -> bool {
        self.push(record);
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles: u64,
    pub records: u64,
    pub timeouts: u64,
}

/// Cooperative fusion loop. Runs until `stop` is set, the source closes or the
/// sink goes away.
pub fn run_worker<E, S, K>(
    engine: &mut FusionEngine<E>,
    source: &S,
    sink: &mut K,
    stop: &AtomicBool,
    wait: Duration,
) -> WorkerStats
where
    E: StateEstimator,
    S: SampleSource + ?Sized,
    K: RecordSink + ?Sized,
{
    let mut stats = WorkerStats::default();
    info!(estimator = engine.estimator().kind().label(), "fusion worker started");

    while !stop.load(Ordering::SeqCst) {
        match source.wait_for_trigger(wait) {
            Wake::Ready => {}
            Wake::TimedOut => {
                stats.timeouts += 1;
                warn!("no inertial data within {:?}", wait);
                continue;
            }
            Wake::Closed => break,
        }

        let samples = source.take_cycle();
        stats.cycles += 1;
        if let Some(record) = engine.cycle(&samples) {
            if !sink.publish(record) {
                info!("record receiver closed");
                break;
            }
            stats.records += 1;
        }
    }

    debug!(?stats, "fusion worker stopped");
    stats
}
