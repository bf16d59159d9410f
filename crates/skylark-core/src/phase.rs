use crate::config::EstimatorTuning;
use crate::Scalar;
use tracing::info;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlightPhase {
    PreFlight = 0,
    Airborne = 1,
}

impl FlightPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::PreFlight => "PreFlight",
            Self::Airborne => "Airborne",
        }
    }
}

pub const NUM_PHASES: usize = 2;

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// One-way `PreFlight → Airborne` latch driven by actuator activity.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTracker {
    phase: FlightPhase,
    /// Entry timestamp of each phase, `None` until reached.
    transition_times: [Option<u64>; NUM_PHASES],
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let mut transition_times = [None; NUM_PHASES];
        transition_times[FlightPhase::PreFlight as usize] = Some(0);
        Self {
            phase: FlightPhase::PreFlight,
            transition_times,
        }
    }

    /// Records an actuator-output sample.
    pub fn on_actuator_output(&mut self, timestamp_us: u64) -> FlightPhase {
        if self.phase == FlightPhase::PreFlight {
            self.phase = FlightPhase::Airborne;
            self.transition_times[FlightPhase::Airborne as usize] = Some(timestamp_us);
            info!(timestamp_us, "actuator outputs seen, switching to airborne step");
        }
        self.phase
    }

    pub fn current_phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn transition_time(&self, phase: FlightPhase) -> Option<u64> {
        self.transition_times[phase as usize]
    }

    /// Fixed integration step for the current phase.
    pub fn cycle_dt(&self, tuning: &EstimatorTuning) -> Scalar {
        match self.phase {
            FlightPhase::PreFlight => tuning.dt_preflight,
            FlightPhase::Airborne => tuning.dt_airborne,
        }
    }
}
