use crate::arbiter::{Arbiter, ArbiterStats, ControlInputs};
use crate::emergency::{EmergencyEventRecord, EmergencyState};
use crate::protocol::PlaneId;
use crate::runway::{RunwayState, RUNWAY_COUNT};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the tower, served on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerSnapshot {
    pub sequence_number: u32,
    pub allocated_mask: u16,
    pub airspace_full: bool,
    pub runways: [RunwayState; RUNWAY_COUNT],
    pub takeoff_queue: alloc::vec::Vec<PlaneId>,
    pub landing_queue: alloc::vec::Vec<PlaneId>,
    pub emergency: EmergencyState,
    pub takeoff_first: bool,
    pub controls: ControlInputs,
    pub stats: ArbiterStats,
    pub emergency_events: alloc::vec::Vec<EmergencyEventRecord>,
    #[serde(with = "serde_bytes")]
    pub last_replies: alloc::vec::Vec<u8>,
}

impl TowerSnapshot {
    pub fn capture(arbiter: &Arbiter, sequence_number: u32) -> Self {
        let state = arbiter.state();

        Self {
            sequence_number,
            allocated_mask: state.registry().mask(),
            airspace_full: state.registry().is_full(),
            runways: state.runways().states(),
            takeoff_queue: state.takeoff_queue().iter().copied().collect(),
            landing_queue: state.landing_queue().iter().copied().collect(),
            emergency: state.emergency().state(),
            takeoff_first: state.takeoff_first(),
            controls: arbiter.controls(),
            stats: *arbiter.stats(),
            emergency_events: state.emergency().event_history().to_vec(),
            last_replies: arbiter.last_replies().to_vec(),
        }
    }

    /// Runway occupancy as a bitmask, runway 0 in bit 0.
    pub fn active_runways(&self) -> u8 {
        self.runways
            .iter()
            .enumerate()
            .filter(|(_, runway)| !runway.is_free())
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }
}

/// Hands out monotonically increasing snapshot sequence numbers.
#[derive(Debug, Default)]
pub struct SnapshotCollector {
    sequence_counter: u32,
}

impl SnapshotCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, arbiter: &Arbiter) -> TowerSnapshot {
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        TowerSnapshot::capture(arbiter, self.sequence_counter)
    }
}
