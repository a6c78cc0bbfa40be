use crate::emergency::EmergencyController;
use crate::protocol::{Packet, PlaneId, RequestType};
use crate::queue::{RequestQueue, QUEUE_CAPACITY};
use crate::registry::PlaneRegistry;
use crate::runway::{Operation, Runway, RunwayManager};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::{debug, info, warn};

/// Worst case is an emergency flushing both full queues.
pub const MAX_REPLIES: usize = 2 * QUEUE_CAPACITY;

/// Valid bits of the runway override input.
pub const RUNWAY_OVERRIDE_MASK: u8 = 0b11;

const_assert!(RUNWAY_OVERRIDE_MASK.count_ones() as usize == crate::runway::RUNWAY_COUNT);

pub type Replies = Vec<Packet, MAX_REPLIES>;

/// Externally sampled switches that sit outside the packet protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlInputs {
    /// Non-zero selects alternating arbitration; bit n closes runway n.
    pub runway_override: u8,
    /// Lets any plane resolve the active emergency.
    pub emergency_override: bool,
}

impl ControlInputs {
    pub fn alternating(&self) -> bool {
        self.runway_override & RUNWAY_OVERRIDE_MASK != 0
    }

    pub fn is_closed(&self, runway: Runway) -> bool {
        self.runway_override & runway.mask() != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Retire a plane's ID once it declares its runway clear.
    pub release_on_declare: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterStats {
    pub packets: u32,
    pub allocations: u32,
    pub airspace_full: u32,
    pub clearances: u32,
    pub holds: u32,
    pub diverts: u32,
    pub say_agains: u32,
    pub ignored: u32,
}

/// Everything the tower mutates, kept in one place and touched only by [`Arbiter`].
#[derive(Debug, Default)]
pub struct ControllerState {
    registry: PlaneRegistry,
    runways: RunwayManager,
    takeoff_queue: RequestQueue,
    landing_queue: RequestQueue,
    emergency: EmergencyController,
    takeoff_first: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &PlaneRegistry {
        &self.registry
    }

    pub fn runways(&self) -> &RunwayManager {
        &self.runways
    }

    pub fn queue(&self, operation: Operation) -> &RequestQueue {
        match operation {
            Operation::Takeoff => &self.takeoff_queue,
            Operation::Landing => &self.landing_queue,
        }
    }

    pub fn takeoff_queue(&self) -> &RequestQueue {
        &self.takeoff_queue
    }

    pub fn landing_queue(&self) -> &RequestQueue {
        &self.landing_queue
    }

    pub fn emergency(&self) -> &EmergencyController {
        &self.emergency
    }

    pub fn takeoff_first(&self) -> bool {
        self.takeoff_first
    }

    fn queue_mut(&mut self, operation: Operation) -> &mut RequestQueue {
        match operation {
            Operation::Takeoff => &mut self.takeoff_queue,
            Operation::Landing => &mut self.landing_queue,
        }
    }

    /// Queue `plane` is waiting in, if any.
    fn waiting_for(&self, plane: PlaneId) -> Option<Operation> {
        [Operation::Takeoff, Operation::Landing]
            .into_iter()
            .find(|operation| self.queue(*operation).contains(plane))
    }
}

/// The tower: decodes one packet at a time and decides the replies.
#[derive(Debug, Default)]
pub struct Arbiter {
    state: ControllerState,
    controls: ControlInputs,
    config: ArbiterConfig,
    stats: ArbiterStats,
    last_replies: Vec<u8, MAX_REPLIES>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ArbiterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn controls(&self) -> ControlInputs {
        self.controls
    }

    pub fn set_controls(&mut self, controls: ControlInputs) {
        self.controls = controls;
    }

    pub fn set_runway_override(&mut self, mask: u8) {
        self.controls.runway_override = mask & RUNWAY_OVERRIDE_MASK;
    }

    pub fn set_emergency_override(&mut self, enabled: bool) {
        self.controls.emergency_override = enabled;
    }

    pub fn config(&self) -> ArbiterConfig {
        self.config
    }

    pub fn stats(&self) -> &ArbiterStats {
        &self.stats
    }

    /// Encoded replies produced by the most recent dispatch.
    pub fn last_replies(&self) -> &[u8] {
        &self.last_replies
    }

    /// Back to power-on state. Controls and policy are kept.
    pub fn reset(&mut self) {
        self.state = ControllerState::new();
        self.stats = ArbiterStats::default();
        self.last_replies.clear();
        info!("Tower reset");
    }

    pub fn process_byte(&mut self, byte: u8) -> Replies {
        self.dispatch(Packet::decode(byte))
    }

    /// Handles one request completely. Every input yields a deterministic
    /// (possibly empty) set of replies.
    pub fn dispatch(&mut self, packet: Packet) -> Replies {
        self.stats.packets = self.stats.packets.wrapping_add(1);
        let mut replies = Replies::new();
        let plane = packet.plane;

        match packet.kind {
            RequestType::IdPlease => self.handle_id_please(&mut replies),
            RequestType::Clear | RequestType::Hold | RequestType::SayAgain | RequestType::Divert => {
                debug!(%plane, kind = ?packet.kind, "reply-only type received as request");
                self.say_again(plane, &mut replies);
            }
            _ if !self.state.registry.is_allocated(plane) => {
                debug!(%plane, kind = ?packet.kind, "request from unallocated plane");
                self.say_again(plane, &mut replies);
            }
            RequestType::Request => {
                self.handle_request(plane, Operation::from_bit(packet.action), &mut replies);
            }
            RequestType::Declare => {
                self.handle_declare(plane, Runway::from_bit(packet.action), &mut replies);
            }
            RequestType::Emergency => {
                if packet.action {
                    self.handle_emergency_declare(plane, &mut replies);
                } else {
                    self.handle_emergency_resolve(plane);
                }
            }
        }

        self.last_replies = replies.iter().map(|reply| reply.encode()).collect();
        replies
    }

    fn handle_id_please(&mut self, replies: &mut Replies) {
        match self.state.registry.allocate() {
            Some(plane) => {
                self.stats.allocations = self.stats.allocations.wrapping_add(1);
                debug!(%plane, "ID allocated");
                push_reply(replies, Packet::id_available(plane));
            }
            None => {
                self.stats.airspace_full = self.stats.airspace_full.wrapping_add(1);
                debug!("Airspace full");
                push_reply(replies, Packet::airspace_full());
            }
        }
    }

    fn handle_request(&mut self, plane: PlaneId, operation: Operation, replies: &mut Replies) {
        if self.state.runways.runway_of(plane).is_some() || self.state.waiting_for(plane).is_some() {
            debug!(%plane, %operation, "duplicate request");
            self.say_again(plane, replies);
            return;
        }

        if let Some(runway) = self.open_runway_for(plane) {
            self.state.runways.try_reserve(runway, plane, operation);
            self.clear(plane, runway, replies);
        } else if self.state.queue_mut(operation).enqueue(plane) {
            self.stats.holds = self.stats.holds.wrapping_add(1);
            debug!(%plane, %operation, "holding");
            push_reply(replies, Packet::hold(plane));
        } else {
            warn!(%plane, %operation, "queue full");
            self.divert(plane, replies);
        }
    }

    fn handle_declare(&mut self, plane: PlaneId, runway: Runway, replies: &mut Replies) {
        let vacated = match self.state.runways.status(runway).occupant() {
            Some(occupant) if occupant.plane == plane => occupant.operation,
            _ => {
                self.stats.ignored = self.stats.ignored.wrapping_add(1);
                debug!(%plane, %runway, "declare ignored, plane not on runway");
                return;
            }
        };

        self.state.runways.release(runway);
        if self.config.release_on_declare {
            self.release_id(plane);
        }
        debug!(%plane, %runway, operation = %vacated, "runway declared clear");

        if let Some(next) = self.arbitrate(runway, vacated) {
            self.clear(next, runway, replies);
        }
    }

    fn handle_emergency_declare(&mut self, plane: PlaneId, replies: &mut Replies) {
        if !self.state.emergency.declare(plane) {
            self.stats.ignored = self.stats.ignored.wrapping_add(1);
            warn!(%plane, holder = ?self.state.emergency.holder(), "emergency already active");
            return;
        }

        info!(%plane, "Emergency declared");
        for operation in [Operation::Takeoff, Operation::Landing] {
            let flushed = self.state.queue_mut(operation).remove_all_matching(|waiting| waiting != plane);
            for waiting in flushed {
                self.divert(waiting, replies);
            }
        }
    }

    fn handle_emergency_resolve(&mut self, plane: PlaneId) {
        let Some(holder) = self.state.emergency.resolve(plane, self.controls.emergency_override) else {
            self.stats.ignored = self.stats.ignored.wrapping_add(1);
            debug!(%plane, "emergency resolve ignored");
            return;
        };

        self.state.registry.release(holder);
        if let Some(runway) = self.state.runways.runway_of(holder) {
            self.state.runways.release(runway);
        }
        self.state.takeoff_queue.remove(holder);
        self.state.landing_queue.remove(holder);
        info!(%holder, resolved_by = %plane, "Emergency resolved");
    }

    /// Picks who goes next onto the just-vacated `runway`.
    fn arbitrate(&mut self, runway: Runway, vacated: Operation) -> Option<PlaneId> {
        if self.controls.is_closed(runway) {
            return None;
        }

        // Only the holder moves during an emergency
        if let Some(holder) = self.state.emergency.holder() {
            let operation = self.state.waiting_for(holder)?;
            self.state.queue_mut(operation).remove(holder);
            self.state.runways.try_reserve(runway, holder, operation);
            return Some(holder);
        }

        let alternating = self.controls.alternating();
        let operation = if alternating {
            self.alternating_choice()?
        } else {
            vacated
        };

        let next = self.state.queue_mut(operation).dequeue()?;
        self.state.runways.try_reserve(runway, next, operation);
        if alternating {
            self.state.takeoff_first = !self.state.takeoff_first;
        }
        Some(next)
    }

    fn alternating_choice(&self) -> Option<Operation> {
        let takeoff_waiting = !self.state.takeoff_queue.is_empty();
        let landing_waiting = !self.state.landing_queue.is_empty();

        if self.state.takeoff_first && takeoff_waiting {
            Some(Operation::Takeoff)
        } else if landing_waiting {
            Some(Operation::Landing)
        } else if takeoff_waiting {
            Some(Operation::Takeoff)
        } else {
            None
        }
    }

    /// Lowest free runway `plane` may be cleared onto right now.
    fn open_runway_for(&self, plane: PlaneId) -> Option<Runway> {
        if let Some(holder) = self.state.emergency.holder() {
            if holder != plane {
                return None;
            }
        }

        Runway::ALL
            .into_iter()
            .find(|runway| self.state.runways.is_free(*runway) && !self.controls.is_closed(*runway))
    }

    fn clear(&mut self, plane: PlaneId, runway: Runway, replies: &mut Replies) {
        self.stats.clearances = self.stats.clearances.wrapping_add(1);
        debug!(%plane, %runway, "cleared");
        push_reply(replies, Packet::clear(plane, runway));
    }

    /// Returns `plane`'s ID to the pool, ending its emergency if it holds one.
    fn release_id(&mut self, plane: PlaneId) {
        self.state.registry.release(plane);
        if self.state.emergency.forfeit(plane) {
            warn!(%plane, "Emergency holder left airspace, emergency cleared");
        }
    }

    fn divert(&mut self, plane: PlaneId, replies: &mut Replies) {
        self.release_id(plane);
        self.stats.diverts = self.stats.diverts.wrapping_add(1);
        push_reply(replies, Packet::divert(plane));
    }

    fn say_again(&mut self, plane: PlaneId, replies: &mut Replies) {
        self.stats.say_agains = self.stats.say_agains.wrapping_add(1);
        push_reply(replies, Packet::say_again(plane));
    }
}

fn push_reply(replies: &mut Replies, packet: Packet) {
    // MAX_REPLIES bounds the largest flush
    let _ = replies.push(packet);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(raw: u8) -> PlaneId {
        PlaneId::new(raw).unwrap()
    }

    fn arbiter_with_planes(count: usize) -> Arbiter {
        let mut arbiter = Arbiter::new();
        for _ in 0..count {
            arbiter.dispatch(Packet::id_please());
        }
        arbiter
    }

    #[test]
    fn test_id_please_does_not_touch_toggle() {
        let mut arbiter = Arbiter::new();
        arbiter.set_runway_override(0b01);

        for _ in 0..20 {
            arbiter.dispatch(Packet::id_please());
        }

        assert!(!arbiter.state().takeoff_first());
        assert_eq!(arbiter.stats().allocations, 16);
        assert_eq!(arbiter.stats().airspace_full, 4);
    }

    #[test]
    fn test_duplicate_request_gets_say_again() {
        let mut arbiter = arbiter_with_planes(3);
        arbiter.dispatch(Packet::request(plane(0), Operation::Takeoff));
        arbiter.dispatch(Packet::request(plane(1), Operation::Takeoff));
        arbiter.dispatch(Packet::request(plane(2), Operation::Takeoff));

        let on_runway = arbiter.dispatch(Packet::request(plane(0), Operation::Landing));
        assert_eq!(on_runway.as_slice(), &[Packet::say_again(plane(0))]);

        let queued = arbiter.dispatch(Packet::request(plane(2), Operation::Takeoff));
        assert_eq!(queued.as_slice(), &[Packet::say_again(plane(2))]);
        assert_eq!(arbiter.state().takeoff_queue().len(), 1);
    }

    #[test]
    fn test_closed_runway_is_skipped() {
        let mut arbiter = arbiter_with_planes(2);
        arbiter.set_runway_override(0b01);

        let replies = arbiter.dispatch(Packet::request(plane(0), Operation::Takeoff));
        assert_eq!(replies.as_slice(), &[Packet::clear(plane(0), Runway::One)]);

        // Runway 0 is closed, so plane 1 waits even though it is free
        let replies = arbiter.dispatch(Packet::request(plane(1), Operation::Landing));
        assert_eq!(replies.as_slice(), &[Packet::hold(plane(1))]);
    }

    #[test]
    fn test_declare_wrong_runway_is_silent() {
        let mut arbiter = arbiter_with_planes(1);
        arbiter.dispatch(Packet::request(plane(0), Operation::Takeoff));

        let replies = arbiter.dispatch(Packet::declare(plane(0), Runway::One));
        assert!(replies.is_empty());
        assert!(!arbiter.state().runways().is_free(Runway::Zero));
        assert_eq!(arbiter.stats().ignored, 1);
    }

    #[test]
    fn test_release_on_declare_policy() {
        let mut arbiter = Arbiter::with_config(ArbiterConfig { release_on_declare: true });
        arbiter.dispatch(Packet::id_please());
        arbiter.dispatch(Packet::request(plane(0), Operation::Landing));
        arbiter.dispatch(Packet::declare(plane(0), Runway::Zero));

        assert!(!arbiter.state().registry().is_allocated(plane(0)));
        assert_eq!(arbiter.dispatch(Packet::id_please()).as_slice(), &[Packet::id_available(plane(0))]);
    }

    #[test]
    fn test_default_policy_keeps_id_after_declare() {
        let mut arbiter = arbiter_with_planes(1);
        arbiter.dispatch(Packet::request(plane(0), Operation::Landing));
        arbiter.dispatch(Packet::declare(plane(0), Runway::Zero));

        assert!(arbiter.state().registry().is_allocated(plane(0)));
    }

    #[test]
    fn test_last_replies_are_encoded() {
        let mut arbiter = Arbiter::new();
        arbiter.process_byte(Packet::id_please().encode());

        assert_eq!(arbiter.last_replies(), &[Packet::id_available(plane(0)).encode()]);
    }

    #[test]
    fn test_reset_keeps_controls() {
        let mut arbiter = arbiter_with_planes(4);
        arbiter.set_emergency_override(true);
        arbiter.reset();

        assert_eq!(arbiter.state().registry().allocated_count(), 0);
        assert_eq!(arbiter.stats().packets, 0);
        assert!(arbiter.controls().emergency_override);
    }

    #[test]
    fn test_stats_counters_wrap() {
        let mut arbiter = arbiter_with_planes(1);
        arbiter.stats.packets = u32::MAX;
        arbiter.stats.say_agains = u32::MAX;
        arbiter.stats.clearances = u32::MAX;

        arbiter.dispatch(Packet::hold(plane(0)));
        assert_eq!(arbiter.stats().packets, 0);
        assert_eq!(arbiter.stats().say_agains, 0);

        arbiter.dispatch(Packet::request(plane(0), Operation::Landing));
        assert_eq!(arbiter.stats().clearances, 0);
        assert_eq!(arbiter.stats().packets, 1);
    }
}
