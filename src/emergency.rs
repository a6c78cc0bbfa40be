use crate::protocol::PlaneId;
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_EMERGENCY_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmergencyState {
    #[default]
    Inactive,
    Active { by: PlaneId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmergencyEvent {
    Declared,
    /// Declare attempted while another emergency was active.
    DeclareRejected,
    Resolved,
    /// Resolved by the emergency override on behalf of the holder.
    ResolvedByOverride,
    /// Resolve attempted by a plane that does not hold the emergency.
    ResolveDenied,
    /// Holder's ID was released without a resolve.
    Forfeited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyEventRecord {
    pub sequence: u32,
    pub event: EmergencyEvent,
    pub requester: PlaneId,
    pub holder: Option<PlaneId>,
}

/// Owns the single active-emergency flag and its history.
#[derive(Debug, Default)]
pub struct EmergencyController {
    state: EmergencyState,
    event_history: Vec<EmergencyEventRecord, MAX_EMERGENCY_EVENTS>,
    next_sequence: u32,
}

impl EmergencyController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `id` the emergency holder. Fails while any emergency is active,
    /// leaving the current holder in place.
    pub fn declare(&mut self, id: PlaneId) -> bool {
        match self.state {
            EmergencyState::Inactive => {
                self.state = EmergencyState::Active { by: id };
                self.record_event(EmergencyEvent::Declared, id, Some(id));
                true
            }
            EmergencyState::Active { by } => {
                self.record_event(EmergencyEvent::DeclareRejected, id, Some(by));
                false
            }
        }
    }

    /// Clears the active emergency when `id` is the holder or `override_active`
    /// is set. Returns the holder whose ID must now be released.
    pub fn resolve(&mut self, id: PlaneId, override_active: bool) -> Option<PlaneId> {
        let EmergencyState::Active { by } = self.state else {
            return None;
        };

        if by == id {
            self.state = EmergencyState::Inactive;
            self.record_event(EmergencyEvent::Resolved, id, Some(by));
            Some(by)
        } else if override_active {
            self.state = EmergencyState::Inactive;
            self.record_event(EmergencyEvent::ResolvedByOverride, id, Some(by));
            Some(by)
        } else {
            self.record_event(EmergencyEvent::ResolveDenied, id, Some(by));
            None
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, EmergencyState::Active { .. })
    }

    pub fn holder(&self) -> Option<PlaneId> {
        match self.state {
            EmergencyState::Inactive => None,
            EmergencyState::Active { by } => Some(by),
        }
    }

    pub fn state(&self) -> EmergencyState {
        self.state
    }

    pub fn event_history(&self) -> &[EmergencyEventRecord] {
        &self.event_history
    }

    /// Ends the emergency if `id` holds it. Called whenever the holder's ID
    /// goes back to the pool outside a resolve.
    pub fn forfeit(&mut self, id: PlaneId) -> bool {
        match self.state {
            EmergencyState::Active { by } if by == id => {
                self.state = EmergencyState::Inactive;
                self.record_event(EmergencyEvent::Forfeited, id, Some(by));
                true
            }
            _ => false,
        }
    }

    fn record_event(&mut self, event: EmergencyEvent, requester: PlaneId, holder: Option<PlaneId>) {
        let record = EmergencyEventRecord {
            sequence: self.next_sequence,
            event,
            requester,
            holder,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        // Circular history
        if self.event_history.is_full() {
            self.event_history.remove(0);
        }

        let _ = self.event_history.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(raw: u8) -> PlaneId {
        PlaneId::new(raw).unwrap()
    }

    #[test]
    fn test_declare_then_resolve_by_holder() {
        let mut emergency = EmergencyController::new();

        assert!(emergency.declare(plane(0)));
        assert!(emergency.is_active());
        assert_eq!(emergency.holder(), Some(plane(0)));

        assert_eq!(emergency.resolve(plane(0), false), Some(plane(0)));
        assert!(!emergency.is_active());
    }

    #[test]
    fn test_second_declare_keeps_first_holder() {
        let mut emergency = EmergencyController::new();
        emergency.declare(plane(6));

        assert!(!emergency.declare(plane(7)));
        assert_eq!(emergency.state(), EmergencyState::Active { by: plane(6) });

        let last = emergency.event_history().last().unwrap();
        assert_eq!(last.event, EmergencyEvent::DeclareRejected);
        assert_eq!(last.requester, plane(7));
    }

    #[test]
    fn test_wrong_plane_cannot_resolve_without_override() {
        let mut emergency = EmergencyController::new();
        emergency.declare(plane(6));

        assert_eq!(emergency.resolve(plane(7), false), None);
        assert_eq!(emergency.holder(), Some(plane(6)));

        assert_eq!(emergency.resolve(plane(7), true), Some(plane(6)));
        assert!(!emergency.is_active());
        assert_eq!(
            emergency.event_history().last().map(|r| r.event),
            Some(EmergencyEvent::ResolvedByOverride)
        );
    }

    #[test]
    fn test_forfeit_only_applies_to_holder() {
        let mut emergency = EmergencyController::new();
        assert!(!emergency.forfeit(plane(3)));

        emergency.declare(plane(3));
        assert!(!emergency.forfeit(plane(4)));
        assert_eq!(emergency.holder(), Some(plane(3)));

        assert!(emergency.forfeit(plane(3)));
        assert!(!emergency.is_active());

        let last = emergency.event_history().last().unwrap();
        assert_eq!(last.event, EmergencyEvent::Forfeited);
        assert_eq!(last.holder, Some(plane(3)));

        // A fresh declare works once the holder is gone
        assert!(emergency.declare(plane(4)));
    }

    #[test]
    fn test_resolve_without_emergency_is_noop() {
        let mut emergency = EmergencyController::new();

        assert_eq!(emergency.resolve(plane(1), true), None);
        assert!(emergency.event_history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut emergency = EmergencyController::new();
        emergency.declare(plane(0));
        for _ in 0..(MAX_EMERGENCY_EVENTS * 2) {
            emergency.declare(plane(1));
        }

        assert_eq!(emergency.event_history().len(), MAX_EMERGENCY_EVENTS);
        assert_eq!(
            emergency.event_history().last().map(|r| r.sequence),
            Some((MAX_EMERGENCY_EVENTS * 2) as u32)
        );
    }
}
