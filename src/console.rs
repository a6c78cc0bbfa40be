//! Human-readable rendering of packets for operator consoles.
//!
//! Purely observational: nothing here feeds back into the tower.

use crate::protocol::{Packet, PlaneId, RequestType};
use crate::runway::{Operation, Runway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Tower,
    NewPlane,
    Plane(PlaneId),
}

impl core::fmt::Display for Speaker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Speaker::Tower => write!(f, "Tower"),
            Speaker::NewPlane => write!(f, "New Plane"),
            Speaker::Plane(id) => write!(f, "Plane {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Granted,
    Waiting,
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub speaker: Speaker,
    pub message: alloc::string::String,
    pub tone: Tone,
}

impl core::fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:<12} : {}", self.speaker.to_string(), self.message)
    }
}

/// Renders a packet travelling from a plane to the tower.
pub fn describe_request(packet: Packet) -> ConsoleLine {
    let plane = Speaker::Plane(packet.plane);

    let (speaker, message) = match packet.kind {
        RequestType::IdPlease => (Speaker::NewPlane, "Requesting ID for entry".into()),
        RequestType::Request => (plane, alloc::format!("Requesting {}", Operation::from_bit(packet.action))),
        RequestType::Declare => (
            plane,
            alloc::format!("Declaring takeoff/landing runway {}", Runway::from_bit(packet.action)),
        ),
        RequestType::Emergency if packet.action => (plane, "Declaring emergency".into()),
        RequestType::Emergency => (plane, "Resolving emergency".into()),
        _ => (plane, "Making invalid request".into()),
    };

    ConsoleLine {
        speaker,
        message,
        tone: Tone::Normal,
    }
}

/// Renders a packet travelling from the tower to a plane.
pub fn describe_reply(packet: Packet) -> ConsoleLine {
    let id = packet.plane;

    let (message, tone) = match packet.kind {
        RequestType::Clear => (
            alloc::format!("Plane {id} cleared runway {}", Runway::from_bit(packet.action)),
            Tone::Granted,
        ),
        RequestType::Hold => (alloc::format!("Plane {id} hold"), Tone::Waiting),
        RequestType::IdPlease if packet.action => ("My airspace is full".into(), Tone::Refused),
        RequestType::IdPlease => (alloc::format!("ID {} is available", id.get()), Tone::Granted),
        RequestType::Divert => (
            alloc::format!("Plane {id} divert due to congestion or emergency"),
            Tone::Refused,
        ),
        RequestType::SayAgain => (alloc::format!("Plane {id} say again"), Tone::Refused),
        RequestType::Request | RequestType::Declare | RequestType::Emergency => (
            alloc::format!("Unexpected {:?} frame for plane {id}", packet.kind),
            Tone::Normal,
        ),
    };

    ConsoleLine {
        speaker: Speaker::Tower,
        message,
        tone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lines() {
        let plane = PlaneId::new(3).unwrap();

        assert_eq!(describe_request(Packet::id_please()).speaker, Speaker::NewPlane);
        assert_eq!(
            describe_request(Packet::request(plane, Operation::Landing)).message,
            "Requesting landing"
        );
        assert_eq!(
            describe_request(Packet::declare(plane, Runway::One)).to_string(),
            "Plane 03     : Declaring takeoff/landing runway 1"
        );
        assert_eq!(describe_request(Packet::hold(plane)).message, "Making invalid request");
    }

    #[test]
    fn test_reply_lines() {
        let plane = PlaneId::new(12).unwrap();

        let clear = describe_reply(Packet::clear(plane, Runway::Zero));
        assert_eq!(clear.message, "Plane 12 cleared runway 0");
        assert_eq!(clear.tone, Tone::Granted);

        assert_eq!(describe_reply(Packet::airspace_full()).message, "My airspace is full");
        assert_eq!(describe_reply(Packet::id_available(plane)).message, "ID 12 is available");
        assert_eq!(describe_reply(Packet::divert(plane)).tone, Tone::Refused);
    }
}
