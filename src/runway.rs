use crate::protocol::PlaneId;
use serde::{Deserialize, Serialize};

pub const RUNWAY_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Runway {
    Zero,
    One,
}

impl Runway {
    pub const ALL: [Runway; RUNWAY_COUNT] = [Runway::Zero, Runway::One];

    /// Runway named by a packet's action bit.
    pub const fn from_bit(bit: bool) -> Self {
        if bit {
            Runway::One
        } else {
            Runway::Zero
        }
    }

    pub const fn bit(self) -> bool {
        matches!(self, Runway::One)
    }

    pub const fn index(self) -> usize {
        match self {
            Runway::Zero => 0,
            Runway::One => 1,
        }
    }

    /// Bit for this runway inside a runway override mask.
    pub const fn mask(self) -> u8 {
        1 << self.index()
    }
}

impl core::fmt::Display for Runway {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Takeoff,
    Landing,
}

impl Operation {
    /// Operation named by a REQUEST packet's action bit.
    pub const fn from_bit(bit: bool) -> Self {
        if bit {
            Operation::Landing
        } else {
            Operation::Takeoff
        }
    }

    pub const fn bit(self) -> bool {
        matches!(self, Operation::Landing)
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::Takeoff => write!(f, "takeoff"),
            Operation::Landing => write!(f, "landing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub plane: PlaneId,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunwayState {
    #[default]
    Free,
    Occupied(Occupant),
}

impl RunwayState {
    pub fn is_free(&self) -> bool {
        matches!(self, RunwayState::Free)
    }

    pub fn occupant(&self) -> Option<Occupant> {
        match self {
            RunwayState::Free => None,
            RunwayState::Occupied(occupant) => Some(*occupant),
        }
    }
}

/// Busy/free status of both runways. At most one occupant per runway.
#[derive(Debug, Clone, Default)]
pub struct RunwayManager {
    runways: [RunwayState; RUNWAY_COUNT],
}

impl RunwayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `runway` for `plane` if it is free. Leaves state untouched otherwise.
    pub fn try_reserve(&mut self, runway: Runway, plane: PlaneId, operation: Operation) -> bool {
        let slot = &mut self.runways[runway.index()];
        if !slot.is_free() {
            return false;
        }

        *slot = RunwayState::Occupied(Occupant { plane, operation });
        true
    }

    /// Frees `runway`, returning whoever was on it.
    pub fn release(&mut self, runway: Runway) -> Option<Occupant> {
        core::mem::take(&mut self.runways[runway.index()]).occupant()
    }

    pub fn status(&self, runway: Runway) -> RunwayState {
        self.runways[runway.index()]
    }

    pub fn is_free(&self, runway: Runway) -> bool {
        self.runways[runway.index()].is_free()
    }

    /// Runway currently occupied by `plane`, if any.
    pub fn runway_of(&self, plane: PlaneId) -> Option<Runway> {
        Runway::ALL
            .into_iter()
            .find(|runway| matches!(self.status(*runway).occupant(), Some(o) if o.plane == plane))
    }

    /// Bitmask of occupied runways, runway 0 in bit 0.
    pub fn active_mask(&self) -> u8 {
        Runway::ALL
            .into_iter()
            .filter(|runway| !self.is_free(*runway))
            .fold(0, |mask, runway| mask | runway.mask())
    }

    pub fn states(&self) -> [RunwayState; RUNWAY_COUNT] {
        self.runways
    }
}
