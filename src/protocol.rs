use crate::runway::{Operation, Runway};
use crate::telemetry::TowerSnapshot;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

/// Number of trackable aircraft; one per 4-bit plane ID.
pub const PLANE_SLOTS: usize = 16;

const PLANE_SHIFT: u8 = 4;
const TYPE_SHIFT: u8 = 1;
const TYPE_MASK: u8 = 0b0000_1110;
const ACTION_MASK: u8 = 0b0000_0001;

const_assert_eq!(PLANE_SLOTS, 1 << PLANE_SHIFT);
const_assert_eq!(TYPE_MASK | ACTION_MASK | (0xF << PLANE_SHIFT), 0xFF);

pub const MAX_COMMAND_SIZE: usize = 256;
pub const MAX_RESPONSE_SIZE: usize = 8192;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

/// A 4-bit aircraft identifier in `0..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlaneId(u8);

impl PlaneId {
    pub const MAX: u8 = (PLANE_SLOTS - 1) as u8;

    pub fn new(raw: u8) -> Result<Self, ProtocolError> {
        if raw > Self::MAX {
            return Err(ProtocolError::PlaneIdOutOfRange(raw));
        }
        Ok(Self(raw))
    }

    /// Takes the low nibble of `raw`; never fails.
    pub const fn from_nibble(raw: u8) -> Self {
        Self(raw & 0x0F)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = PlaneId> {
        (0..PLANE_SLOTS as u8).map(PlaneId)
    }
}

impl TryFrom<u8> for PlaneId {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<PlaneId> for u8 {
    fn from(id: PlaneId) -> Self {
        id.0
    }
}

impl core::fmt::Display for PlaneId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestType {
    Request = 0b000,
    Declare = 0b001,
    Emergency = 0b010,
    Clear = 0b011,
    Hold = 0b100,
    SayAgain = 0b101,
    Divert = 0b110,
    IdPlease = 0b111,
}

impl RequestType {
    /// Decodes the low three bits of `bits`.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => RequestType::Request,
            0b001 => RequestType::Declare,
            0b010 => RequestType::Emergency,
            0b011 => RequestType::Clear,
            0b100 => RequestType::Hold,
            0b101 => RequestType::SayAgain,
            0b110 => RequestType::Divert,
            _ => RequestType::IdPlease,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Types the tower sends but never accepts.
    pub const fn is_reply_only(self) -> bool {
        matches!(
            self,
            RequestType::Clear | RequestType::Hold | RequestType::SayAgain | RequestType::Divert
        )
    }
}

/// One 8-bit frame: `[plane:4][type:3][action:1]`, MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Packet {
    pub plane: PlaneId,
    pub kind: RequestType,
    pub action: bool,
}

impl Packet {
    pub const fn new(plane: PlaneId, kind: RequestType, action: bool) -> Self {
        Self { plane, kind, action }
    }

    pub const fn decode(byte: u8) -> Self {
        Self {
            plane: PlaneId::from_nibble(byte >> PLANE_SHIFT),
            kind: RequestType::from_bits((byte & TYPE_MASK) >> TYPE_SHIFT),
            action: byte & ACTION_MASK != 0,
        }
    }

    pub const fn encode(self) -> u8 {
        (self.plane.get() << PLANE_SHIFT) | (self.kind.bits() << TYPE_SHIFT) | self.action as u8
    }

    // Requests

    pub const fn id_please() -> Self {
        Self::new(PlaneId::from_nibble(0), RequestType::IdPlease, false)
    }

    pub const fn request(plane: PlaneId, operation: Operation) -> Self {
        Self::new(plane, RequestType::Request, operation.bit())
    }

    pub const fn declare(plane: PlaneId, runway: Runway) -> Self {
        Self::new(plane, RequestType::Declare, runway.bit())
    }

    pub const fn declare_emergency(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::Emergency, true)
    }

    pub const fn resolve_emergency(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::Emergency, false)
    }

    // Replies

    pub const fn clear(plane: PlaneId, runway: Runway) -> Self {
        Self::new(plane, RequestType::Clear, runway.bit())
    }

    pub const fn hold(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::Hold, false)
    }

    pub const fn say_again(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::SayAgain, false)
    }

    pub const fn divert(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::Divert, false)
    }

    pub const fn id_available(plane: PlaneId) -> Self {
        Self::new(plane, RequestType::IdPlease, false)
    }

    pub const fn airspace_full() -> Self {
        Self::new(PlaneId::from_nibble(0), RequestType::IdPlease, true)
    }
}

impl From<u8> for Packet {
    fn from(byte: u8) -> Self {
        Packet::decode(byte)
    }
}

impl From<Packet> for u8 {
    fn from(packet: Packet) -> Self {
        packet.encode()
    }
}

pub fn decode(byte: u8) -> Packet {
    Packet::decode(byte)
}

pub fn encode(packet: Packet) -> u8 {
    packet.encode()
}

// Control channel: line-delimited JSON beside the packet link

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlCommand {
    pub id: u32,
    pub command_type: ControlCommandType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlCommandType {
    Status,
    SetRunwayOverride { mask: u8 },
    SetEmergencyOverride { enabled: bool },
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: u32,
    pub status: ResponseStatus,
    pub message: Option<alloc::string::String>,
    pub snapshot: Option<TowerSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    InvalidCommand,
    Error,
}

#[derive(Debug)]
pub struct ControlHandler {
    // Preallocated buffers
    command_buffer: CommandBuffer,
    response_buffer: ResponseBuffer,
}

impl ControlHandler {
    pub fn new() -> Self {
        Self {
            command_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
        }
    }

    pub fn parse_command(&mut self, json_str: &str) -> Result<ControlCommand, ProtocolError> {
        self.command_buffer.clear();
        if json_str.len() > MAX_COMMAND_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        self.command_buffer.push_str(json_str);

        serde_json::from_str::<ControlCommand>(&self.command_buffer)
            .map_err(|_| ProtocolError::InvalidJson)
    }

    pub fn validate_command(&self, command: &ControlCommand) -> Result<(), ProtocolError> {
        match command.command_type {
            ControlCommandType::SetRunwayOverride { mask } if mask > crate::arbiter::RUNWAY_OVERRIDE_MASK => {
                Err(ProtocolError::InvalidParameter)
            }
            _ => Ok(()),
        }
    }

    pub fn serialize_response(&mut self, response: &ControlResponse) -> Result<&str, ProtocolError> {
        self.response_buffer.clear();

        let json_str = serde_json::to_string(response).map_err(|_| ProtocolError::SerializationError)?;

        if json_str.len() > MAX_RESPONSE_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        self.response_buffer.push_str(&json_str);

        Ok(&self.response_buffer)
    }

    pub fn create_response(&mut self, command_id: u32, status: ResponseStatus, message: Option<&str>) -> ControlResponse {
        ControlResponse {
            id: command_id,
            status,
            message: message.map(alloc::string::ToString::to_string),
            snapshot: None,
        }
    }
}

impl Default for ControlHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Plane ID {0} out of range (0-15)")]
    PlaneIdOutOfRange(u8),
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Message exceeds buffer size")]
    MessageTooLarge,
    #[error("Serialization failed")]
    SerializationError,
    #[error("Invalid parameter")]
    InvalidParameter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_bit_positions() {
        // Plane 3, DECLARE, runway 1
        let packet = Packet::decode(0b0011_001_1);
        assert_eq!(packet.plane.get(), 3);
        assert_eq!(packet.kind, RequestType::Declare);
        assert!(packet.action);
    }

    #[test]
    fn test_every_byte_decodes_and_reencodes() {
        for byte in 0..=u8::MAX {
            assert_eq!(Packet::decode(byte).encode(), byte);
        }
    }

    #[test]
    fn test_reply_only_types() {
        assert!(RequestType::Clear.is_reply_only());
        assert!(RequestType::Divert.is_reply_only());
        assert!(!RequestType::IdPlease.is_reply_only());
        assert!(!RequestType::Emergency.is_reply_only());
    }

    #[test]
    fn test_airspace_full_reply() {
        assert_eq!(Packet::airspace_full().encode(), (0b111 << 1) | 1);
    }

    #[test]
    fn test_plane_id_range() {
        assert!(PlaneId::new(15).is_ok());
        assert_eq!(PlaneId::new(16), Err(ProtocolError::PlaneIdOutOfRange(16)));
        assert_eq!(PlaneId::from_nibble(0x1F).get(), 15);
    }
}
