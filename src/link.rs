//! Byte-stream transport between aircraft and the tower.
//!
//! The tower consumes one byte at a time and answers with zero or more bytes.
//! Framing and timing belong to the link, never to the [`Arbiter`].

use crate::arbiter::Arbiter;
use core::fmt::Debug;
use heapless::spsc::Queue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

/// Holds `LINK_BUFFER_SIZE - 1` bytes per direction.
pub const LINK_BUFFER_SIZE: usize = 64;

type ByteQueue = Queue<u8, LINK_BUFFER_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// UART framing for the tower link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl LinkSettings {
    /// Line time for one framed byte, start and stop bits included.
    pub fn frame_time_ns(&self) -> u64 {
        let parity_bits = u64::from(self.parity != Parity::None);
        let bits = 1 + u64::from(self.data_bits) + parity_bits + u64::from(self.stop_bits);
        bits * 1_000_000_000 / u64::from(self.baud_rate.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Link buffer overrun")]
    Overrun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PumpError<E: Debug> {
    #[error("Link read failed: {0:?}")]
    Read(E),
    /// The request was already applied; `total - written` replies were lost.
    #[error("Link write failed after {written} of {total} replies: {error:?}")]
    Write { error: E, written: usize, total: usize },
}

/// Non-blocking single-byte serial port.
pub trait SerialLink {
    type Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error>;
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}

/// In-memory full-duplex link. The aircraft side pushes requests with
/// [`LoopbackLink::send`] and drains replies with [`LoopbackLink::receive`];
/// the tower side uses the [`SerialLink`] impl.
#[derive(Debug)]
pub struct LoopbackLink {
    to_tower: ByteQueue,
    from_tower: ByteQueue,
    settings: LinkSettings,
}

impl LoopbackLink {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            to_tower: Queue::new(),
            from_tower: Queue::new(),
            settings,
        }
    }

    pub fn settings(&self) -> LinkSettings {
        self.settings
    }

    /// Aircraft side: queue a request byte for the tower.
    pub fn send(&mut self, byte: u8) -> Result<(), LinkError> {
        self.to_tower.enqueue(byte).map_err(|_| LinkError::Overrun)
    }

    /// Aircraft side: next reply byte, if any.
    pub fn receive(&mut self) -> Option<u8> {
        self.from_tower.dequeue()
    }

    /// Aircraft side: every reply byte currently waiting.
    pub fn receive_all(&mut self) -> alloc::vec::Vec<u8> {
        core::iter::from_fn(|| self.from_tower.dequeue()).collect()
    }

    pub fn pending_requests(&self) -> usize {
        self.to_tower.len()
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new(LinkSettings::default())
    }
}

impl SerialLink for LoopbackLink {
    type Error = LinkError;

    fn read(&mut self) -> nb::Result<u8, LinkError> {
        self.to_tower.dequeue().ok_or(nb::Error::WouldBlock)
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), LinkError> {
        self.from_tower
            .enqueue(byte)
            .map_err(|_| nb::Error::Other(LinkError::Overrun))
    }
}

/// Drains every byte the link has ready, dispatching each through `arbiter`
/// and writing its replies back. Returns the number of packets handled.
pub fn pump<L>(link: &mut L, arbiter: &mut Arbiter) -> Result<usize, PumpError<L::Error>>
where
    L: SerialLink,
    L::Error: Debug,
{
    let mut handled = 0;

    loop {
        let byte = match link.read() {
            Ok(byte) => byte,
            Err(nb::Error::WouldBlock) => return Ok(handled),
            Err(nb::Error::Other(e)) => return Err(PumpError::Read(e)),
        };

        let replies = arbiter.process_byte(byte);
        let total = replies.len();
        for (written, reply) in replies.iter().enumerate() {
            trace!(request = byte, reply = reply.encode(), "link reply");
            if let Err(error) = nb::block!(link.write(reply.encode())) {
                warn!(request = byte, written, dropped = total - written, "Link write failed, replies dropped");
                return Err(PumpError::Write { error, written, total });
            }
        }
        handled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Packet, PlaneId};
    use crate::runway::Operation;

    #[test]
    fn test_default_framing_is_8n1() {
        let settings = LinkSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, 1);
        // Ten bits on the wire
        assert_eq!(settings.frame_time_ns(), 10 * 1_000_000_000 / 115_200);
    }

    #[test]
    fn test_pump_round_trip() {
        let mut link = LoopbackLink::default();
        let mut arbiter = Arbiter::new();

        link.send(Packet::id_please().encode()).unwrap();
        link.send(Packet::id_please().encode()).unwrap();
        assert_eq!(pump(&mut link, &mut arbiter), Ok(2));

        let replies = link.receive_all();
        assert_eq!(
            replies,
            vec![
                Packet::id_available(PlaneId::new(0).unwrap()).encode(),
                Packet::id_available(PlaneId::new(1).unwrap()).encode(),
            ]
        );
        assert_eq!(pump(&mut link, &mut arbiter), Ok(0));
    }

    #[test]
    fn test_send_overrun() {
        let mut link = LoopbackLink::default();
        for _ in 0..(LINK_BUFFER_SIZE - 1) {
            link.send(0).unwrap();
        }

        assert_eq!(link.send(0), Err(LinkError::Overrun));
    }

    #[test]
    fn test_reply_overrun_surfaces_as_error() {
        let mut link = LoopbackLink::default();
        let mut arbiter = Arbiter::new();

        // Fill the reply direction without draining it
        for _ in 0..(LINK_BUFFER_SIZE - 1) {
            link.send(Packet::id_please().encode()).unwrap();
        }
        assert_eq!(pump(&mut link, &mut arbiter), Ok(LINK_BUFFER_SIZE - 1));

        link.send(Packet::id_please().encode()).unwrap();
        assert_eq!(
            pump(&mut link, &mut arbiter),
            Err(PumpError::Write {
                error: LinkError::Overrun,
                written: 0,
                total: 1,
            })
        );
    }

    #[test]
    fn test_partial_flush_reports_dropped_replies() {
        let mut link = LoopbackLink::default();
        let mut arbiter = Arbiter::new();

        for _ in 0..7 {
            arbiter.dispatch(Packet::id_please());
        }
        for raw in 0..6 {
            arbiter.dispatch(Packet::request(PlaneId::new(raw).unwrap(), Operation::Takeoff));
        }

        // Leave room for two of the four diverts
        for _ in 0..(LINK_BUFFER_SIZE - 3) {
            SerialLink::write(&mut link, 0).unwrap();
        }

        link.send(Packet::declare_emergency(PlaneId::new(0).unwrap()).encode()).unwrap();
        assert_eq!(
            pump(&mut link, &mut arbiter),
            Err(PumpError::Write {
                error: LinkError::Overrun,
                written: 2,
                total: 4,
            })
        );

        // The flush itself still happened
        assert_eq!(arbiter.stats().diverts, 4);
        let delivered = link.receive_all();
        assert_eq!(
            &delivered[(LINK_BUFFER_SIZE - 3)..],
            &[
                Packet::divert(PlaneId::new(2).unwrap()).encode(),
                Packet::divert(PlaneId::new(3).unwrap()).encode(),
            ]
        );
    }
}
