//! # Runway Arbitration Tower
//!
//! A tower controller for a two-runway airfield, driven entirely by single
//! byte packets on a serial-style link. Planes ask for an ID, request takeoff
//! or landing, declare their runway clear, and may declare an emergency; the
//! tower answers with clearances, holds, diverts and say-agains.
//!
//! ## Features
//!
//! - **Fixed 8-bit protocol**: `[PlaneId:4][RequestType:3][ActionBit:1]`
//! - **Bounded state**: 16 plane IDs, two FIFO queues of 8, two runways
//! - **Emergency exclusivity**: one plane holds the emergency until it resolves
//! - **Alternating arbitration**: optional takeoff/landing fairness with runway closure
//! - **TCP tower service**: raw packet data port plus a JSON control channel
//!
//! ## Quick Start
//!
//! ```rust
//! use atcbus::{Arbiter, Operation, Packet, Runway};
//!
//! let mut tower = Arbiter::new();
//!
//! let replies = tower.dispatch(Packet::id_please());
//! let plane = replies[0].plane;
//!
//! let replies = tower.dispatch(Packet::request(plane, Operation::Takeoff));
//! assert_eq!(replies[0], Packet::clear(plane, Runway::Zero));
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Packet codec and the JSON control protocol
//! - [`registry`], [`runway`], [`queue`], [`emergency`] - Tower state
//! - [`arbiter`] - Request dispatch and runway arbitration
//! - [`link`] - Byte transport and the serial pump
//! - [`server`] - Tokio TCP front end
//! - [`telemetry`] - Snapshots for the control channel
//! - [`console`] - Human-readable packet rendering
//! - [`config`] - Tower configuration

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;

pub mod arbiter;
pub mod config;
pub mod console;
pub mod emergency;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod runway;
pub mod server;
pub mod telemetry;

// Re-export main public types for convenience
pub use arbiter::{Arbiter, ArbiterConfig, ControlInputs, Replies};
pub use config::TowerConfig;
pub use protocol::{Packet, PlaneId, RequestType};
pub use runway::{Operation, Runway};
pub use server::TowerServer;
pub use telemetry::TowerSnapshot;
