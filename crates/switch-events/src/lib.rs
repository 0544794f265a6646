//! Telephony switch event protocol for the conference orchestrator.
//!
//! The orchestrator is a pure consumer of switch-originated events plus an
//! occasional active membership query. This crate holds everything that
//! crosses that boundary and nothing else:
//!
//! - `events` - typed event enum and parsing from the switch's flat
//!   string-keyed header maps
//! - `client` - the [`client::SwitchClient`] trait the orchestrator consumes,
//!   plus a scriptable mock for tests
//! - `tcp` - event-socket client implementation (newline-delimited JSON)
//!
//! No database or business logic lives here.

#![warn(clippy::pedantic)]

pub mod client;
pub mod errors;
pub mod events;
pub mod tcp;

pub use client::SwitchClient;
pub use errors::SwitchError;
pub use events::{SwitchEvent, SwitchEventType};
