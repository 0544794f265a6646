//! Conference orchestrator service library.
//!
//! Owns the lifecycle of voice conferences and their participants for the
//! chat platform's conferencing subsystem: it reconciles persisted state
//! against the live telephony switch and drives the periodic maintenance
//! tasks. The HTTP/RPC request layer, the chat subsystem, and downstream
//! event consumers live elsewhere and call into [`services`].
//!
//! # Architecture
//!
//! Commands and switch events mutate the same rows through the same
//! guarded transitions:
//!
//! ```text
//! request layer -> services -> repositories
//! switch events -> reconciler -> repositories
//! tasks (monitor/janitor/schedulers) -> repositories
//! every transition -> events (publisher boundary)
//! ```
//!
//! # Modules
//!
//! - `config` - service configuration from environment
//! - `domain` - pure role and recurrence logic
//! - `errors` - error types
//! - `events` - domain events and the publisher boundary
//! - `models` - row structs and status enums
//! - `reconciler` - switch-event state machine and end-of-conference
//!   evaluation
//! - `repositories` - guarded, atomic database operations
//! - `services` - operations invoked by the request layer
//! - `tasks` - cancellable periodic maintenance loops

#![warn(clippy::pedantic)]

pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod models;
pub mod observability;
pub mod reconciler;
pub mod repositories;
pub mod services;
pub mod tasks;
