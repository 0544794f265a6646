//! Service layer for the conference orchestrator.
//!
//! `conferences` holds the operations the (external) request layer invokes;
//! each validates, performs its guarded/transactional writes through the
//! repositories, and emits the corresponding domain event after commit.

pub mod conferences;

pub use conferences::{ConferenceService, CreateConference, ScheduleConference};
