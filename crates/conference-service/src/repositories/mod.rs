//! Repositories for database operations.
//!
//! Every state transition is a single parameterized statement guarded by a
//! status precondition, so concurrent writers race safely: the losing
//! writer's statement matches zero rows and the operation reports a no-op
//! (`None` / zero count), never an error.
//!
//! Write operations accept any `PgExecutor` so services can compose them
//! into transactions; reads take the pool.

pub mod conferences;
pub mod participants;
pub mod recurrence_rules;
pub mod reminders;

pub use conferences::{ConferencesRepository, NewConference};
pub use participants::{FlagsUpdate, ParticipantsRepository};
pub use recurrence_rules::{NewRecurrenceRule, RecurrenceRulesRepository};
pub use reminders::RemindersRepository;
