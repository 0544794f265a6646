//! Pure domain logic.
//!
//! Everything here is side-effect free and unit-testable without
//! persistence:
//!
//! - `roles` - role-change permission evaluation
//! - `recurrence` - next-occurrence calculation for recurring conferences

pub mod recurrence;
pub mod roles;

pub use recurrence::next_occurrence;
pub use roles::can_change_role;
