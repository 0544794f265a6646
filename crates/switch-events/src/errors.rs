//! Switch client error types.

use thiserror::Error;

/// Errors surfaced by switch client implementations.
///
/// The orchestrator treats every variant as "external unavailable": callers
/// degrade to database-only decisions rather than failing the operation.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// TCP connect or socket I/O failed.
    #[error("Switch connection error: {0}")]
    Connection(String),

    /// The switch rejected our credentials.
    #[error("Switch authentication failed")]
    AuthenticationFailed,

    /// The switch sent a frame we could not understand.
    #[error("Switch protocol error: {0}")]
    Protocol(String),

    /// A query did not complete within its deadline.
    #[error("Switch query timed out")]
    Timeout,

    /// No live connection to the switch.
    #[error("Not connected to switch")]
    NotConnected,
}
