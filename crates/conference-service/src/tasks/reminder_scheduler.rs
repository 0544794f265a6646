//! Reminder scheduler background task.
//!
//! Each tick fetches unsent due reminders for conferences still in
//! `scheduled`, publishes `conference.reminder` for each, and flips the
//! sent flag only after a successful publish. A failed publish leaves the
//! reminder unsent for retry on the next tick: delivery is at-least-once,
//! and a crash between publish and flag write may duplicate - accepted.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the
//! token is cancelled, the task completes its current iteration and exits
//! cleanly.

use crate::events::{DomainEvent, EventPublisher};
use crate::observability::metrics;
use crate::repositories::{ConferencesRepository, RemindersRepository};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Start the reminder scheduler background task.
#[instrument(skip_all, name = "conf.task.reminder_scheduler")]
pub async fn start_reminder_scheduler(
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "conf.task.reminder_scheduler",
        interval_secs = interval.as_secs(),
        "Starting reminder scheduler"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_reminder_dispatch(&pool, publisher.as_ref()).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "conf.task.reminder_scheduler",
                    "Reminder scheduler received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "conf.task.reminder_scheduler", "Reminder scheduler stopped");
}

/// Run a single dispatch iteration.
///
/// Separated from the main loop to allow direct testing.
pub(crate) async fn run_reminder_dispatch(pool: &PgPool, publisher: &dyn EventPublisher) {
    let pending = match RemindersRepository::get_pending(pool, chrono::Utc::now()).await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::error!(
                target: "conf.task.reminder_scheduler",
                error = %e,
                "Failed to fetch pending reminders"
            );
            return;
        }
    };

    for reminder in pending {
        let conference = match ConferencesRepository::get(pool, reminder.conference_id).await {
            Ok(Some(conference)) => conference,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(
                    target: "conf.task.reminder_scheduler",
                    reminder_id = %reminder.reminder_id,
                    error = %e,
                    "Failed to load conference for reminder"
                );
                continue;
            }
        };

        // Publish first, then flip the flag: an unpublished reminder must
        // stay unsent so the next tick retries it.
        let event = DomainEvent::Reminder {
            conference,
            reminder: reminder.clone(),
        };
        if let Err(e) = publisher.publish(&event).await {
            warn!(
                target: "conf.task.reminder_scheduler",
                reminder_id = %reminder.reminder_id,
                error = %e,
                "Failed to publish reminder, leaving unsent for retry"
            );
            continue;
        }

        match RemindersRepository::mark_sent(pool, reminder.reminder_id).await {
            Ok(true) => {
                metrics::record_reminder_sent();
                info!(
                    target: "conf.task.reminder_scheduler",
                    reminder_id = %reminder.reminder_id,
                    conference_id = %reminder.conference_id,
                    user_id = %reminder.user_id,
                    "Reminder dispatched"
                );
            }
            Ok(false) => {
                // Another dispatcher won; the duplicate publish is the
                // accepted at-least-once cost.
            }
            Err(e) => {
                tracing::error!(
                    target: "conf.task.reminder_scheduler",
                    reminder_id = %reminder.reminder_id,
                    error = %e,
                    "Published reminder but failed to mark it sent"
                );
            }
        }
    }
}
