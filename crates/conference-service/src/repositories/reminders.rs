//! Reminders repository for database operations.
//!
//! Reminders are created once per participant at conference-schedule time
//! and fire at most once; `mark_sent` is guarded on `sent = FALSE` so a
//! racing duplicate dispatch cannot flip the flag twice.

use crate::errors::ConferenceError;
use crate::models::ReminderRow;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Reminders repository for database operations.
pub struct RemindersRepository;

impl RemindersRepository {
    /// Create one reminder per user for a freshly scheduled conference.
    ///
    /// `remind_at` is computed by the caller as scheduled time minus the
    /// lead. Returns the number of reminders created.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.create_reminders", fields(conference_id = %conference_id))]
    pub async fn create_for_participants(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_ids: &[Uuid],
        remind_at: DateTime<Utc>,
        minutes_before: i32,
    ) -> Result<u64, ConferenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reminders (conference_id, user_id, remind_at, minutes_before)
            SELECT $1, unnest($2::uuid[]), $3, $4
            "#,
        )
        .bind(conference_id)
        .bind(user_ids)
        .bind(remind_at)
        .bind(minutes_before)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fetch unsent reminders that are due, for conferences still in
    /// `scheduled` - a conference that started early or was ended does not
    /// get reminded about.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_pending_reminders")]
    pub async fn get_pending(
        executor: impl PgExecutor<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderRow>, ConferenceError> {
        let start = Instant::now();

        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT r.* FROM reminders r
            JOIN conferences c ON c.conference_id = r.conference_id
            WHERE r.sent = FALSE
              AND r.remind_at <= $1
              AND c.status = 'scheduled'
            ORDER BY r.remind_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("get_pending_reminders", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("get_pending_reminders", "success", start.elapsed());
        Ok(rows)
    }

    /// Flip a reminder to sent. Returns `false` when it was already sent
    /// (another dispatcher won the race).
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.mark_reminder_sent", fields(reminder_id = %reminder_id))]
    pub async fn mark_sent(
        executor: impl PgExecutor<'_>,
        reminder_id: Uuid,
    ) -> Result<bool, ConferenceError> {
        let result = sqlx::query(
            r#"
            UPDATE reminders
            SET sent = TRUE, sent_at = NOW()
            WHERE reminder_id = $1 AND sent = FALSE
            "#,
        )
        .bind(reminder_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
