//! Conferences repository for database operations.
//!
//! Lifecycle transitions are guarded single-statement updates: ending an
//! already-ended conference matches zero rows and returns `None`, which
//! callers treat as "already done". `started_at`/`ended_at` always move in
//! the same statement as `status`, so a crash can never leave the pair
//! half-written.

use crate::errors::ConferenceError;
use crate::models::{ConferenceRow, EventType};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Everything needed to create a conference.
#[derive(Debug, Clone)]
pub struct NewConference {
    /// Human-readable name.
    pub name: String,
    /// Parent chat, when started from one.
    pub chat_id: Option<Uuid>,
    /// Conference kind; decides the initial status.
    pub event_type: EventType,
    /// Member limit.
    pub max_members: i32,
    /// Invitation-only flag.
    pub is_private: bool,
    /// Start time; required for scheduled/recurring kinds.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Series link for generated recurring instances.
    pub series_id: Option<Uuid>,
}

/// Conferences repository for database operations.
pub struct ConferencesRepository;

impl ConferencesRepository {
    /// Insert a conference.
    ///
    /// Ad-hoc kinds are born `active` with `started_at` set so the
    /// empty-conference grace period covers a create-that-nobody-joins;
    /// scheduled kinds are born `scheduled` and activated by the first
    /// join. The switch bridge name is derived from the id.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.create_conference")]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        new: &NewConference,
    ) -> Result<ConferenceRow, ConferenceError> {
        let start = Instant::now();
        let conference_id = Uuid::new_v4();
        let switch_name = format!("conf-{conference_id}");
        let active = !new.event_type.is_scheduled_kind();

        let row = sqlx::query_as::<_, ConferenceRow>(
            r#"
            INSERT INTO conferences (
                conference_id, name, chat_id, event_type, status, switch_name,
                max_members, is_private, series_id, scheduled_at, started_at
            )
            VALUES (
                $1, $2, $3, $4,
                CASE WHEN $5 THEN 'active' ELSE 'scheduled' END,
                $6, $7, $8, $9, $10,
                CASE WHEN $5 THEN NOW() ELSE NULL END
            )
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(&new.name)
        .bind(new.chat_id)
        .bind(new.event_type.as_str())
        .bind(active)
        .bind(&switch_name)
        .bind(new.max_members)
        .bind(new.is_private)
        .bind(new.series_id)
        .bind(new.scheduled_at)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("create_conference", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("create_conference", "success", start.elapsed());
        Ok(row)
    }

    /// Fetch a conference by id.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_conference", fields(conference_id = %conference_id))]
    pub async fn get(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            "SELECT * FROM conferences WHERE conference_id = $1",
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Resolve a conference by its switch bridge name.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_by_switch_name", fields(switch_name = %switch_name))]
    pub async fn get_by_switch_name(
        executor: impl PgExecutor<'_>,
        switch_name: &str,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            "SELECT * FROM conferences WHERE switch_name = $1",
        )
        .bind(switch_name)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Activate a scheduled conference (first real activity).
    ///
    /// Returns `None` when the conference was already active or ended; the
    /// caller treats that as a no-op, not a failure.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.activate_conference", fields(conference_id = %conference_id))]
    pub async fn activate(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            r#"
            UPDATE conferences
            SET status = 'active', started_at = COALESCE(started_at, NOW()), updated_at = NOW()
            WHERE conference_id = $1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// End a conference.
    ///
    /// Idempotent by construction: the `status <> 'ended'` precondition
    /// means exactly one of any number of racing writers gets the row back;
    /// the rest get `None` and must not emit `conference.ended`.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.end_conference", fields(conference_id = %conference_id))]
    pub async fn end(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let start = Instant::now();

        let row = sqlx::query_as::<_, ConferenceRow>(
            r#"
            UPDATE conferences
            SET status = 'ended',
                ended_at = NOW(),
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE conference_id = $1 AND status <> 'ended'
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("end_conference", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("end_conference", "success", start.elapsed());
        Ok(row)
    }

    /// List all active conferences.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.list_active")]
    pub async fn list_active(
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<ConferenceRow>, ConferenceError> {
        let rows = sqlx::query_as::<_, ConferenceRow>(
            "SELECT * FROM conferences WHERE status = 'active' ORDER BY started_at ASC",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// List active conferences running longer than `max_age_hours`.
    ///
    /// The janitor ends each through [`ConferencesRepository::end`] so the
    /// usual guard and event emission apply per conference.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.list_stale_active")]
    pub async fn list_stale_active(
        executor: impl PgExecutor<'_>,
        max_age_hours: i64,
    ) -> Result<Vec<ConferenceRow>, ConferenceError> {
        let rows = sqlx::query_as::<_, ConferenceRow>(
            r#"
            SELECT * FROM conferences
            WHERE status = 'active'
              AND started_at < NOW() - ($1 || ' hours')::INTERVAL
            ORDER BY started_at ASC
            "#,
        )
        .bind(max_age_hours.to_string())
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Recompute the RSVP counters from the participant rows.
    ///
    /// Must run on the same transaction as the participant write that made
    /// them stale; the single statement keeps counter and rows consistent
    /// under concurrent RSVP updates.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.recompute_rsvp_counters", fields(conference_id = %conference_id))]
    pub async fn recompute_rsvp_counters(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            r#"
            UPDATE conferences
            SET accepted_count = (
                    SELECT COUNT(*) FROM participants
                    WHERE conference_id = $1 AND rsvp_status = 'accepted'
                ),
                declined_count = (
                    SELECT COUNT(*) FROM participants
                    WHERE conference_id = $1 AND rsvp_status = 'declined'
                ),
                updated_at = NOW()
            WHERE conference_id = $1
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Remove a not-yet-started conference (cancellation).
    ///
    /// Active or ended conferences are not cancellable; callers end active
    /// ones instead. Children cascade-delete.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.delete_scheduled", fields(conference_id = %conference_id))]
    pub async fn delete_scheduled(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            "DELETE FROM conferences WHERE conference_id = $1 AND status = 'scheduled' RETURNING *",
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Remove every not-yet-started instance of a series, including the
    /// defining conference itself when it has not started.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.delete_series", fields(series_id = %series_id))]
    pub async fn delete_series(
        executor: impl PgExecutor<'_>,
        series_id: Uuid,
    ) -> Result<Vec<ConferenceRow>, ConferenceError> {
        let rows = sqlx::query_as::<_, ConferenceRow>(
            r#"
            DELETE FROM conferences
            WHERE (series_id = $1 OR conference_id = $1) AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(series_id)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// Record where a recording landed. Write-once: a second write is a
    /// no-op returning `None`.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.set_recording_path", fields(conference_id = %conference_id))]
    pub async fn set_recording_path(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        recording_path: &str,
    ) -> Result<Option<ConferenceRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ConferenceRow>(
            r#"
            UPDATE conferences
            SET recording_path = $2, updated_at = NOW()
            WHERE conference_id = $1 AND recording_path IS NULL
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(recording_path)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::ConferenceStatus;

    #[test]
    fn test_new_conference_kind_decides_activation() {
        // Ad-hoc kinds skip the scheduled state entirely.
        assert!(!EventType::Adhoc.is_scheduled_kind());
        assert!(!EventType::AdhocChat.is_scheduled_kind());
        assert!(EventType::Scheduled.is_scheduled_kind());
    }

    #[test]
    fn test_status_literals_match_model() {
        // The SQL literals above must stay in lockstep with the enum.
        assert_eq!(ConferenceStatus::Scheduled.as_str(), "scheduled");
        assert_eq!(ConferenceStatus::Active.as_str(), "active");
        assert_eq!(ConferenceStatus::Ended.as_str(), "ended");
    }
}
