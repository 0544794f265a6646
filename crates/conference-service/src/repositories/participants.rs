//! Participants repository for database operations.
//!
//! A participant is one logical row per (conference, user). Join flips it
//! to `connecting`, the reconciler binds it to a live channel on the
//! switch's member-add event, and any of hangup/leave/kick/sweep flips it
//! to `disconnected`. All transitions are guarded single statements.

use crate::errors::ConferenceError;
use crate::models::{ParticipantRole, ParticipantRow, RsvpStatus};
use crate::observability::metrics;
use sqlx::PgExecutor;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// A flags update together with the values it replaced, so the reconciler
/// can emit change events only for flags that actually moved.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FlagsUpdate {
    /// Post-update participant state.
    #[sqlx(flatten)]
    pub participant: ParticipantRow,
    /// Mute flag before the update.
    pub was_muted: bool,
    /// Speaking flag before the update.
    pub was_speaking: bool,
}

/// Participants repository for database operations.
pub struct ParticipantsRepository;

impl ParticipantsRepository {
    /// Insert an invited participant.
    ///
    /// Invited rows are `disconnected` with no `joined_at`, so they never
    /// count as active. Re-inviting an existing user is a no-op returning
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.insert_invited", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn insert_invited(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            INSERT INTO participants (conference_id, user_id, status, role)
            VALUES ($1, $2, 'disconnected', $3)
            ON CONFLICT (conference_id, user_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Begin a join: insert or revive the row as `connecting`, capacity
    /// permitting.
    ///
    /// The live count and the insert share one statement, so two racing
    /// joins cannot both squeeze past the member limit. A rejoin revives
    /// the user's existing `disconnected` row and clears its old channel
    /// binding. Returns `None` when the row was not created or revived -
    /// either the conference is full or the user is already live; callers
    /// disambiguate with [`ParticipantsRepository::find_live`].
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.begin_join", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn begin_join(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let start = Instant::now();

        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            WITH live AS (
                SELECT COUNT(*) AS cnt FROM participants
                WHERE conference_id = $1 AND status <> 'disconnected'
            )
            INSERT INTO participants (conference_id, user_id, status, role)
            SELECT $1, $2, 'connecting', $3
            FROM live, conferences c
            WHERE c.conference_id = $1 AND live.cnt < c.max_members
            ON CONFLICT (conference_id, user_id) DO UPDATE
            SET status = 'connecting',
                channel_uuid = NULL,
                fs_member_id = NULL,
                left_at = NULL,
                updated_at = NOW()
            WHERE participants.status = 'disconnected'
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("begin_join", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("begin_join", "success", start.elapsed());
        Ok(row)
    }

    /// Fetch a participant by id.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_participant", fields(participant_id = %participant_id))]
    pub async fn get(
        executor: impl PgExecutor<'_>,
        participant_id: Uuid,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM participants WHERE participant_id = $1",
        )
        .bind(participant_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Fetch a user's row in a conference, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_by_user", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn get_by_user(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM participants WHERE conference_id = $1 AND user_id = $2",
        )
        .bind(conference_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Fetch a user's live (not disconnected) row in a conference.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.find_live", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn find_live(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT * FROM participants
            WHERE conference_id = $1 AND user_id = $2 AND status <> 'disconnected'
            "#,
        )
        .bind(conference_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Count participants not in `disconnected` for a conference.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.active_count", fields(conference_id = %conference_id))]
    pub async fn active_count(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<i64, ConferenceError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM participants WHERE conference_id = $1 AND status <> 'disconnected'",
        )
        .bind(conference_id)
        .fetch_one(executor)
        .await?;
        Ok(count.0)
    }

    /// Bind a real switch channel to the oldest pending `connecting`
    /// participant of a conference (FIFO association heuristic).
    ///
    /// Best-effort by design: two users joining near-simultaneously may get
    /// their channels cross-bound; disambiguating would need a correlation
    /// token echoed through the switch, which the event carries no field
    /// for today. `SKIP LOCKED` keeps concurrent member-add events from
    /// picking the same row, and the `NOT EXISTS` guard makes redelivery
    /// of the same event a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.bind_channel", fields(conference_id = %conference_id, channel_uuid = %channel_uuid))]
    pub async fn bind_channel(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        channel_uuid: &str,
        fs_member_id: &str,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let start = Instant::now();

        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET channel_uuid = $2,
                fs_member_id = $3,
                status = 'connected',
                joined_at = NOW(),
                updated_at = NOW()
            WHERE participant_id = (
                SELECT participant_id FROM participants
                WHERE conference_id = $1
                  AND status = 'connecting'
                  AND channel_uuid IS NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM participants bound WHERE bound.channel_uuid = $2
                  )
                ORDER BY updated_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(channel_uuid)
        .bind(fs_member_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("bind_channel", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("bind_channel", "success", start.elapsed());
        Ok(row)
    }

    /// Disconnect the participant bound to a channel.
    ///
    /// `None` when no participant owns the channel (a leg that never got
    /// associated) or it is already disconnected - both are no-ops for the
    /// reconciler.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.disconnect_by_channel", fields(channel_uuid = %channel_uuid))]
    pub async fn disconnect_by_channel(
        executor: impl PgExecutor<'_>,
        channel_uuid: &str,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET status = 'disconnected', left_at = NOW(), updated_at = NOW()
            WHERE channel_uuid = $1 AND status <> 'disconnected'
            RETURNING *
            "#,
        )
        .bind(channel_uuid)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Disconnect a participant by id (leave and kick paths).
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.disconnect", fields(participant_id = %participant_id))]
    pub async fn disconnect(
        executor: impl PgExecutor<'_>,
        participant_id: Uuid,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET status = 'disconnected', left_at = NOW(), updated_at = NOW()
            WHERE participant_id = $1 AND status <> 'disconnected'
            RETURNING *
            "#,
        )
        .bind(participant_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Disconnect every remaining live participant of a conference.
    ///
    /// Runs after the conference itself reaches `ended`, so rows the
    /// switch never sent hangups for (the switch-empty ending path) do
    /// not linger as connected.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.disconnect_all", fields(conference_id = %conference_id))]
    pub async fn disconnect_all_for_conference(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<u64, ConferenceError> {
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET status = 'disconnected', left_at = NOW(), updated_at = NOW()
            WHERE conference_id = $1 AND status <> 'disconnected'
            "#,
        )
        .bind(conference_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Force-disconnect participants stuck in `connecting` longer than
    /// `timeout_seconds`. Returns the number of rows repaired.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.cleanup_stale_connecting")]
    pub async fn cleanup_stale_connecting(
        executor: impl PgExecutor<'_>,
        timeout_seconds: i64,
    ) -> Result<u64, ConferenceError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE participants
            SET status = 'disconnected', left_at = NOW(), updated_at = NOW()
            WHERE status = 'connecting'
              AND updated_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(timeout_seconds.to_string())
        .execute(executor)
        .await
        .map_err(|e| {
            metrics::record_db_query("cleanup_stale_connecting", "error", start.elapsed());
            ConferenceError::Database(e.to_string())
        })?;

        metrics::record_db_query("cleanup_stale_connecting", "success", start.elapsed());
        Ok(result.rows_affected())
    }

    /// Apply switch-reported flags to the participant on a channel,
    /// returning the previous mute/speaking values alongside the new row.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.update_flags", fields(channel_uuid = %channel_uuid))]
    pub async fn update_flags(
        executor: impl PgExecutor<'_>,
        channel_uuid: &str,
        muted: bool,
        deafened: bool,
        speaking: bool,
    ) -> Result<Option<FlagsUpdate>, ConferenceError> {
        let row = sqlx::query_as::<_, FlagsUpdate>(
            r#"
            UPDATE participants p
            SET is_muted = $2, is_deaf = $3, is_speaking = $4, updated_at = NOW()
            FROM (
                SELECT participant_id, is_muted AS was_muted, is_speaking AS was_speaking
                FROM participants WHERE channel_uuid = $1
            ) before
            WHERE p.participant_id = before.participant_id
            RETURNING p.*, before.was_muted, before.was_speaking
            "#,
        )
        .bind(channel_uuid)
        .bind(muted)
        .bind(deafened)
        .bind(speaking)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Set the mute flag (moderator command path). `None` when the flag
    /// already had that value, so callers skip the event.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.set_muted", fields(participant_id = %participant_id))]
    pub async fn set_muted(
        executor: impl PgExecutor<'_>,
        participant_id: Uuid,
        muted: bool,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET is_muted = $2, updated_at = NOW()
            WHERE participant_id = $1 AND is_muted IS DISTINCT FROM $2
            RETURNING *
            "#,
        )
        .bind(participant_id)
        .bind(muted)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Change a participant's role. Permission checking is the caller's
    /// job; this is the bare write.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.update_role", fields(participant_id = %participant_id))]
    pub async fn update_role(
        executor: impl PgExecutor<'_>,
        participant_id: Uuid,
        role: ParticipantRole,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET role = $2, updated_at = NOW()
            WHERE participant_id = $1
            RETURNING *
            "#,
        )
        .bind(participant_id)
        .bind(role.as_str())
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Record an RSVP answer. Callers recompute the conference counters on
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.update_rsvp", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn update_rsvp(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
        rsvp_status: RsvpStatus,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            UPDATE participants
            SET rsvp_status = $3, updated_at = NOW()
            WHERE conference_id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(user_id)
        .bind(rsvp_status.as_str())
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// Remove a participant row entirely (un-invite). Callers recompute
    /// the conference counters on the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.remove", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn remove(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRow>, ConferenceError> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "DELETE FROM participants WHERE conference_id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(conference_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }
}
