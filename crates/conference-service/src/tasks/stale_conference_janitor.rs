//! Stale-conference janitor background task.
//!
//! Force-ends any conference running longer than the age ceiling,
//! regardless of participant state. This is a backstop against
//! reconciliation bugs or missed switch events leaving a conference
//! active indefinitely; the monitor and reconciler should always win the
//! race in a healthy system.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the
//! token is cancelled, the task completes its current iteration and exits
//! cleanly.

use crate::events::EventPublisher;
use crate::reconciler::{self, EndReason};
use crate::repositories::ConferencesRepository;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Configuration for the stale-conference janitor.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Sweep interval.
    pub interval: Duration,
    /// Age ceiling in hours; anything running longer is force-ended.
    pub max_age_hours: u64,
}

/// Start the stale-conference janitor background task.
#[instrument(skip_all, name = "conf.task.janitor")]
pub async fn start_stale_conference_janitor(
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    config: JanitorConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "conf.task.janitor",
        interval_secs = config.interval.as_secs(),
        max_age_hours = config.max_age_hours,
        "Starting stale-conference janitor"
    );

    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_janitor_sweep(&pool, publisher.as_ref(), &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "conf.task.janitor",
                    "Stale-conference janitor received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "conf.task.janitor", "Stale-conference janitor stopped");
}

/// Run a single janitor iteration.
///
/// Separated from the main loop to allow direct testing. Conferences are
/// ended one at a time through the usual guarded transition; no lock is
/// held across the sweep.
pub(crate) async fn run_janitor_sweep(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    config: &JanitorConfig,
) {
    let max_age_hours = i64::try_from(config.max_age_hours).unwrap_or(i64::MAX);
    let stale = match ConferencesRepository::list_stale_active(pool, max_age_hours).await {
        Ok(stale) => stale,
        Err(e) => {
            tracing::error!(
                target: "conf.task.janitor",
                error = %e,
                "Failed to list stale conferences"
            );
            return;
        }
    };

    for conference in stale {
        match reconciler::end_conference(
            pool,
            publisher,
            conference.conference_id,
            EndReason::Stale,
        )
        .await
        {
            Ok(true) => {
                warn!(
                    target: "conf.task.janitor",
                    conference_id = %conference.conference_id,
                    max_age_hours = config.max_age_hours,
                    "Force-ended conference past age ceiling"
                );
            }
            Ok(false) => {
                // Someone else ended it between the list and the update.
            }
            Err(e) => {
                tracing::error!(
                    target: "conf.task.janitor",
                    conference_id = %conference.conference_id,
                    error = %e,
                    "Failed to force-end stale conference"
                );
            }
        }
    }
}


/// Integration tests for the janitor requiring a database.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod integration_tests {
    use super::*;
    use crate::events::mock::RecordingPublisher;
    use crate::models::{ConferenceRow, EventType, ParticipantRole};
    use crate::repositories::{NewConference, ParticipantsRepository};
    use uuid::Uuid;

    async fn active_conference(pool: &PgPool) -> ConferenceRow {
        ConferencesRepository::create(
            pool,
            &NewConference {
                name: "Janitor test".to_string(),
                chat_id: None,
                event_type: EventType::Adhoc,
                max_members: 10,
                is_private: false,
                scheduled_at: None,
                series_id: None,
            },
        )
        .await
        .expect("Failed to create conference")
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_abandoned_conference_is_force_ended(pool: PgPool) {
        let conference = active_conference(&pool).await;

        // Still has a "live" participant row: the janitor does not care.
        ParticipantsRepository::begin_join(
            &pool,
            conference.conference_id,
            Uuid::new_v4(),
            ParticipantRole::Participant,
        )
        .await
        .expect("Failed to begin join")
        .expect("Join should create a row");

        sqlx::query(
            "UPDATE conferences SET started_at = NOW() - INTERVAL '25 hours' WHERE conference_id = $1",
        )
        .bind(conference.conference_id)
        .execute(&pool)
        .await
        .expect("Failed to backdate conference");

        let publisher = RecordingPublisher::new();
        let config = JanitorConfig {
            interval: Duration::from_secs(300),
            max_age_hours: 24,
        };
        run_janitor_sweep(&pool, &publisher, &config).await;

        let row = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(row.status, "ended");
        assert!(row.ended_at.is_some());
        assert_eq!(publisher.count_of("conference.ended"), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_recent_conference_is_kept(pool: PgPool) {
        let conference = active_conference(&pool).await;

        let publisher = RecordingPublisher::new();
        let config = JanitorConfig {
            interval: Duration::from_secs(300),
            max_age_hours: 24,
        };
        run_janitor_sweep(&pool, &publisher, &config).await;

        let row = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(row.status, "active");
        assert_eq!(publisher.count_of("conference.ended"), 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_janitor_starts_and_stops(pool: PgPool) {
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();

        let publisher: Arc<dyn EventPublisher> = Arc::new(RecordingPublisher::new());
        let config = JanitorConfig {
            interval: Duration::from_secs(1),
            max_age_hours: 24,
        };

        let handle = tokio::spawn(start_stale_conference_janitor(
            pool,
            publisher,
            config,
            cancel_token,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_clone.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(
            result.is_ok(),
            "Janitor should stop within 2 seconds after cancellation"
        );
        result.unwrap().expect("Task should not panic");
    }
}
