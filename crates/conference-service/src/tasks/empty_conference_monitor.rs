//! Empty-conference monitor background task.
//!
//! Two independent sweeps per tick:
//! 1. Force-disconnect participants stuck in `connecting` past the connect
//!    timeout (joins that never produced a real channel)
//! 2. End active conferences observed empty longer than the grace period,
//!    by database count or - when the database still counts someone - by a
//!    live switch membership query
//!
//! The grace period exists to avoid ending a conference in the window
//! between a join command and its real channel being established.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the
//! token is cancelled, the task completes its current iteration and exits
//! cleanly.

use crate::events::EventPublisher;
use crate::observability::metrics;
use crate::reconciler;
use crate::repositories::{ConferencesRepository, ParticipantsRepository};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use switch_events::SwitchClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Configuration for the empty-conference monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sweep interval.
    pub interval: Duration,
    /// How long a participant may sit in `connecting`.
    pub connect_timeout: Duration,
    /// How long an active conference may be observed empty.
    pub empty_timeout: Duration,
    /// Deadline for the live switch membership query.
    pub switch_query_timeout: Duration,
}

/// Start the empty-conference monitor background task.
///
/// Runs both sweeps every `interval` until the cancellation token fires.
#[instrument(skip_all, name = "conf.task.empty_monitor")]
pub async fn start_empty_conference_monitor(
    pool: PgPool,
    switch: Arc<dyn SwitchClient>,
    publisher: Arc<dyn EventPublisher>,
    config: MonitorConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "conf.task.empty_monitor",
        interval_secs = config.interval.as_secs(),
        connect_timeout_secs = config.connect_timeout.as_secs(),
        empty_timeout_secs = config.empty_timeout.as_secs(),
        "Starting empty-conference monitor"
    );

    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_monitor_sweep(&pool, switch.as_ref(), publisher.as_ref(), &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "conf.task.empty_monitor",
                    "Empty-conference monitor received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "conf.task.empty_monitor", "Empty-conference monitor stopped");
}

/// Run a single monitor iteration.
///
/// Separated from the main loop to allow direct testing.
pub(crate) async fn run_monitor_sweep(
    pool: &PgPool,
    switch: &dyn SwitchClient,
    publisher: &dyn EventPublisher,
    config: &MonitorConfig,
) {
    // Sweep 1: repair joins that never became real channels.
    let connect_timeout_secs = i64::try_from(config.connect_timeout.as_secs()).unwrap_or(i64::MAX);
    match ParticipantsRepository::cleanup_stale_connecting(pool, connect_timeout_secs).await {
        Ok(count) if count > 0 => {
            metrics::record_stale_connecting_cleaned(count);
            warn!(
                target: "conf.task.empty_monitor",
                stale_count = count,
                connect_timeout_secs,
                "Force-disconnected stale connecting participants"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(
                target: "conf.task.empty_monitor",
                error = %e,
                "Failed to clean stale connecting participants"
            );
        }
    }

    // Sweep 2: end conferences empty beyond the grace period.
    let conferences = match ConferencesRepository::list_active(pool).await {
        Ok(conferences) => conferences,
        Err(e) => {
            tracing::error!(
                target: "conf.task.empty_monitor",
                error = %e,
                "Failed to list active conferences"
            );
            return;
        }
    };

    let empty_timeout_secs = i64::try_from(config.empty_timeout.as_secs()).unwrap_or(i64::MAX);
    let now = chrono::Utc::now();

    for conference in conferences {
        let Some(started_at) = conference.started_at else {
            // Active without started_at would violate the invariant; skip
            // rather than end something we cannot age.
            continue;
        };

        let running_secs = (now - started_at).num_seconds();
        if running_secs < empty_timeout_secs {
            continue;
        }

        match reconciler::evaluate_conference_end(
            pool,
            switch,
            publisher,
            config.switch_query_timeout,
            &conference,
        )
        .await
        {
            Ok(true) => {
                info!(
                    target: "conf.task.empty_monitor",
                    conference_id = %conference.conference_id,
                    running_secs,
                    "Ended empty conference past grace period"
                );
            }
            Ok(false) => {}
            Err(e) => {
                // One conference's failure must not halt the sweep.
                tracing::error!(
                    target: "conf.task.empty_monitor",
                    conference_id = %conference.conference_id,
                    error = %e,
                    "Failed to evaluate conference for ending"
                );
            }
        }
    }
}


/// Integration tests for the monitor requiring a database.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod integration_tests {
    use super::*;
    use crate::events::mock::RecordingPublisher;
    use crate::models::{ConferenceRow, EventType, ParticipantRole};
    use crate::repositories::NewConference;
    use switch_events::client::mock::MockSwitchClient;
    use uuid::Uuid;

    fn config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(120),
            empty_timeout: Duration::from_secs(120),
            switch_query_timeout: Duration::from_secs(1),
        }
    }

    async fn adhoc_conference(pool: &PgPool) -> ConferenceRow {
        ConferencesRepository::create(
            pool,
            &NewConference {
                name: "Monitor test".to_string(),
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

    async fn backdate_started_at(pool: &PgPool, conference_id: Uuid, minutes: i32) {
        sqlx::query(
            "UPDATE conferences SET started_at = NOW() - ($2 || ' minutes')::INTERVAL WHERE conference_id = $1",
        )
        .bind(conference_id)
        .bind(minutes.to_string())
        .execute(pool)
        .await
        .expect("Failed to backdate conference");
    }

    async fn connected_participant(pool: &PgPool, conference_id: Uuid, channel: &str) {
        let user_id = Uuid::new_v4();
        ParticipantsRepository::begin_join(
            pool,
            conference_id,
            user_id,
            ParticipantRole::Participant,
        )
        .await
        .expect("Failed to begin join")
        .expect("Join should create a row");
        ParticipantsRepository::bind_channel(pool, conference_id, channel, "1")
            .await
            .expect("Failed to bind channel")
            .expect("Bind should match the connecting row");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_stale_connecting_participants_are_cleaned(pool: PgPool) {
        let conference = adhoc_conference(&pool).await;
        let user_id = Uuid::new_v4();
        ParticipantsRepository::begin_join(
            &pool,
            conference.conference_id,
            user_id,
            ParticipantRole::Participant,
        )
        .await
        .expect("Failed to begin join")
        .expect("Join should create a row");

        // Stuck in connecting for 10 minutes.
        sqlx::query(
            "UPDATE participants SET updated_at = NOW() - INTERVAL '10 minutes' WHERE conference_id = $1",
        )
        .bind(conference.conference_id)
        .execute(&pool)
        .await
        .expect("Failed to backdate participant");

        let switch = MockSwitchClient::connected();
        let publisher = RecordingPublisher::new();
        run_monitor_sweep(&pool, &switch, &publisher, &config()).await;

        let participant = ParticipantsRepository::get_by_user(
            &pool,
            conference.conference_id,
            user_id,
        )
        .await
        .expect("Failed to fetch participant")
        .expect("Participant should still exist");
        assert_eq!(participant.status, "disconnected");

        // Never counted as active again.
        let count = ParticipantsRepository::active_count(&pool, conference.conference_id)
            .await
            .expect("Failed to count");
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_empty_conference_past_grace_is_ended(pool: PgPool) {
        let conference = adhoc_conference(&pool).await;
        backdate_started_at(&pool, conference.conference_id, 10).await;

        let switch = MockSwitchClient::connected();
        let publisher = RecordingPublisher::new();
        run_monitor_sweep(&pool, &switch, &publisher, &config()).await;

        let ended = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(ended.status, "ended");
        assert!(ended.ended_at.is_some());
        assert_eq!(publisher.count_of("conference.ended"), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_empty_conference_within_grace_is_kept(pool: PgPool) {
        // Freshly created and empty: inside the grace window.
        let conference = adhoc_conference(&pool).await;

        let switch = MockSwitchClient::connected();
        let publisher = RecordingPublisher::new();
        run_monitor_sweep(&pool, &switch, &publisher, &config()).await;

        let row = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(row.status, "active");
        assert_eq!(publisher.count_of("conference.ended"), 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_db_populated_but_switch_empty_is_ended(pool: PgPool) {
        let conference = adhoc_conference(&pool).await;
        connected_participant(&pool, conference.conference_id, "chan-zombie").await;
        backdate_started_at(&pool, conference.conference_id, 10).await;

        // Switch reachable and reports nobody in the bridge.
        let switch = MockSwitchClient::connected();
        let publisher = RecordingPublisher::new();
        run_monitor_sweep(&pool, &switch, &publisher, &config()).await;

        let row = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(row.status, "ended");
        assert_eq!(publisher.count_of("conference.ended"), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_switch_unavailable_defers_to_database(pool: PgPool) {
        let conference = adhoc_conference(&pool).await;
        connected_participant(&pool, conference.conference_id, "chan-live").await;
        backdate_started_at(&pool, conference.conference_id, 10).await;

        // Switch down: database still counts someone, so the conference
        // stays up rather than being ended on missing information.
        let switch = MockSwitchClient::disconnected();
        let publisher = RecordingPublisher::new();
        run_monitor_sweep(&pool, &switch, &publisher, &config()).await;

        let row = ConferencesRepository::get(&pool, conference.conference_id)
            .await
            .expect("Failed to fetch conference")
            .expect("Conference should exist");
        assert_eq!(row.status, "active");
        assert_eq!(publisher.count_of("conference.ended"), 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_monitor_starts_and_stops(pool: PgPool) {
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();

        let switch: Arc<dyn SwitchClient> = Arc::new(MockSwitchClient::connected());
        let publisher: Arc<dyn EventPublisher> = Arc::new(RecordingPublisher::new());

        let mut test_config = config();
        test_config.interval = Duration::from_secs(1);

        let handle = tokio::spawn(start_empty_conference_monitor(
            pool,
            switch,
            publisher,
            test_config,
            cancel_token,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_clone.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(
            result.is_ok(),
            "Monitor should stop within 2 seconds after cancellation"
        );
        result.unwrap().expect("Task should not panic");
    }
}
