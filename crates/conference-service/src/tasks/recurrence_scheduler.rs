//! Recurrence scheduler background task.
//!
//! Walks the recurring definitions each tick and computes the next
//! occurrence past the series' current horizon. Instance creation is an
//! open design item: whether participants and their RSVP state copy
//! forward into generated instances is undecided, so this task computes
//! and logs what it would generate without writing it.

use crate::domain::next_occurrence;
use crate::repositories::RecurrenceRulesRepository;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Start the recurrence scheduler background task.
#[instrument(skip_all, name = "conf.task.recurrence_scheduler")]
pub async fn start_recurrence_scheduler(
    pool: PgPool,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "conf.task.recurrence_scheduler",
        interval_secs = interval.as_secs(),
        "Starting recurrence scheduler"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_recurrence_tick(&pool).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "conf.task.recurrence_scheduler",
                    "Recurrence scheduler received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "conf.task.recurrence_scheduler", "Recurrence scheduler stopped");
}

/// Run a single scheduler iteration.
///
/// Separated from the main loop to allow direct testing.
pub(crate) async fn run_recurrence_tick(pool: &PgPool) {
    let definitions = match RecurrenceRulesRepository::list_definitions(pool).await {
        Ok(definitions) => definitions,
        Err(e) => {
            tracing::error!(
                target: "conf.task.recurrence_scheduler",
                error = %e,
                "Failed to list recurring definitions"
            );
            return;
        }
    };

    let now = chrono::Utc::now();

    for definition in definitions {
        let series_id = definition.series_anchor();

        if let Some(limit) = definition.rule.occurrence_count {
            match RecurrenceRulesRepository::series_count(pool, series_id).await {
                Ok(count) if count >= i64::from(limit) => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        target: "conf.task.recurrence_scheduler",
                        series_id = %series_id,
                        error = %e,
                        "Failed to count series instances"
                    );
                    continue;
                }
            }
        }

        // Anchor on the furthest-out instance already generated, the
        // defining schedule, or now - whichever is latest.
        let horizon = match RecurrenceRulesRepository::series_horizon(pool, series_id).await {
            Ok(horizon) => horizon,
            Err(e) => {
                tracing::error!(
                    target: "conf.task.recurrence_scheduler",
                    series_id = %series_id,
                    error = %e,
                    "Failed to compute series horizon"
                );
                continue;
            }
        };
        let anchor = [horizon, definition.scheduled_at, Some(now)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(now);

        let Some(next) = next_occurrence(&definition.rule, anchor) else {
            continue;
        };

        // TODO: create the instance (copy of the defining conference with
        // scheduled_at = next, series_id = anchor) once it is decided
        // whether participants and RSVP state carry over per instance.
        debug!(
            target: "conf.task.recurrence_scheduler",
            conference_id = %definition.rule.conference_id,
            series_id = %series_id,
            next_occurrence = %next,
            "Next occurrence computed, instance generation pending design"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_token_stops_task() {
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        assert!(cancel_token.is_cancelled());
    }
}

/// Integration tests for the recurrence scheduler requiring a database.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod integration_tests {
    use super::*;
    use crate::models::{EventType, RecurrenceFrequency};
    use crate::repositories::{ConferencesRepository, NewConference, NewRecurrenceRule};
    use chrono::{Duration as ChronoDuration, Utc};

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_tick_computes_but_does_not_generate(pool: PgPool) {
        let conference = ConferencesRepository::create(
            &pool,
            &NewConference {
                name: "Weekly sync".to_string(),
                chat_id: None,
                event_type: EventType::Recurring,
                max_members: 10,
                is_private: false,
                scheduled_at: Some(Utc::now() + ChronoDuration::hours(1)),
                series_id: None,
            },
        )
        .await
        .expect("Failed to create conference");

        RecurrenceRulesRepository::create(
            &pool,
            conference.conference_id,
            &NewRecurrenceRule {
                frequency: RecurrenceFrequency::Weekly,
                days_of_week: vec![0, 2],
                day_of_month: None,
                until: None,
                occurrence_count: None,
            },
        )
        .await
        .expect("Failed to create rule");

        run_recurrence_tick(&pool).await;

        // Instance generation is deliberately deferred: the tick must not
        // create conferences.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conferences")
            .fetch_one(&pool)
            .await
            .expect("Failed to count");
        assert_eq!(count.0, 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_scheduler_starts_and_stops(pool: PgPool) {
        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();

        let handle = tokio::spawn(start_recurrence_scheduler(
            pool,
            Duration::from_secs(1),
            cancel_token,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_clone.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(
            result.is_ok(),
            "Recurrence scheduler should stop within 2 seconds after cancellation"
        );
        result.unwrap().expect("Task should not panic");
    }
}
