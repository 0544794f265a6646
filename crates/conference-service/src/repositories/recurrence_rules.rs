//! Recurrence rules repository for database operations.

use crate::errors::ConferenceError;
use crate::models::{RecurrenceFrequency, RecurrenceRuleRow};
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::instrument;
use uuid::Uuid;

/// Everything needed to attach a recurrence rule to a conference.
#[derive(Debug, Clone)]
pub struct NewRecurrenceRule {
    /// Repeat frequency.
    pub frequency: RecurrenceFrequency,
    /// Weekday ordinals (ISO, Monday = 0) for weekly/biweekly rules.
    pub days_of_week: Vec<i16>,
    /// Day of month for monthly rules.
    pub day_of_month: Option<i16>,
    /// Exclusive upper bound for generated occurrences.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of occurrences.
    pub occurrence_count: Option<i32>,
}

/// A recurring definition with its rule, as the recurrence scheduler
/// consumes it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecurringDefinition {
    /// The rule.
    #[sqlx(flatten)]
    pub rule: RecurrenceRuleRow,
    /// The defining conference's scheduled time.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// The defining conference's series link (its own id when it has
    /// generated no instances yet).
    pub series_id: Option<Uuid>,
}

/// Recurrence rules repository for database operations.
pub struct RecurrenceRulesRepository;

impl RecurrenceRulesRepository {
    /// Attach a rule to a recurring conference.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.create_rule", fields(conference_id = %conference_id))]
    pub async fn create(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
        new: &NewRecurrenceRule,
    ) -> Result<RecurrenceRuleRow, ConferenceError> {
        let row = sqlx::query_as::<_, RecurrenceRuleRow>(
            r#"
            INSERT INTO recurrence_rules (
                conference_id, frequency, days_of_week, day_of_month, until, occurrence_count
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(conference_id)
        .bind(new.frequency.as_str())
        .bind(&new.days_of_week)
        .bind(new.day_of_month)
        .bind(new.until)
        .bind(new.occurrence_count)
        .fetch_one(executor)
        .await?;
        Ok(row)
    }

    /// Fetch the rule attached to a conference.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.get_rule", fields(conference_id = %conference_id))]
    pub async fn get_for_conference(
        executor: impl PgExecutor<'_>,
        conference_id: Uuid,
    ) -> Result<Option<RecurrenceRuleRow>, ConferenceError> {
        let row = sqlx::query_as::<_, RecurrenceRuleRow>(
            "SELECT * FROM recurrence_rules WHERE conference_id = $1",
        )
        .bind(conference_id)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    /// List every recurring definition that is not past its `until` bound,
    /// joined with its defining conference's schedule.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.list_definitions")]
    pub async fn list_definitions(
        executor: impl PgExecutor<'_>,
    ) -> Result<Vec<RecurringDefinition>, ConferenceError> {
        let rows = sqlx::query_as::<_, RecurringDefinition>(
            r#"
            SELECT r.*, c.scheduled_at, c.series_id
            FROM recurrence_rules r
            JOIN conferences c ON c.conference_id = r.conference_id
            WHERE c.event_type = 'recurring'
              AND (r.until IS NULL OR r.until > NOW())
            ORDER BY c.scheduled_at ASC
            "#,
        )
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    /// The latest scheduled time across a series, used to anchor the next
    /// occurrence computation.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.series_horizon", fields(series_id = %series_id))]
    pub async fn series_horizon(
        executor: impl PgExecutor<'_>,
        series_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ConferenceError> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MAX(scheduled_at) FROM conferences WHERE series_id = $1",
        )
        .bind(series_id)
        .fetch_one(executor)
        .await?;
        Ok(row.0)
    }

    /// Count the instances already generated for a series, for
    /// `occurrence_count` enforcement.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.repo.series_count", fields(series_id = %series_id))]
    pub async fn series_count(
        executor: impl PgExecutor<'_>,
        series_id: Uuid,
    ) -> Result<i64, ConferenceError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM conferences WHERE series_id = $1")
                .bind(series_id)
                .fetch_one(executor)
                .await?;
        Ok(count.0)
    }
}

impl RecurringDefinition {
    /// The series anchor: the explicit series id, or the defining
    /// conference itself before any instance exists.
    #[must_use]
    pub fn series_anchor(&self) -> Uuid {
        self.series_id.unwrap_or(self.rule.conference_id)
    }
}
