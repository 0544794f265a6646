//! Conference operations invoked by the request layer.
//!
//! Events are published after the transaction commits; a failed publish is
//! logged and the committed state stands. Every role change consults the
//! permission evaluator before touching the database.

use crate::domain::can_change_role;
use crate::errors::ConferenceError;
use crate::events::{publish_best_effort, DomainEvent, EventPublisher};
use crate::models::{
    ConferenceRow, EventType, ParticipantRole, ParticipantRow, RsvpStatus,
};
use crate::reconciler::{self, EndReason};
use crate::repositories::{
    ConferencesRepository, NewConference, NewRecurrenceRule, ParticipantsRepository,
    RecurrenceRulesRepository, RemindersRepository,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use switch_events::SwitchClient;
use tracing::{info, instrument};
use uuid::Uuid;

/// Default reminder lead time in minutes.
pub const DEFAULT_REMINDER_LEAD_MINUTES: i32 = 15;

/// Minimum member limit for a conference.
pub const MIN_MAX_MEMBERS: i32 = 2;

/// Request to create an ad-hoc conference.
#[derive(Debug, Clone)]
pub struct CreateConference {
    /// Conference name.
    pub name: String,
    /// Parent chat for `adhoc_chat` conferences.
    pub chat_id: Option<Uuid>,
    /// The creating user; becomes the originator.
    pub created_by: Uuid,
    /// Member limit.
    pub max_members: i32,
    /// Invitation-only flag.
    pub is_private: bool,
}

/// Request to schedule a conference, optionally recurring.
#[derive(Debug, Clone)]
pub struct ScheduleConference {
    /// Conference name.
    pub name: String,
    /// Parent chat, when scheduled from one.
    pub chat_id: Option<Uuid>,
    /// The scheduling user; becomes the originator.
    pub created_by: Uuid,
    /// Invited users (excluding the originator).
    pub participants: Vec<Uuid>,
    /// Scheduled start.
    pub scheduled_at: DateTime<Utc>,
    /// Member limit.
    pub max_members: i32,
    /// Invitation-only flag.
    pub is_private: bool,
    /// Recurrence rule; presence makes the conference recurring.
    pub recurrence: Option<NewRecurrenceRule>,
    /// Reminder lead in minutes; defaults to 15.
    pub reminder_minutes_before: Option<i32>,
}

/// Conference orchestrator service.
///
/// Holds only the interfaces it needs; constructed once at process start
/// and shared with the request layer.
pub struct ConferenceService {
    pool: PgPool,
    switch: Arc<dyn SwitchClient>,
    publisher: Arc<dyn EventPublisher>,
    switch_query_timeout: Duration,
}

impl ConferenceService {
    /// Build the service over its dependencies.
    #[must_use]
    pub fn new(
        pool: PgPool,
        switch: Arc<dyn SwitchClient>,
        publisher: Arc<dyn EventPublisher>,
        switch_query_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            switch,
            publisher,
            switch_query_timeout,
        }
    }

    /// Create an ad-hoc conference. It is active immediately; the creator
    /// still joins like everyone else.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty name or too-small member limit,
    /// `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.create_conference")]
    pub async fn create_conference(
        &self,
        request: CreateConference,
    ) -> Result<ConferenceRow, ConferenceError> {
        validate_name_and_limit(&request.name, request.max_members)?;

        let event_type = if request.chat_id.is_some() {
            EventType::AdhocChat
        } else {
            EventType::Adhoc
        };

        let mut tx = self.pool.begin().await?;
        let conference = ConferencesRepository::create(
            &mut *tx,
            &NewConference {
                name: request.name.trim().to_string(),
                chat_id: request.chat_id,
                event_type,
                max_members: request.max_members,
                is_private: request.is_private,
                scheduled_at: None,
                series_id: None,
            },
        )
        .await?;
        ParticipantsRepository::insert_invited(
            &mut *tx,
            conference.conference_id,
            request.created_by,
            ParticipantRole::Originator,
        )
        .await?;
        tx.commit().await?;

        info!(
            target: "conf.service",
            conference_id = %conference.conference_id,
            event_type = event_type.as_str(),
            "Conference created"
        );

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ConferenceCreated {
                conference: conference.clone(),
            },
        )
        .await;

        Ok(conference)
    }

    /// Schedule a conference: conference, originator and invited rows,
    /// one reminder per participant, and the recurrence rule when given -
    /// all in one transaction.
    ///
    /// # Errors
    ///
    /// `BadRequest` for validation failures, `Database` on persistence
    /// failure.
    #[instrument(skip_all, name = "conf.service.schedule_conference")]
    pub async fn schedule_conference(
        &self,
        request: ScheduleConference,
    ) -> Result<ConferenceRow, ConferenceError> {
        validate_name_and_limit(&request.name, request.max_members)?;
        if request.scheduled_at <= Utc::now() {
            return Err(ConferenceError::BadRequest(
                "Scheduled time must be in the future".to_string(),
            ));
        }

        let event_type = if request.recurrence.is_some() {
            EventType::Recurring
        } else {
            EventType::Scheduled
        };
        let minutes_before = request
            .reminder_minutes_before
            .unwrap_or(DEFAULT_REMINDER_LEAD_MINUTES);
        if minutes_before <= 0 {
            return Err(ConferenceError::BadRequest(
                "Reminder lead must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let conference = ConferencesRepository::create(
            &mut *tx,
            &NewConference {
                name: request.name.trim().to_string(),
                chat_id: request.chat_id,
                event_type,
                max_members: request.max_members,
                is_private: request.is_private,
                scheduled_at: Some(request.scheduled_at),
                series_id: None,
            },
        )
        .await?;

        ParticipantsRepository::insert_invited(
            &mut *tx,
            conference.conference_id,
            request.created_by,
            ParticipantRole::Originator,
        )
        .await?;
        for user_id in &request.participants {
            ParticipantsRepository::insert_invited(
                &mut *tx,
                conference.conference_id,
                *user_id,
                ParticipantRole::Participant,
            )
            .await?;
        }

        if let Some(rule) = &request.recurrence {
            RecurrenceRulesRepository::create(&mut *tx, conference.conference_id, rule).await?;
        }

        let mut reminder_users = request.participants.clone();
        reminder_users.push(request.created_by);
        let remind_at = request.scheduled_at - ChronoDuration::minutes(i64::from(minutes_before));
        RemindersRepository::create_for_participants(
            &mut *tx,
            conference.conference_id,
            &reminder_users,
            remind_at,
            minutes_before,
        )
        .await?;
        tx.commit().await?;

        info!(
            target: "conf.service",
            conference_id = %conference.conference_id,
            scheduled_at = %request.scheduled_at,
            participants = reminder_users.len(),
            recurring = request.recurrence.is_some(),
            "Conference scheduled"
        );

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ConferenceScheduled {
                conference: conference.clone(),
            },
        )
        .await;

        Ok(conference)
    }

    /// Join a conference: record the intent as a `connecting` participant.
    /// The participant becomes `connected` (and `participant.joined` is
    /// emitted) only when the reconciler binds the real channel.
    ///
    /// Idempotent for an already-live participant: the existing row is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// `ConferenceNotFound`, `BadRequest` when the conference has ended,
    /// `CapacityExceeded` at the member limit, `Database` on persistence
    /// failure.
    #[instrument(skip_all, name = "conf.service.join_conference", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn join_conference(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<ParticipantRow, ConferenceError> {
        let conference = ConferencesRepository::get(&self.pool, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;
        if conference.status == "ended" {
            return Err(ConferenceError::BadRequest(
                "Conference has already ended".to_string(),
            ));
        }

        if let Some(participant) =
            ParticipantsRepository::begin_join(&self.pool, conference_id, user_id, ParticipantRole::Participant)
                .await?
        {
            // First activity on a scheduled conference starts it.
            if conference.status == "scheduled" {
                ConferencesRepository::activate(&self.pool, conference_id).await?;
            }
            return Ok(participant);
        }

        // No row created or revived: either the user is already live
        // (idempotent join) or the conference is full.
        ParticipantsRepository::find_live(&self.pool, conference_id, user_id)
            .await?
            .ok_or(ConferenceError::CapacityExceeded(conference_id))
    }

    /// Leave a conference. Leaving when not live is a no-op success (the
    /// desired state is already reached).
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.service.leave_conference", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn leave_conference(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ConferenceError> {
        let Some(live) =
            ParticipantsRepository::find_live(&self.pool, conference_id, user_id).await?
        else {
            return Ok(());
        };

        self.depart(conference_id, live.participant_id).await
    }

    /// Kick a participant out of a conference. The physical leg teardown
    /// is the switch's business; this records the departure and lets the
    /// usual end evaluation run.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` when the target is not live, `Database` on
    /// persistence failure.
    #[instrument(skip_all, name = "conf.service.kick_participant", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn kick_participant(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ConferenceError> {
        let live = ParticipantsRepository::find_live(&self.pool, conference_id, user_id)
            .await?
            .ok_or_else(|| ConferenceError::ParticipantNotFound(user_id.to_string()))?;

        self.depart(conference_id, live.participant_id).await
    }

    /// Shared departure path for leave and kick: disconnect, emit
    /// `participant.left`, evaluate the end criteria.
    async fn depart(
        &self,
        conference_id: Uuid,
        participant_id: Uuid,
    ) -> Result<(), ConferenceError> {
        let Some(participant) =
            ParticipantsRepository::disconnect(&self.pool, participant_id).await?
        else {
            return Ok(());
        };

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantLeft { participant },
        )
        .await;

        if let Some(conference) = ConferencesRepository::get(&self.pool, conference_id).await? {
            reconciler::evaluate_conference_end(
                &self.pool,
                self.switch.as_ref(),
                self.publisher.as_ref(),
                self.switch_query_timeout,
                &conference,
            )
            .await?;
        }

        Ok(())
    }

    /// Mute or unmute a participant. No event when the flag already had
    /// the requested value.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound`, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.mute_participant", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn mute_participant(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
        muted: bool,
    ) -> Result<ParticipantRow, ConferenceError> {
        let participant = ParticipantsRepository::get_by_user(&self.pool, conference_id, user_id)
            .await?
            .ok_or_else(|| ConferenceError::ParticipantNotFound(user_id.to_string()))?;

        let Some(updated) =
            ParticipantsRepository::set_muted(&self.pool, participant.participant_id, muted)
                .await?
        else {
            return Ok(participant);
        };

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantMuted {
                participant: updated.clone(),
            },
        )
        .await;

        Ok(updated)
    }

    /// End a conference on command. Ending an already-ended conference is
    /// a no-op success returning `false`.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure.
    #[instrument(skip_all, name = "conf.service.end_conference", fields(conference_id = %conference_id))]
    pub async fn end_conference(&self, conference_id: Uuid) -> Result<bool, ConferenceError> {
        reconciler::end_conference(
            &self.pool,
            self.publisher.as_ref(),
            conference_id,
            EndReason::Command,
        )
        .await
    }

    /// Record an RSVP answer and recompute the conference counters in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// `ConferenceNotFound`, `BadRequest` for non-scheduled kinds,
    /// `ParticipantNotFound`, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.update_rsvp", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn update_rsvp(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
        rsvp_status: RsvpStatus,
    ) -> Result<(ConferenceRow, ParticipantRow), ConferenceError> {
        let conference = ConferencesRepository::get(&self.pool, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;
        let is_scheduled_kind = EventType::parse(&conference.event_type)
            .is_some_and(|event_type| event_type.is_scheduled_kind());
        if !is_scheduled_kind {
            return Err(ConferenceError::BadRequest(
                "RSVP applies only to scheduled conferences".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let participant =
            ParticipantsRepository::update_rsvp(&mut *tx, conference_id, user_id, rsvp_status)
                .await?
                .ok_or_else(|| ConferenceError::ParticipantNotFound(user_id.to_string()))?;
        let conference = ConferencesRepository::recompute_rsvp_counters(&mut *tx, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;
        tx.commit().await?;

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::RsvpUpdated {
                conference: conference.clone(),
                participant: participant.clone(),
            },
        )
        .await;

        Ok((conference, participant))
    }

    /// Change a participant's role, subject to the permission evaluator.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound` for actor or target, `PermissionDenied` when
    /// the evaluator rejects the change, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.update_role", fields(conference_id = %conference_id, target_user_id = %target_user_id))]
    pub async fn update_participant_role(
        &self,
        conference_id: Uuid,
        actor_user_id: Uuid,
        target_user_id: Uuid,
        new_role: ParticipantRole,
    ) -> Result<ParticipantRow, ConferenceError> {
        let actor = ParticipantsRepository::get_by_user(&self.pool, conference_id, actor_user_id)
            .await?
            .ok_or_else(|| ConferenceError::ParticipantNotFound(actor_user_id.to_string()))?;
        let target = ParticipantsRepository::get_by_user(&self.pool, conference_id, target_user_id)
            .await?
            .ok_or_else(|| ConferenceError::ParticipantNotFound(target_user_id.to_string()))?;

        // Unparseable stored roles deny by default: the actor gets the
        // weakest role, the target the most protected one.
        let actor_role =
            ParticipantRole::parse(&actor.role).unwrap_or(ParticipantRole::Participant);
        let target_role =
            ParticipantRole::parse(&target.role).unwrap_or(ParticipantRole::Originator);

        if !can_change_role(actor_role, target_role, new_role) {
            return Err(ConferenceError::PermissionDenied(format!(
                "{} may not change {} to {}",
                actor_role.as_str(),
                target_role.as_str(),
                new_role.as_str()
            )));
        }

        let participant =
            ParticipantsRepository::update_role(&self.pool, target.participant_id, new_role)
                .await?
                .ok_or_else(|| {
                    ConferenceError::ParticipantNotFound(target_user_id.to_string())
                })?;

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantRoleChanged {
                participant: participant.clone(),
            },
        )
        .await;

        Ok(participant)
    }

    /// Invite users to a conference. Existing rows are left untouched;
    /// reminders are not created after schedule time.
    ///
    /// # Errors
    ///
    /// `ConferenceNotFound`, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.add_participants", fields(conference_id = %conference_id))]
    pub async fn add_participants(
        &self,
        conference_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<ParticipantRow>, ConferenceError> {
        ConferencesRepository::get(&self.pool, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;

        let mut tx = self.pool.begin().await?;
        let mut added = Vec::new();
        for user_id in user_ids {
            if let Some(row) = ParticipantsRepository::insert_invited(
                &mut *tx,
                conference_id,
                *user_id,
                ParticipantRole::Participant,
            )
            .await?
            {
                added.push(row);
            }
        }
        ConferencesRepository::recompute_rsvp_counters(&mut *tx, conference_id).await?;
        tx.commit().await?;

        Ok(added)
    }

    /// Remove a participant row entirely (un-invite), recomputing the
    /// counters in the same transaction.
    ///
    /// # Errors
    ///
    /// `ParticipantNotFound`, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.remove_participant", fields(conference_id = %conference_id, user_id = %user_id))]
    pub async fn remove_participant(
        &self,
        conference_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ConferenceError> {
        let mut tx = self.pool.begin().await?;
        let participant = ParticipantsRepository::remove(&mut *tx, conference_id, user_id)
            .await?
            .ok_or_else(|| ConferenceError::ParticipantNotFound(user_id.to_string()))?;
        ConferencesRepository::recompute_rsvp_counters(&mut *tx, conference_id).await?;
        tx.commit().await?;

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantLeft { participant },
        )
        .await;

        Ok(())
    }

    /// Cancel a not-yet-started conference; with `series_wide`, every
    /// not-yet-started instance sharing the series. Active conferences are
    /// not cancellable - end them instead.
    ///
    /// # Errors
    ///
    /// `ConferenceNotFound`, `BadRequest` when the conference already
    /// started, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.cancel_conference", fields(conference_id = %conference_id, series_wide = series_wide))]
    pub async fn cancel_conference(
        &self,
        conference_id: Uuid,
        series_wide: bool,
    ) -> Result<Vec<ConferenceRow>, ConferenceError> {
        let conference = ConferencesRepository::get(&self.pool, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;

        let cancelled = if series_wide {
            let series_id = conference.series_id.unwrap_or(conference.conference_id);
            ConferencesRepository::delete_series(&self.pool, series_id).await?
        } else {
            match ConferencesRepository::delete_scheduled(&self.pool, conference_id).await? {
                Some(row) => vec![row],
                None => {
                    return Err(ConferenceError::BadRequest(
                        "Only scheduled conferences can be cancelled".to_string(),
                    ))
                }
            }
        };

        for conference in &cancelled {
            info!(
                target: "conf.service",
                conference_id = %conference.conference_id,
                "Conference cancelled"
            );
            publish_best_effort(
                self.publisher.as_ref(),
                DomainEvent::ConferenceCancelled {
                    conference: conference.clone(),
                },
            )
            .await;
        }

        Ok(cancelled)
    }

    /// Record where the switch put a conference recording. Write-once; a
    /// repeat is a no-op.
    ///
    /// # Errors
    ///
    /// `ConferenceNotFound`, `Database` on persistence failure.
    #[instrument(skip_all, name = "conf.service.recording_started", fields(conference_id = %conference_id))]
    pub async fn recording_started(
        &self,
        conference_id: Uuid,
        recording_path: &str,
    ) -> Result<(), ConferenceError> {
        ConferencesRepository::get(&self.pool, conference_id)
            .await?
            .ok_or(ConferenceError::ConferenceNotFound(conference_id))?;
        ConferencesRepository::set_recording_path(&self.pool, conference_id, recording_path)
            .await?;
        Ok(())
    }
}

/// Shared validation for conference creation.
fn validate_name_and_limit(name: &str, max_members: i32) -> Result<(), ConferenceError> {
    if name.trim().is_empty() {
        return Err(ConferenceError::BadRequest(
            "Conference name is required".to_string(),
        ));
    }
    if max_members < MIN_MAX_MEMBERS {
        return Err(ConferenceError::BadRequest(format!(
            "Member limit must be at least {MIN_MAX_MEMBERS}"
        )));
    }
    Ok(())
}
