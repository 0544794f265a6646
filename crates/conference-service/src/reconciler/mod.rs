//! Telephony event reconciler.
//!
//! Aligns persisted conference/participant state with the live reality the
//! switch reports. Every handler is idempotent: redelivery of an event hits
//! a status-guarded statement that matches zero rows the second time.
//!
//! End-of-conference evaluation lives here too and is shared with the
//! service layer and the periodic tasks, so every path that ends a
//! conference goes through the same guarded transition and emits
//! `conference.ended` at most once.

use crate::errors::ConferenceError;
use crate::events::{publish_best_effort, DomainEvent, EventPublisher};
use crate::models::ConferenceRow;
use crate::observability::metrics;
use crate::repositories::{ConferencesRepository, ParticipantsRepository};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switch_events::{SwitchClient, SwitchEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a conference was ended. Doubles as the metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// An explicit end command from the request layer.
    Command,
    /// No participant rows left undisconnected.
    EmptyDb,
    /// The switch reported zero live members.
    EmptySwitch,
    /// The stale-conference janitor's age ceiling.
    Stale,
}

impl EndReason {
    /// Metric label value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Command => "command",
            EndReason::EmptyDb => "empty_db",
            EndReason::EmptySwitch => "empty_switch",
            EndReason::Stale => "stale",
        }
    }
}

/// Pure end-of-conference decision from the two observations.
///
/// `live_members` is `None` when the switch was unreachable or timed out,
/// in which case the database is authoritative and a non-zero count keeps
/// the conference alive.
#[must_use]
pub fn should_end(db_active_count: i64, live_members: Option<usize>) -> Option<EndReason> {
    if db_active_count == 0 {
        return Some(EndReason::EmptyDb);
    }
    if live_members == Some(0) {
        return Some(EndReason::EmptySwitch);
    }
    None
}

/// End a conference and publish `conference.ended` if this writer won the
/// guarded transition. Returns whether the transition happened here;
/// `false` means another writer already ended it and nothing was emitted.
///
/// # Errors
///
/// Returns `ConferenceError::Database` on query failure.
pub async fn end_conference(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    conference_id: uuid::Uuid,
    reason: EndReason,
) -> Result<bool, ConferenceError> {
    let Some(conference) = ConferencesRepository::end(pool, conference_id).await? else {
        return Ok(false);
    };

    // Rows the switch never hung up on must not linger as live.
    let orphaned =
        ParticipantsRepository::disconnect_all_for_conference(pool, conference_id).await?;
    if orphaned > 0 {
        debug!(
            target: "conf.reconciler",
            conference_id = %conference_id,
            orphaned,
            "Disconnected remaining participants of ended conference"
        );
    }

    metrics::record_conference_ended(reason.as_str());
    info!(
        target: "conf.reconciler",
        conference_id = %conference_id,
        reason = reason.as_str(),
        "Conference ended"
    );

    publish_best_effort(publisher, DomainEvent::ConferenceEnded { conference }).await;
    Ok(true)
}

/// Query the switch for a bridge's live member count, bounded by
/// `query_timeout`. `None` means the switch was unavailable and the caller
/// must fall back to database state.
pub async fn live_member_count(
    switch: &dyn SwitchClient,
    query_timeout: Duration,
    switch_name: &str,
) -> Option<usize> {
    if !switch.is_connected() {
        debug!(
            target: "conf.reconciler",
            switch_name = %switch_name,
            "Switch not connected, falling back to database state"
        );
        return None;
    }

    let start = Instant::now();
    match tokio::time::timeout(query_timeout, switch.list_conference_members(switch_name)).await {
        Ok(Ok(members)) => {
            metrics::record_switch_query("success", start.elapsed());
            Some(members.len())
        }
        Ok(Err(e)) => {
            metrics::record_switch_query("error", start.elapsed());
            warn!(
                target: "conf.reconciler",
                switch_name = %switch_name,
                error = %e,
                "Switch membership query failed, falling back to database state"
            );
            None
        }
        Err(_) => {
            metrics::record_switch_query("error", start.elapsed());
            warn!(
                target: "conf.reconciler",
                switch_name = %switch_name,
                timeout_ms = query_timeout.as_millis() as u64,
                "Switch membership query timed out, falling back to database state"
            );
            None
        }
    }
}

/// Evaluate the end-of-conference criteria for one conference and end it
/// when they hold. Returns whether the conference was ended by this call.
///
/// The switch is only consulted when the database still counts someone
/// active; an empty database decides by itself.
///
/// # Errors
///
/// Returns `ConferenceError::Database` on query failure.
pub async fn evaluate_conference_end(
    pool: &PgPool,
    switch: &dyn SwitchClient,
    publisher: &dyn EventPublisher,
    query_timeout: Duration,
    conference: &ConferenceRow,
) -> Result<bool, ConferenceError> {
    let db_active =
        ParticipantsRepository::active_count(pool, conference.conference_id).await?;

    let live = if db_active == 0 {
        None
    } else {
        live_member_count(switch, query_timeout, &conference.switch_name).await
    };

    match should_end(db_active, live) {
        Some(reason) => end_conference(pool, publisher, conference.conference_id, reason).await,
        None => Ok(false),
    }
}

/// The reconciler: consumes switch events and drives the state machine.
pub struct Reconciler {
    pool: PgPool,
    switch: Arc<dyn SwitchClient>,
    publisher: Arc<dyn EventPublisher>,
    switch_query_timeout: Duration,
}

impl Reconciler {
    /// Build a reconciler over the given dependencies.
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

    /// Run the reconciliation loop until the event channel closes or the
    /// cancellation token fires.
    ///
    /// One event's failure is logged and must not stall the stream.
    #[instrument(skip_all, name = "conf.reconciler")]
    pub async fn run(
        self,
        mut events: mpsc::Receiver<SwitchEvent>,
        cancel_token: CancellationToken,
    ) {
        info!(target: "conf.reconciler", "Reconciler started");

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(
                        target: "conf.reconciler",
                        "Reconciler received shutdown signal, exiting"
                    );
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_event(&event).await {
                                tracing::error!(
                                    target: "conf.reconciler",
                                    event = event.event_type().as_str(),
                                    error = %e,
                                    "Failed to reconcile switch event"
                                );
                            }
                        }
                        None => {
                            warn!(
                                target: "conf.reconciler",
                                "Switch event stream closed, reconciler exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "conf.reconciler", "Reconciler stopped");
    }

    /// Apply one switch event.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Database` on query failure; the run loop
    /// logs and keeps going.
    pub async fn handle_event(&self, event: &SwitchEvent) -> Result<(), ConferenceError> {
        metrics::record_switch_event(event.event_type().as_str());

        match event {
            SwitchEvent::ChannelCreate { channel_uuid }
            | SwitchEvent::ChannelAnswer { channel_uuid } => {
                // Informational only; association happens on member-add.
                debug!(
                    target: "conf.reconciler",
                    event = event.event_type().as_str(),
                    channel_uuid = %channel_uuid,
                    "Channel lifecycle event"
                );
                Ok(())
            }
            SwitchEvent::ChannelHangup {
                channel_uuid,
                cause,
            } => self.handle_hangup(channel_uuid, cause).await,
            SwitchEvent::ConferenceMemberAdd {
                conference_name,
                member_id,
                channel_uuid,
            } => {
                self.handle_member_add(conference_name, member_id, channel_uuid)
                    .await
            }
            SwitchEvent::ConferenceMemberFlags {
                channel_uuid,
                muted,
                deafened,
                speaking,
            } => {
                self.handle_member_flags(channel_uuid, *muted, *deafened, *speaking)
                    .await
            }
        }
    }

    /// A channel hung up: disconnect its participant and evaluate the end
    /// criteria. A hangup for a channel never associated with a
    /// participant (a failed outbound leg) is a no-op.
    async fn handle_hangup(
        &self,
        channel_uuid: &str,
        cause: &str,
    ) -> Result<(), ConferenceError> {
        let Some(participant) =
            ParticipantsRepository::disconnect_by_channel(&self.pool, channel_uuid).await?
        else {
            debug!(
                target: "conf.reconciler",
                channel_uuid = %channel_uuid,
                cause = %cause,
                "Hangup for unassociated channel, ignoring"
            );
            return Ok(());
        };

        info!(
            target: "conf.reconciler",
            conference_id = %participant.conference_id,
            user_id = %participant.user_id,
            cause = %cause,
            "Participant disconnected by hangup"
        );

        let conference_id = participant.conference_id;
        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantLeft { participant },
        )
        .await;

        if let Some(conference) = ConferencesRepository::get(&self.pool, conference_id).await? {
            evaluate_conference_end(
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

    /// A real member appeared in a bridge: bind its channel to the oldest
    /// pending connecting participant (best-effort FIFO association).
    async fn handle_member_add(
        &self,
        conference_name: &str,
        member_id: &str,
        channel_uuid: &str,
    ) -> Result<(), ConferenceError> {
        let Some(conference) =
            ConferencesRepository::get_by_switch_name(&self.pool, conference_name).await?
        else {
            warn!(
                target: "conf.reconciler",
                conference_name = %conference_name,
                "Member-add for unknown bridge, ignoring"
            );
            return Ok(());
        };

        let Some(participant) = ParticipantsRepository::bind_channel(
            &self.pool,
            conference.conference_id,
            channel_uuid,
            member_id,
        )
        .await?
        else {
            // Redelivery, or a leg no join command announced.
            debug!(
                target: "conf.reconciler",
                conference_id = %conference.conference_id,
                channel_uuid = %channel_uuid,
                "No pending connecting participant to bind, ignoring"
            );
            return Ok(());
        };

        info!(
            target: "conf.reconciler",
            conference_id = %conference.conference_id,
            user_id = %participant.user_id,
            fs_member_id = %member_id,
            "Participant bound to live channel"
        );

        publish_best_effort(
            self.publisher.as_ref(),
            DomainEvent::ParticipantJoined { participant },
        )
        .await;

        Ok(())
    }

    /// Flags changed on a member: persist and emit change events for the
    /// flags that actually moved. Never triggers termination logic.
    async fn handle_member_flags(
        &self,
        channel_uuid: &str,
        muted: bool,
        deafened: bool,
        speaking: bool,
    ) -> Result<(), ConferenceError> {
        let Some(update) = ParticipantsRepository::update_flags(
            &self.pool,
            channel_uuid,
            muted,
            deafened,
            speaking,
        )
        .await?
        else {
            debug!(
                target: "conf.reconciler",
                channel_uuid = %channel_uuid,
                "Flags for unassociated channel, ignoring"
            );
            return Ok(());
        };

        if update.was_muted != muted {
            publish_best_effort(
                self.publisher.as_ref(),
                DomainEvent::ParticipantMuted {
                    participant: update.participant.clone(),
                },
            )
            .await;
        }

        if update.was_speaking != speaking {
            publish_best_effort(
                self.publisher.as_ref(),
                DomainEvent::ParticipantSpeaking {
                    participant: update.participant,
                },
            )
            .await;
        }

        Ok(())
    }
}
