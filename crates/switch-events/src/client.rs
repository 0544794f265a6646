//! The switch client seam consumed by the orchestrator.
//!
//! The orchestrator never talks to the switch directly; it holds an
//! `Arc<dyn SwitchClient>` so reconciliation and monitoring can be exercised
//! against the mock in tests and against the event-socket client in
//! production.

use crate::errors::SwitchError;
use crate::events::{SwitchEvent, SwitchEventType};
use tokio::sync::mpsc;

/// Trait for switch operations (enables mocking).
#[async_trait::async_trait]
pub trait SwitchClient: Send + Sync {
    /// Subscribe to the given event classes.
    ///
    /// Decoded events arrive on the returned channel until the connection
    /// drops; the channel closing is the disconnect signal.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError` if the subscription cannot be established.
    async fn subscribe(
        &self,
        event_types: &[SwitchEventType],
    ) -> Result<mpsc::Receiver<SwitchEvent>, SwitchError>;

    /// Whether the event connection is currently live.
    fn is_connected(&self) -> bool;

    /// Query the live member ids of a conference bridge.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError` when the switch is unreachable, the query times
    /// out, or the bridge name is unknown to the switch.
    async fn list_conference_members(
        &self,
        conference_name: &str,
    ) -> Result<Vec<String>, SwitchError>;
}

/// Mock switch client module for testing.
pub mod mock {
    use super::{SwitchClient, SwitchError, SwitchEvent, SwitchEventType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Scriptable switch client for unit and integration tests.
    ///
    /// Member lists are set per bridge name; `sender()` hands out the event
    /// injection side of the subscription channel.
    pub struct MockSwitchClient {
        connected: AtomicBool,
        fail_member_queries: AtomicBool,
        members: Mutex<HashMap<String, Vec<String>>>,
        member_query_count: AtomicUsize,
        sender: mpsc::Sender<SwitchEvent>,
        receiver: Mutex<Option<mpsc::Receiver<SwitchEvent>>>,
    }

    impl MockSwitchClient {
        /// Create a connected mock with no members anywhere.
        #[must_use]
        pub fn connected() -> Self {
            let (sender, receiver) = mpsc::channel(64);
            Self {
                connected: AtomicBool::new(true),
                fail_member_queries: AtomicBool::new(false),
                members: Mutex::new(HashMap::new()),
                member_query_count: AtomicUsize::new(0),
                sender,
                receiver: Mutex::new(Some(receiver)),
            }
        }

        /// Create a mock that reports no switch connection.
        #[must_use]
        pub fn disconnected() -> Self {
            let mock = Self::connected();
            mock.connected.store(false, Ordering::SeqCst);
            mock
        }

        /// Create a connected mock whose member queries always fail.
        #[must_use]
        pub fn failing_queries() -> Self {
            let mock = Self::connected();
            mock.fail_member_queries.store(true, Ordering::SeqCst);
            mock
        }

        /// Set the live member list for a bridge.
        pub fn set_members(&self, conference_name: &str, members: Vec<String>) {
            if let Ok(mut map) = self.members.lock() {
                map.insert(conference_name.to_string(), members);
            }
        }

        /// Event injection handle for driving the subscription channel.
        #[must_use]
        pub fn sender(&self) -> mpsc::Sender<SwitchEvent> {
            self.sender.clone()
        }

        /// Number of member-list queries made.
        #[must_use]
        pub fn member_query_count(&self) -> usize {
            self.member_query_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SwitchClient for MockSwitchClient {
        async fn subscribe(
            &self,
            _event_types: &[SwitchEventType],
        ) -> Result<mpsc::Receiver<SwitchEvent>, SwitchError> {
            self.receiver
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .ok_or_else(|| SwitchError::Protocol("already subscribed".to_string()))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn list_conference_members(
            &self,
            conference_name: &str,
        ) -> Result<Vec<String>, SwitchError> {
            self.member_query_count.fetch_add(1, Ordering::SeqCst);

            if !self.connected.load(Ordering::SeqCst) {
                return Err(SwitchError::NotConnected);
            }
            if self.fail_member_queries.load(Ordering::SeqCst) {
                return Err(SwitchError::Timeout);
            }

            let members = self
                .members
                .lock()
                .map_err(|_| SwitchError::Protocol("mock poisoned".to_string()))?
                .get(conference_name)
                .cloned()
                .unwrap_or_default();
            Ok(members)
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_member_queries() {
            let mock = MockSwitchClient::connected();
            mock.set_members("conf-1", vec!["3".to_string(), "4".to_string()]);

            let members = mock.list_conference_members("conf-1").await.unwrap();
            assert_eq!(members, vec!["3".to_string(), "4".to_string()]);

            let empty = mock.list_conference_members("conf-2").await.unwrap();
            assert!(empty.is_empty());
            assert_eq!(mock.member_query_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_disconnected() {
            let mock = MockSwitchClient::disconnected();
            assert!(!mock.is_connected());

            let result = mock.list_conference_members("conf-1").await;
            assert!(matches!(result, Err(SwitchError::NotConnected)));
        }

        #[tokio::test]
        async fn test_mock_event_injection() {
            let mock = MockSwitchClient::connected();
            let mut receiver = mock.subscribe(&[]).await.unwrap();

            mock.sender()
                .send(SwitchEvent::ChannelCreate {
                    channel_uuid: "abc".to_string(),
                })
                .await
                .unwrap();

            let event = receiver.recv().await.unwrap();
            assert!(matches!(event, SwitchEvent::ChannelCreate { .. }));
        }

        #[tokio::test]
        async fn test_mock_second_subscribe_fails() {
            let mock = MockSwitchClient::connected();
            let _first = mock.subscribe(&[]).await.unwrap();
            assert!(mock.subscribe(&[]).await.is_err());
        }
    }
}
