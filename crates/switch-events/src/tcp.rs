//! Event-socket client for the telephony switch.
//!
//! The switch exposes a TCP event socket speaking newline-delimited JSON.
//! Two connection kinds are used:
//!
//! - one long-lived event connection: authenticate, subscribe, then pump
//!   decoded events into a channel until the socket drops
//! - short-lived query connections for the live member-list lookup, one
//!   request/response per connection, bounded by the query timeout
//!
//! Credentials are never logged; connection errors carry the peer address
//! only.

use crate::client::SwitchClient;
use crate::errors::SwitchError;
use crate::events::{SwitchEvent, SwitchEventType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 5;

/// Buffer size for the decoded event channel.
const EVENT_CHANNEL_BUFFER: usize = 256;

/// Event-socket connection settings.
#[derive(Clone)]
pub struct SwitchSocketConfig {
    /// Switch event-socket address, e.g. `127.0.0.1:8021`.
    pub address: String,
    /// Optional event-socket password.
    pub password: Option<String>,
    /// TCP connect + handshake deadline.
    pub connect_timeout: Duration,
    /// Deadline for a single query round trip.
    pub query_timeout: Duration,
}

impl SwitchSocketConfig {
    /// Settings with default timeouts for the given address.
    #[must_use]
    pub fn new(address: String, password: Option<String>) -> Self {
        Self {
            address,
            password,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

/// Custom Debug implementation that redacts the password.
impl std::fmt::Debug for SwitchSocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchSocketConfig")
            .field("address", &self.address)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Commands sent to the switch.
#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Command<'a> {
    Auth { password: &'a str },
    Subscribe { events: Vec<&'static str> },
    Members { conference: &'a str },
}

/// Acknowledgement frame for auth/subscribe.
#[derive(Deserialize)]
struct Ack {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Inbound event frame.
#[derive(Deserialize)]
struct EventFrame {
    event: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// Reply to a members query.
#[derive(Deserialize)]
struct MembersReply {
    ok: bool,
    #[serde(default)]
    members: Vec<String>,
}

/// Event-socket client.
///
/// `connect` establishes and authenticates the event connection;
/// `subscribe` consumes it and spawns the pump task. Member-list queries
/// open their own short-lived connections so they never contend with the
/// event stream.
pub struct TcpSwitchClient {
    config: SwitchSocketConfig,
    connected: Arc<AtomicBool>,
    event_stream: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpSwitchClient {
    /// Connect and authenticate the event connection.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError` on connect timeout, socket errors, or rejected
    /// credentials.
    pub async fn connect(config: SwitchSocketConfig) -> Result<Self, SwitchError> {
        let stream = open_authenticated(&config).await?;
        info!(
            target: "switch.client",
            address = %config.address,
            "Connected to switch event socket"
        );

        Ok(Self {
            config,
            connected: Arc::new(AtomicBool::new(true)),
            event_stream: Mutex::new(Some(stream)),
        })
    }
}

/// Open a connection and run the auth handshake if a password is set.
async fn open_authenticated(
    config: &SwitchSocketConfig,
) -> Result<BufReader<TcpStream>, SwitchError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| SwitchError::Timeout)?
        .map_err(|e| {
            warn!(
                target: "switch.client",
                address = %config.address,
                error = %e,
                "Failed to connect to switch"
            );
            SwitchError::Connection(format!("connect to {}: {e}", config.address))
        })?;

    let mut stream = BufReader::new(stream);

    if let Some(password) = &config.password {
        write_frame(&mut stream, &Command::Auth { password }).await?;
        let ack: Ack = read_frame(&mut stream, config.connect_timeout).await?;
        if !ack.ok {
            // Do not log the error detail; it can echo the credential.
            return Err(SwitchError::AuthenticationFailed);
        }
    }

    Ok(stream)
}

/// Serialize a command as one JSON line.
async fn write_frame<T: Serialize>(
    stream: &mut BufReader<TcpStream>,
    frame: &T,
) -> Result<(), SwitchError> {
    let mut line =
        serde_json::to_vec(frame).map_err(|e| SwitchError::Protocol(e.to_string()))?;
    line.push(b'\n');
    stream
        .get_mut()
        .write_all(&line)
        .await
        .map_err(|e| SwitchError::Connection(format!("write: {e}")))
}

/// Read and decode one JSON line within the deadline.
async fn read_frame<T: for<'de> Deserialize<'de>>(
    stream: &mut BufReader<TcpStream>,
    deadline: Duration,
) -> Result<T, SwitchError> {
    let mut line = String::new();
    let read = tokio::time::timeout(deadline, stream.read_line(&mut line))
        .await
        .map_err(|_| SwitchError::Timeout)?
        .map_err(|e| SwitchError::Connection(format!("read: {e}")))?;

    if read == 0 {
        return Err(SwitchError::Connection("connection closed".to_string()));
    }

    serde_json::from_str(&line).map_err(|e| SwitchError::Protocol(e.to_string()))
}

#[async_trait::async_trait]
impl SwitchClient for TcpSwitchClient {
    async fn subscribe(
        &self,
        event_types: &[SwitchEventType],
    ) -> Result<mpsc::Receiver<SwitchEvent>, SwitchError> {
        let mut slot = self.event_stream.lock().await;
        let mut stream = slot.take().ok_or(SwitchError::NotConnected)?;

        write_frame(
            &mut stream,
            &Command::Subscribe {
                events: event_types.iter().map(SwitchEventType::as_str).collect(),
            },
        )
        .await?;
        let ack: Ack = read_frame(&mut stream, self.config.connect_timeout).await?;
        if !ack.ok {
            return Err(SwitchError::Protocol(
                ack.error.unwrap_or_else(|| "subscribe rejected".to_string()),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let connected = Arc::clone(&self.connected);
        tokio::spawn(pump_events(stream, tx, connected));

        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_conference_members(
        &self,
        conference_name: &str,
    ) -> Result<Vec<String>, SwitchError> {
        let mut stream = open_authenticated(&self.config).await?;

        write_frame(
            &mut stream,
            &Command::Members {
                conference: conference_name,
            },
        )
        .await?;
        let reply: MembersReply = read_frame(&mut stream, self.config.query_timeout).await?;

        if !reply.ok {
            return Err(SwitchError::Protocol(format!(
                "members query rejected for {conference_name}"
            )));
        }
        Ok(reply.members)
    }
}

/// Read event frames until the socket drops, forwarding decoded events.
///
/// Undecodable frames are logged and skipped; they must not kill the pump.
async fn pump_events(
    mut stream: BufReader<TcpStream>,
    tx: mpsc::Sender<SwitchEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stream.read_line(&mut line).await {
            Ok(0) => {
                info!(target: "switch.client", "Switch event socket closed");
                break;
            }
            Ok(_) => {
                let frame: EventFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(target: "switch.client", error = %e, "Undecodable event frame, skipping");
                        continue;
                    }
                };

                match SwitchEvent::from_headers(&frame.event, &frame.headers) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            debug!(target: "switch.client", "Event receiver dropped, stopping pump");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "switch.client",
                            event = %frame.event,
                            error = %e,
                            "Unparseable switch event, skipping"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(target: "switch.client", error = %e, "Switch event socket read failed");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}
