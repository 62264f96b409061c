use std::time::Duration;

use armctl_common::{
    codec::{EngineIoCodec, Frame, OpenHandshake, decode_frame, split_payload},
    error::SessionError,
};
use codee::Encoder;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::transport::TransportEvent;
use crate::settings::SessionSettings;

/// Connection phase of the session link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport connection. A connect attempt may be in flight.
    Disconnected,
    /// Transport is up, waiting for the server handshake and namespace ack
    AwaitingHandshake,
    /// Joined the namespace; movement events are accepted
    NamespaceConnected,
}

/// Bounded exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Starts at `base`, doubling per failure up to `ceiling`.
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// Delay before the next attempt; grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// What the link wants done after handling an input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open the transport
    Connect,
    /// Send one encoded frame
    Send(String),
    /// Close the transport
    Disconnect,
    /// Run a pushed movement sequence
    RunSequence {
        /// The event's payload object
        payload: Value,
        /// Size of the frame it arrived in
        encoded_len: usize,
    },
}

/// Engine.IO / Socket.IO client state machine.
///
/// Pure: time is passed in and effects are returned as [`SessionAction`]s,
/// so the machine can be driven by any transport, or by a test.
#[derive(Debug)]
pub struct SessionClient {
    state: LinkState,
    connecting: bool,
    backoff: Backoff,
    next_attempt_at: Duration,
    last_activity: Duration,
    liveness: Duration,
    namespace: String,
    movement_event: String,
}

impl SessionClient {
    /// Used until the server announces its own ping settings.
    const DEFAULT_LIVENESS: Duration = Duration::from_millis(25_000 + 20_000);

    /// A disconnected client whose first attempt is due immediately.
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            state: LinkState::Disconnected,
            connecting: false,
            backoff: Backoff::new(
                Duration::from_millis(settings.reconnect_base_ms),
                Duration::from_millis(settings.reconnect_max_ms),
            ),
            next_attempt_at: Duration::ZERO,
            last_activity: Duration::ZERO,
            liveness: Self::DEFAULT_LIVENESS,
            namespace: settings.namespace.clone(),
            movement_event: settings.movement_event.clone(),
        }
    }

    /// Current phase.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Loop time of the next reconnect attempt.
    pub fn next_attempt_at(&self) -> Duration {
        self.next_attempt_at
    }

    /// Asks for a connect when disconnected and the backoff allows it.
    pub fn poll_connect(&mut self, now: Duration) -> Option<SessionAction> {
        if self.state != LinkState::Disconnected || self.connecting || now < self.next_attempt_at {
            return None;
        }
        self.connecting = true;
        debug!("Opening session link");
        Some(SessionAction::Connect)
    }

    /// Feeds one transport event through the machine.
    pub fn on_transport(&mut self, event: TransportEvent, now: Duration) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match event {
            TransportEvent::Connected => {
                info!("🔌 Session transport connected, awaiting handshake");
                self.connecting = false;
                self.state = LinkState::AwaitingHandshake;
                self.backoff.reset();
                self.liveness = Self::DEFAULT_LIVENESS;
                self.last_activity = now;
            }
            TransportEvent::ConnectFailed(reason) => {
                self.connecting = false;
                let delay = self.backoff.next_delay();
                self.next_attempt_at = now + delay;
                warn!(
                    "Session connect failed: {} (retry in {} ms)",
                    reason,
                    delay.as_millis()
                );
            }
            TransportEvent::Closed(reason) => {
                self.drop_link(&SessionError::TransportLost(reason), now);
            }
            TransportEvent::Message(text) => {
                for packet in split_payload(&text) {
                    match decode_frame(packet) {
                        Ok(frame) => self.on_frame(frame, packet.len(), now, &mut actions),
                        Err(err) => warn!("Dropping undecodable frame: {}", err),
                    }
                }
            }
        }
        actions
    }

    /// Drops a link that has been silent for longer than the server's ping
    /// interval plus timeout.
    pub fn check_liveness(&mut self, now: Duration) -> Vec<SessionAction> {
        if self.state == LinkState::Disconnected
            || now.saturating_sub(self.last_activity) <= self.liveness
        {
            return Vec::new();
        }
        self.drop_link(
            &SessionError::TransportLost(format!(
                "no frames for {} ms",
                now.saturating_sub(self.last_activity).as_millis()
            )),
            now,
        );
        vec![SessionAction::Disconnect]
    }

    fn on_frame(&mut self, frame: Frame, encoded_len: usize, now: Duration, actions: &mut Vec<SessionAction>) {
        if self.state == LinkState::Disconnected {
            trace!("Ignoring frame while disconnected: {:?}", frame);
            return;
        }
        self.last_activity = now;

        match frame {
            Frame::Open(handshake) => self.on_open(handshake, actions),
            Frame::Connect { namespace, .. } if self.state == LinkState::AwaitingHandshake => {
                if namespace == self.namespace {
                    info!("✅ Joined namespace {}", namespace);
                    self.state = LinkState::NamespaceConnected;
                }
            }
            Frame::Ping(data) => {
                trace!("ping");
                self.send(&Frame::pong_for(&data), actions);
            }
            Frame::Event {
                namespace,
                name,
                mut args,
                ..
            } if self.state == LinkState::NamespaceConnected => {
                if name != self.movement_event || namespace != self.namespace {
                    debug!("Ignoring event '{}'", name);
                    return;
                }
                if args.is_empty() {
                    warn!("'{}' event without a payload", name);
                    return;
                }
                info!("📥 Received '{}' event", name);
                actions.push(SessionAction::RunSequence {
                    payload: args.swap_remove(0),
                    encoded_len,
                });
            }
            Frame::Close => {
                self.drop_link(&SessionError::TransportLost("server closed the session".into()), now);
                actions.push(SessionAction::Disconnect);
            }
            Frame::Disconnect { namespace } if namespace == self.namespace => {
                self.drop_link(
                    &SessionError::TransportLost(format!("server left namespace {namespace}")),
                    now,
                );
                actions.push(SessionAction::Disconnect);
            }
            Frame::ConnectError { message, .. } => {
                self.drop_link(&SessionError::ConnectFailed(message), now);
                actions.push(SessionAction::Disconnect);
            }
            other => trace!("Ignoring frame {:?}", other),
        }
    }

    fn on_open(&mut self, handshake: OpenHandshake, actions: &mut Vec<SessionAction>) {
        if self.state != LinkState::AwaitingHandshake {
            debug!("Unexpected handshake, ignoring");
            return;
        }
        debug!(
            "Handshake sid={} ping {} ms / timeout {} ms",
            handshake.sid, handshake.ping_interval, handshake.ping_timeout
        );
        self.liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let join = Frame::Connect {
            namespace: self.namespace.clone(),
            payload: None,
        };
        self.send(&join, actions);
    }

    fn send(&self, frame: &Frame, actions: &mut Vec<SessionAction>) {
        match EngineIoCodec::encode(frame) {
            Ok(text) => actions.push(SessionAction::Send(text)),
            Err(err) => warn!("Could not encode {:?}: {}", frame, err),
        }
    }

    fn drop_link(&mut self, reason: &SessionError, now: Duration) {
        if self.state == LinkState::Disconnected && !self.connecting {
            return;
        }
        self.state = LinkState::Disconnected;
        self.connecting = false;
        let delay = self.backoff.next_delay();
        self.next_attempt_at = now + delay;
        warn!(
            "❌ Session link down: {} (reconnect in {} ms)",
            reason,
            delay.as_millis()
        );
    }
}
