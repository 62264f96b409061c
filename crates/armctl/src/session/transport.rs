use std::{collections::VecDeque, sync::Arc};

use armctl_common::error::SessionError;
use parking_lot::Mutex;

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open
    Connected,
    /// One text message, possibly holding several frames
    Message(String),
    /// A connect attempt failed
    ConnectFailed(String),
    /// An open connection was closed
    Closed(String),
}

/// A text transport for the session link.
///
/// Implementations run their I/O elsewhere (usually on a tokio task) and
/// hand results to the loop through [`poll`](SessionTransport::poll), which
/// must never block.
pub trait SessionTransport: Send + Sync + 'static {
    /// Starts a connect attempt. The outcome arrives through `poll`.
    fn connect(&mut self, url: &str) -> Result<(), SessionError>;

    /// Next pending event, if any.
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Queues one text message.
    fn send(&mut self, text: String) -> Result<(), SessionError>;

    /// Closes the connection, if any.
    fn disconnect(&mut self);

    /// Whether `wss` endpoints can be reached. A link refuses a `wss`
    /// address up front when this is false.
    fn supports_tls(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Script {
    connect_results: VecDeque<Result<(), String>>,
    incoming: VecDeque<TransportEvent>,
    sent: Vec<String>,
    connect_urls: Vec<String>,
    disconnects: usize,
    open: bool,
    plain_only: bool,
}

/// Transport driven by a test script.
///
/// Each `connect` consumes the next scripted outcome (success when the
/// script is empty) and reports it on the next poll.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

/// Test-side handle to a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct TransportScript {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Creates a transport and the handle scripting it.
    pub fn new() -> (Self, TransportScript) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                script: script.clone(),
            },
            TransportScript { script },
        )
    }
}

impl TransportScript {
    /// Makes the next connect attempt fail.
    pub fn fail_next_connect(&self, reason: &str) {
        self.script.lock().connect_results.push_back(Err(reason.to_string()));
    }

    /// Delivers a text message on the next poll.
    pub fn push_message(&self, text: &str) {
        self.script
            .lock()
            .incoming
            .push_back(TransportEvent::Message(text.to_string()));
    }

    /// Simulates the peer dropping the connection.
    pub fn close(&self, reason: &str) {
        let mut script = self.script.lock();
        script.open = false;
        script.incoming.push_back(TransportEvent::Closed(reason.to_string()));
    }

    /// Messages sent by the client so far.
    pub fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    /// Addresses passed to `connect`, one per attempt.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.script.lock().connect_urls.clone()
    }

    /// Makes the transport report that it cannot reach `wss` endpoints.
    pub fn refuse_tls(&self) {
        self.script.lock().plain_only = true;
    }

    /// How many times the client closed the connection.
    pub fn disconnects(&self) -> usize {
        self.script.lock().disconnects
    }
}

impl SessionTransport for ScriptedTransport {
    fn connect(&mut self, url: &str) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        script.connect_urls.push(url.to_string());
        let event = match script.connect_results.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                script.open = true;
                TransportEvent::Connected
            }
            Err(reason) => TransportEvent::ConnectFailed(reason),
        };
        script.incoming.push_back(event);
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.script.lock().incoming.pop_front()
    }

    fn send(&mut self, text: String) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        if !script.open {
            return Err(SessionError::NotConnected);
        }
        script.sent.push(text);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut script = self.script.lock();
        script.open = false;
        script.disconnects += 1;
    }

    fn supports_tls(&self) -> bool {
        !self.script.lock().plain_only
    }
}
