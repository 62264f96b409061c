#![deny(
    missing_docs,
    trivial_casts,
    unstable_features,
    unused_import_braces,
    clippy::unwrap_used
)]

/*!
A websocket [`SessionTransport`] for armctl.

Each connect attempt spawns one task on a tokio runtime. The task owns the
socket and talks to the control loop through two channels: text frames and
state changes come back as [`TransportEvent`]s, outgoing text goes in. A new
attempt replaces both channels, so nothing from an abandoned connection ever
reaches the loop.
*/

use armctl::session::{SessionTransport, TransportEvent};
use armctl_common::error::SessionError;
use async_channel::{Receiver, Sender, unbounded};
use async_tungstenite::tungstenite::{self, Message};
use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Websocket transport running its connections on a tokio runtime.
#[derive(Debug)]
pub struct WebSocketTransport {
    runtime: Handle,
    events: Option<Receiver<TransportEvent>>,
    outgoing: Option<Sender<String>>,
}

impl WebSocketTransport {
    /// Creates an idle transport. Nothing connects until
    /// [`connect`](SessionTransport::connect).
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            events: None,
            outgoing: None,
        }
    }
}

impl SessionTransport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> Result<(), SessionError> {
        let url = Url::parse(url).map_err(|err| SessionError::InvalidUrl(err.to_string()))?;
        if url.scheme() == "wss" {
            return Err(SessionError::ConnectFailed(
                "wss endpoints need a TLS-enabled transport".to_string(),
            ));
        }

        self.disconnect();
        let (event_tx, event_rx) = unbounded();
        let (outgoing_tx, outgoing_rx) = unbounded();
        self.events = Some(event_rx);
        self.outgoing = Some(outgoing_tx);
        self.runtime.spawn(run_connection(url, event_tx, outgoing_rx));
        Ok(())
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.events.as_ref()?.try_recv().ok()
    }

    fn send(&mut self, text: String) -> Result<(), SessionError> {
        let outgoing = self.outgoing.as_ref().ok_or(SessionError::NotConnected)?;
        outgoing
            .try_send(text)
            .map_err(|err| SessionError::TransportLost(err.to_string()))
    }

    fn disconnect(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            debug!("Dropping websocket connection");
            outgoing.close();
        }
        self.events = None;
    }

    fn supports_tls(&self) -> bool {
        false
    }
}

async fn run_connection(url: Url, events: Sender<TransportEvent>, outgoing: Receiver<String>) {
    info!("Beginning websocket connection to {}", url);
    let stream = match async_tungstenite::tokio::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!("Websocket connect to {} failed: {}", url, err);
            let _ = events
                .send(TransportEvent::ConnectFailed(describe(&err)))
                .await;
            return;
        }
    };
    info!("🔌 Websocket connected to {}", url);
    if events.send(TransportEvent::Connected).await.is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events
                        .send(TransportEvent::Message(text.as_str().to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.as_str().to_string())
                        .unwrap_or_else(|| "closed by peer".to_string());
                    let _ = events.send(TransportEvent::Closed(reason)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    error!("Websocket read failed: {}", err);
                    let _ = events.send(TransportEvent::Closed(describe(&err))).await;
                    break;
                }
                None => {
                    let _ = events
                        .send(TransportEvent::Closed("stream ended".to_string()))
                        .await;
                    break;
                }
            },
            text = outgoing.recv() => match text {
                Ok(text) => {
                    if let Err(err) = write.send(Message::text(text)).await {
                        error!("Websocket write failed: {}", err);
                        let _ = events.send(TransportEvent::Closed(describe(&err))).await;
                        break;
                    }
                }
                // Local disconnect: the loop already knows
                Err(_) => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }
    debug!("Websocket task for {} finished", url);
}

fn describe(error: &tungstenite::Error) -> String {
    match error {
        tungstenite::Error::ConnectionClosed => "Connection closed".to_string(),
        tungstenite::Error::AlreadyClosed => "Connection was already closed".to_string(),
        tungstenite::Error::Io(io_error) => format!("Io Error: {}", io_error),
        tungstenite::Error::Protocol(proto) => format!("Protocol Error: {}", proto),
        tungstenite::Error::Url(url) => format!("Url Error: {}", url),
        tungstenite::Error::Http(response) => format!("HTTP Error: {}", response.status()),
        other => other.to_string(),
    }
}
