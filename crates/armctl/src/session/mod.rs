//! Session link to the movement backend.
//!
//! The backend pushes `final_movements` events over an Engine.IO v4 /
//! Socket.IO session. [`SessionClient`] is the protocol state machine; a
//! [`SessionTransport`] moves text frames; [`SessionLink`] pairs the two as a
//! resource and [`drive_session`] runs it once per frame.

mod client;
mod transport;

pub use client::*;
pub use transport::*;

use std::marker::PhantomData;

use armctl_common::{
    codec::{ENGINE_IO_PATH, ENGINE_IO_QUERY},
    error::SessionError,
};
use bevy::prelude::*;
use tracing::{info, warn};
use url::Url;

use crate::{ControlLoopSet, orchestrator::Orchestrator, settings::SessionSettings};

/// A transport and the client state driving it.
#[derive(Resource)]
pub struct SessionLink<T: SessionTransport> {
    transport: T,
    client: SessionClient,
    url: String,
}

impl<T: SessionTransport> SessionLink<T> {
    /// Builds a link for `settings.url`. The first connect happens on the
    /// first frame.
    ///
    /// A `wss` address is refused here when the transport cannot do TLS, so
    /// a bad setting fails once at boot instead of on every reconnect.
    pub fn new(transport: T, settings: &SessionSettings) -> Result<Self, SessionError> {
        let url = engine_io_url(&settings.url)?;
        if url.starts_with("wss:") && !transport.supports_tls() {
            return Err(SessionError::InvalidUrl(format!(
                "{}: this transport cannot reach wss endpoints",
                settings.url
            )));
        }
        Ok(Self {
            transport,
            client: SessionClient::new(settings),
            url,
        })
    }

    /// Protocol state.
    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    fn perform(&mut self, actions: Vec<SessionAction>, orchestrator: &mut Orchestrator) {
        for action in actions {
            match action {
                SessionAction::Connect => {
                    if let Err(err) = self.transport.connect(&self.url) {
                        let now = orchestrator.now();
                        let follow_up = self
                            .client
                            .on_transport(TransportEvent::ConnectFailed(err.to_string()), now);
                        self.perform(follow_up, orchestrator);
                    }
                }
                SessionAction::Send(text) => {
                    if let Err(err) = self.transport.send(text) {
                        warn!("Session send failed: {}", err);
                    }
                }
                SessionAction::Disconnect => self.transport.disconnect(),
                SessionAction::RunSequence {
                    payload,
                    encoded_len,
                } => orchestrator.run_pushed_sequence(payload, encoded_len),
            }
        }
    }
}

/// Turns a backend base address into the Engine.IO websocket endpoint.
///
/// `http`/`https` are mapped to `ws`/`wss`; an address that already names a
/// path is used unchanged.
pub fn engine_io_url(base: &str) -> Result<String, SessionError> {
    let mut url =
        Url::parse(base).map_err(|err| SessionError::InvalidUrl(format!("{base}: {err}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SessionError::InvalidUrl(format!(
                "{base}: unsupported scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SessionError::InvalidUrl(format!("{base}: cannot use {scheme}")))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(ENGINE_IO_PATH);
        url.set_query(Some(ENGINE_IO_QUERY));
    }
    Ok(url.into())
}

/// Advances the session link by one frame: connect attempts, transport
/// events, liveness.
pub fn drive_session<T: SessionTransport>(
    mut link: ResMut<SessionLink<T>>,
    mut orchestrator: Orchestrator,
) {
    let now = orchestrator.now();
    let link = &mut *link;

    if let Some(action) = link.client.poll_connect(now) {
        info!("🔗 Connecting to {}", link.url);
        link.perform(vec![action], &mut orchestrator);
    }

    while let Some(event) = link.transport.poll() {
        let actions = link.client.on_transport(event, now);
        link.perform(actions, &mut orchestrator);
    }

    let actions = link.client.check_liveness(now);
    link.perform(actions, &mut orchestrator);
}

/// Runs a [`SessionLink<T>`] in the control loop.
///
/// The link itself is inserted by the application, since building a
/// transport usually needs a runtime handle.
pub struct SessionLinkPlugin<T: SessionTransport>(PhantomData<T>);

impl<T: SessionTransport> Default for SessionLinkPlugin<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: SessionTransport> Plugin for SessionLinkPlugin<T> {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            drive_session::<T>
                .run_if(resource_exists::<SessionLink<T>>)
                .in_set(ControlLoopSet::Session),
        );
    }
}
