//! Request bridge: hands request/response calls from async transports to
//! the control loop and carries exactly one reply back.

use armctl_common::{ErrorBody, Route, error::CommandError};
use async_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use bevy::prelude::*;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::orchestrator::Orchestrator;

/// Status and JSON body answering one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// HTTP-style status code
    pub status: u16,
    /// Response body
    pub body: Value,
}

impl Reply {
    /// Serializes `body` with the given status.
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => {
                error!("Could not serialize reply: {}", err);
                Self::from_body(
                    500,
                    &ErrorBody {
                        error: "Could not serialize reply".to_string(),
                        code: "internal".to_string(),
                    },
                )
            }
        }
    }

    /// `200` with `body`.
    pub fn ok<T: Serialize>(body: &T) -> Self {
        Self::json(200, body)
    }

    /// The status and body for a refused command.
    pub fn error(err: &CommandError) -> Self {
        Self::from_body(err.http_status(), &err.to_body())
    }

    /// `404 {"error":"Not found"}`.
    pub fn not_found() -> Self {
        Self::from_body(
            404,
            &ErrorBody {
                error: "Not found".to_string(),
                code: "not_found".to_string(),
            },
        )
    }

    /// `200` on success, the command's error otherwise.
    pub fn from_result<T: Serialize>(result: Result<T, CommandError>) -> Self {
        match result {
            Ok(body) => Self::ok(&body),
            Err(err) => Self::error(&err),
        }
    }

    fn from_body(status: u16, body: &ErrorBody) -> Self {
        let body = serde_json::json!({ "error": body.error, "code": body.code });
        Self { status, body }
    }
}

/// A request waiting for the loop.
#[derive(Debug)]
pub struct PendingRequest {
    /// Operation requested
    pub route: Route,
    /// Raw request body
    pub body: Vec<u8>,
    responder: Sender<Reply>,
}

impl PendingRequest {
    /// Sends the reply. A requester that stopped waiting is not an error.
    pub fn respond(self, reply: Reply) {
        if self.responder.try_send(reply).is_err() {
            debug!("Requester for {:?} went away before the reply", self.route);
        }
    }
}

/// Raised when the loop is no longer taking requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The control loop has stopped
    #[error("control loop is not running")]
    Closed,
}

/// Cloneable handle transports use to submit requests to the loop.
#[derive(Resource, Clone, Debug)]
pub struct RequestBridge {
    sender: Sender<PendingRequest>,
}

/// Loop side of the bridge.
#[derive(Resource, Debug)]
pub struct RequestInbox {
    receiver: Receiver<PendingRequest>,
}

impl RequestInbox {
    /// Next queued request, without waiting.
    pub fn try_next(&self) -> Option<PendingRequest> {
        self.receiver.try_recv().ok()
    }

    /// Waits for the next request. `None` once every bridge is dropped.
    pub async fn next(&self) -> Option<PendingRequest> {
        self.receiver.recv().await.ok()
    }
}

/// Creates a connected bridge and inbox.
pub fn request_channel() -> (RequestBridge, RequestInbox) {
    let (sender, receiver) = unbounded();
    (RequestBridge { sender }, RequestInbox { receiver })
}

impl RequestBridge {
    /// Queues a request and returns the receiver its reply will arrive on.
    pub fn submit(&self, route: Route, body: Vec<u8>) -> Result<Receiver<Reply>, BridgeError> {
        let (responder, reply) = bounded(1);
        self.sender
            .try_send(PendingRequest {
                route,
                body,
                responder,
            })
            .map_err(|err| match err {
                TrySendError::Full(_) | TrySendError::Closed(_) => BridgeError::Closed,
            })?;
        Ok(reply)
    }

    /// Submits a request and waits for its reply.
    pub async fn call(&self, route: Route, body: Vec<u8>) -> Result<Reply, BridgeError> {
        let reply = self.submit(route, body)?;
        reply.recv().await.map_err(|_| BridgeError::Closed)
    }
}

/// Answers every request that arrived since the last frame.
pub fn service_requests(inbox: Res<RequestInbox>, mut orchestrator: Orchestrator) {
    while let Some(request) = inbox.try_next() {
        let reply = orchestrator.handle(&request.route, &request.body);
        request.respond(reply);
    }
}
