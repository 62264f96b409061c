//! Plain request/response adapter.
//!
//! Every HTTP request is resolved to a [`Route`] and forwarded through the
//! [`RequestBridge`]; the adapter itself holds no orchestrator state.

use armctl_common::Route;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bevy::prelude::*;
use serde_json::json;
use tracing::{error, info};

use crate::{requests::RequestBridge, runtime::ArmctlRuntime, settings::HttpSettings};

/// Router forwarding every request to the control loop.
pub fn router(bridge: RequestBridge, max_body_bytes: usize) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(bridge)
}

async fn dispatch(
    State(bridge): State<RequestBridge>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let route = Route::resolve(method.as_str(), uri.path());
    match bridge.call(route, body.to_vec()).await {
        Ok(reply) => {
            let status =
                StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(reply.body)).into_response()
        }
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": err.to_string(), "code": "unavailable" })),
        )
            .into_response(),
    }
}

/// Starts the HTTP listener on the shared runtime.
pub fn start_http_adapter(
    runtime: Res<ArmctlRuntime>,
    bridge: Res<RequestBridge>,
    settings: Res<HttpSettings>,
) {
    if !settings.enabled {
        info!("HTTP adapter disabled");
        return;
    }
    let app = router(bridge.clone(), settings.max_body_bytes);
    let bind = settings.bind.clone();
    runtime.spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("Could not bind HTTP adapter to {}: {}", bind, err);
                return;
            }
        };
        info!("🌐 Serving requests on http://{}", bind);
        if let Err(err) = axum::serve(listener, app).await {
            error!("HTTP adapter stopped: {}", err);
        }
    });
}

/// Serves the request routes over HTTP once the app starts.
///
/// Needs an [`ArmctlRuntime`] resource; [`HttpSettings`] default when absent.
#[derive(Default, Debug, Clone, Copy)]
pub struct HttpAdapterPlugin;

impl Plugin for HttpAdapterPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<HttpSettings>();
        app.add_systems(
            Startup,
            start_http_adapter.run_if(resource_exists::<ArmctlRuntime>),
        );
    }
}
