//! HTTP front door.
//!
//! One route: `GET /calculate/{seed}/{input}`. Both path segments must be
//! non-negative decimal integers; anything else is a 404, matching a router
//! that only accepts `[0-9]+` segments. Values that pass the pattern but
//! overflow are a 400. Backend failures map to 500.

use crate::registry::SeedRegistry;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Builds the gateway router over the given registry.
pub fn router(registry: Arc<SeedRegistry>) -> Router {
    Router::new()
        .route("/calculate/{seed}/{input}", get(calculate_handler))
        .with_state(registry)
}

/// Serves the gateway on `0.0.0.0:{port}` until `shutdown` resolves, then
/// drains in-flight requests.
pub async fn serve<F>(registry: Arc<SeedRegistry>, port: u16, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "gateway listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Parses the two path segments and delegates to the seed registry.
async fn calculate_handler(
    State(registry): State<Arc<SeedRegistry>>,
    Path((seed, input)): Path<(String, String)>,
) -> Response {
    if !is_decimal(&seed) || !is_decimal(&input) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Ok(seed) = seed.parse::<u64>() else {
        error!(segment = %seed, "cannot parse seed");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(input) = input.parse::<u64>() else {
        error!(segment = %input, "cannot parse input");
        return StatusCode::BAD_REQUEST.into_response();
    };

    // Dropping the guard when the connection goes away cancels the token,
    // which unsubscribes this request from its seed's deduplicator.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match registry.calculate(&cancel, seed, input).await {
        Ok(value) => (StatusCode::OK, value.to_string()).into_response(),
        Err(err) => {
            error!(seed, input, error = %err, "cannot calculate result");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn is_decimal(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
