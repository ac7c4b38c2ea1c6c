use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    pipeline::{Pipeline, ResolutionOutcome},
    resolver::BrowserLauncher,
};

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Builds the HTTP surface. The portal route is only mounted when a portal
/// template is configured.
pub fn router<L: BrowserLauncher + 'static>(pipeline: Arc<Pipeline<L>>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/streams/{filename}", get(named_stream::<L>));

    if pipeline.portal().is_some() {
        router = router.route("/live/{stream}", get(portal_stream::<L>));
    }

    router.with_state(pipeline)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn named_stream<L: BrowserLauncher>(
    State(pipeline): State<Arc<Pipeline<L>>>,
    Path(filename): Path<String>,
) -> Response {
    info!("Requested stream: {filename}");
    assemble(pipeline.serve_named(&filename).await)
}

#[derive(Debug, Deserialize)]
struct PortalQuery {
    mac: Option<String>,
}

async fn portal_stream<L: BrowserLauncher>(
    State(pipeline): State<Arc<Pipeline<L>>>,
    Path(stream): Path<String>,
    Query(query): Query<PortalQuery>,
) -> Response {
    info!("Requested portal stream: {stream}");
    assemble(pipeline.serve_portal(&stream, query.mac.as_deref()).await)
}

/// Maps a [`ResolutionOutcome`] onto status + headers + body. Every response,
/// success or placeholder, is a syntactically valid playlist with the same
/// fixed header set, so player clients never see malformed input or raw
/// error text.
fn assemble(outcome: ResolutionOutcome) -> Response {
    let (status, body) = match outcome {
        ResolutionOutcome::Success(body) => (StatusCode::OK, body),
        ResolutionOutcome::InvalidRequest => (
            StatusCode::BAD_REQUEST,
            placeholder("Invalid or missing stream name"),
        ),
        ResolutionOutcome::NotFound => (StatusCode::NOT_FOUND, placeholder("Stream not found")),
        ResolutionOutcome::RegistryUnavailable => (
            StatusCode::INTERNAL_SERVER_ERROR,
            placeholder("Failed to load stream configuration"),
        ),
        ResolutionOutcome::UpstreamTimeout => (
            StatusCode::INTERNAL_SERVER_ERROR,
            placeholder("Upstream page never produced a playlist URL"),
        ),
        ResolutionOutcome::FetchFailure(Some(code)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            placeholder(&format!("Failed to fetch playlist (HTTP {code})")),
        ),
        ResolutionOutcome::FetchFailure(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            placeholder("Failed to fetch playlist (no response)"),
        ),
    };

    (
        status,
        [
            (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Minimal well-formed empty playlist carrying a failure comment.
fn placeholder(comment: &str) -> String {
    format!("#EXTM3U\n#EXTINF:-1,Error\n#EXT-X-ENDLIST\n# {comment}")
}
