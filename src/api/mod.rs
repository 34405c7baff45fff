//! Router assembly and server startup.

use crate::uploads::stager;
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

use handlers::{analytics::AnalyticsState, auth::AuthState, editor::EditorState};

/// How often the pending-upload sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Slack on top of the upload ceiling for headers and encoding overhead.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Build the full application router with every layer applied.
///
/// # Errors
/// Returns an error if the configured app origin is not a valid URL.
pub fn router(
    auth: Arc<AuthState>,
    editor: Arc<EditorState>,
    analytics: Arc<AnalyticsState>,
) -> Result<Router> {
    let origin = app_origin_header(auth.config().app_origin())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(crate::csrf::CSRF_HEADER),
            HeaderName::from_static(handlers::editor::uploads::UPLOAD_FILENAME_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    let (router, _openapi) = openapi::api_router().split_for_parts();
    let app = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            // Everything here is session- or analytics-bound; never cache.
            .layer(SetResponseHeaderLayer::overriding(
                CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(cors)
            .layer(DefaultBodyLimit::max(
                crate::uploads::MAX_UPLOAD_BYTES + BODY_LIMIT_SLACK,
            ))
            .layer(Extension(auth))
            .layer(Extension(editor))
            .layer(Extension(analytics)),
    );
    Ok(app)
}

/// Start the server.
///
/// # Errors
/// Returns an error if the router cannot be built or the listener fails.
pub async fn new(
    port: u16,
    auth: Arc<AuthState>,
    editor: Arc<EditorState>,
    analytics: Arc<AnalyticsState>,
) -> Result<()> {
    // The sweep runs on its own timer, independent of request traffic.
    stager::spawn_sweeper(Arc::clone(editor.stager()), SWEEP_INTERVAL);

    let app = router(auth, editor, analytics)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;
    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn app_origin_header(app_origin: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(app_origin).with_context(|| format!("Invalid app origin: {app_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("App origin must include a valid host: {app_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build app origin header")
}
