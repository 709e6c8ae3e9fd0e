//! HTTP surface: router, middleware stack and server lifecycle.
//!
//! Layer order, outermost first: panic recovery, request id, trace, request
//! timeout, body limit, rate limiter, authentication stage, per-route gates,
//! handler.

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware,
    response::Response,
    routing::{get, post, put},
};
use std::any::Any;
use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::gateway::{Gate, admit, error::INTERNAL_MESSAGE, error::error_envelope, gated};

pub mod error;
pub mod handlers;
mod openapi;
pub mod state;
pub mod validation;

pub use openapi::openapi;
use state::ApiState;

const REQUEST_ID: &str = "x-request-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TIMEOUT_MESSAGE: &str = "the server timed out while handling your request";

/// Build the application router around `state`.
#[must_use]
pub fn router(state: ApiState) -> Router {
    let gateway = &state.gateway;

    let routes = Router::new()
        .route("/v1/healthcheck", get(handlers::health::healthcheck))
        .route("/v1/users", post(handlers::users::register))
        .route("/v1/users/activated", put(handlers::users::activate))
        .route(
            "/v1/tokens/authentication",
            post(handlers::tokens::create_authentication_token),
        )
        .route(
            "/v1/tokens/password-reset",
            post(handlers::tokens::create_password_reset_token),
        )
        .route(
            "/v1/users/me",
            gated(get(handlers::users::me), gateway, Gate::Activated),
        )
        .route(
            "/v1/users/me/permissions",
            gated(get(handlers::users::my_permissions), gateway, Gate::Activated),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .fallback(handlers::not_found);

    admit(routes, gateway).layer(
        ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(middleware::map_response(timeout_envelope))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                REQUEST_TIMEOUT,
            ))
            .layer(DefaultBodyLimit::max(error::MAX_BODY_BYTES))
            .layer(Extension(state.clone())),
    )
}

/// Serve `state` on `[::]:port` until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, state: ApiState) -> Result<()> {
    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");

    let mut response = error_envelope(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE);
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

// `TimeoutLayer` answers with a bare 408; give it the usual envelope.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(header::CONTENT_TYPE)
    {
        return error_envelope(StatusCode::REQUEST_TIMEOUT, TIMEOUT_MESSAGE);
    }
    response
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.uri = %request.uri(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn bare_timeout_gets_an_envelope() -> anyhow::Result<()> {
        let bare = Response::builder()
            .status(StatusCode::REQUEST_TIMEOUT)
            .body(Body::empty())?;
        let response = timeout_envelope(bare).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        assert_eq!(body["error"], TIMEOUT_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn other_responses_pass_through() -> anyhow::Result<()> {
        let ok = Response::builder().status(StatusCode::OK).body(Body::from("fine"))?;
        let response = timeout_envelope(ok).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], b"fine");
        Ok(())
    }

    #[test]
    fn span_records_method_and_uri() {
        let Ok(request) = Request::builder()
            .method("DELETE")
            .uri("/v1/users/me?verbose=1")
            .body(Body::empty())
        else {
            panic!("request should build");
        };
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = make_span(&request);
            let fields = span.metadata().map(tracing::Metadata::fields);
            assert!(fields.is_some_and(|fields| fields.field("http.uri").is_some()));
            assert!(fields.is_some_and(|fields| fields.field("http.method").is_some()));
        });
    }
}
