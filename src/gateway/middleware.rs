//! axum middleware for the three admission stages.
//!
//! [`admit`] installs the limiter (outer) and the authentication stage
//! (inner) on a router. [`gated`] wraps a single route with an authorization
//! gate; it relies on the authentication stage having already put an
//! [`Identity`] into the request extensions and fails closed when it has not.

use anyhow::anyhow;
use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use super::authenticate::resolve_identity;
use super::authorize::Gate;
use super::error::AdmissionError;
use super::identity::Identity;
use super::rate_limit::RateLimitDecision;
use super::Gateway;

/// Apply the rate limiter and authentication stage to every route in `router`.
pub fn admit<S>(router: Router<S>, gateway: &Arc<Gateway>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn_with_state(Arc::clone(gateway), authenticate))
        .layer(middleware::from_fn_with_state(Arc::clone(gateway), throttle))
}

/// Protect `route` with `gate`.
pub fn gated<S>(route: MethodRouter<S>, gateway: &Arc<Gateway>, gate: Gate) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    let state = GateState {
        gateway: Arc::clone(gateway),
        gate: Arc::new(gate),
    };
    route.route_layer(middleware::from_fn_with_state(state, enforce))
}

/// Rate-limit key for a request: trusted proxy headers first (when enabled),
/// then the socket peer address.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> Option<String> {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return Some(ip.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|value| value.parse::<IpAddr>().ok());
    if forwarded.is_some() {
        return forwarded;
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// Refuse the request with 429 once the client's bucket is empty.
pub async fn throttle(
    State(gateway): State<Arc<Gateway>>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = gateway.limiter();
    if !limiter.enabled() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let Some(key) = client_key(request.headers(), peer, gateway.trust_proxy_headers()) else {
        return AdmissionError::Internal(anyhow!("could not determine client address"))
            .into_response();
    };

    match limiter.check(&key) {
        RateLimitDecision::Allowed => next.run(request).await,
        RateLimitDecision::Limited => {
            debug!(client = %key, "rate limited");
            AdmissionError::RateLimited.into_response()
        }
    }
}

/// Resolve the caller and store the [`Identity`] in the request extensions.
///
/// Every response is marked `Vary: Authorization`, including rejections.
pub async fn authenticate(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = resolve_identity(
        request.headers(),
        gateway.tokens(),
        gateway.lookup_timeout(),
    )
    .await;

    let mut response = match resolved {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

#[derive(Clone)]
struct GateState {
    gateway: Arc<Gateway>,
    gate: Arc<Gate>,
}

async fn enforce(State(state): State<GateState>, request: Request, next: Next) -> Response {
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return AdmissionError::Internal(anyhow!("gated route reached without an identity"))
            .into_response();
    };

    match state
        .gate
        .evaluate(
            &identity,
            state.gateway.permissions(),
            state.gateway.lookup_timeout(),
        )
        .await
    {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([192, 0, 2, 10], 51_000)))
    }

    #[test]
    fn peer_address_is_the_default_key() {
        let proxied = headers(&[("x-forwarded-for", "1.2.3.4")]);
        assert_eq!(client_key(&proxied, peer(), false), Some("192.0.2.10".to_string()));
    }

    #[test]
    fn trusted_proxy_headers_take_precedence() {
        let proxied = headers(&[
            ("x-forwarded-for", "1.2.3.4, 5.6.7.8"),
            ("x-real-ip", "9.9.9.9"),
        ]);
        assert_eq!(client_key(&proxied, peer(), true), Some("1.2.3.4".to_string()));

        let real_ip = headers(&[("x-real-ip", " 2001:db8::1 ")]);
        assert_eq!(client_key(&real_ip, peer(), true), Some("2001:db8::1".to_string()));
    }

    #[test]
    fn unparseable_proxy_headers_fall_back_to_peer() {
        let junk = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "")]);
        assert_eq!(client_key(&junk, peer(), true), Some("192.0.2.10".to_string()));
    }

    #[test]
    fn no_source_address_yields_no_key() {
        assert_eq!(client_key(&HeaderMap::new(), None, true), None);
        assert_eq!(client_key(&HeaderMap::new(), None, false), None);
    }

    #[test]
    fn peer_port_is_not_part_of_the_key() {
        let first = client_key(&HeaderMap::new(), Some(SocketAddr::from(([10, 0, 0, 1], 1000))), false);
        let second = client_key(&HeaderMap::new(), Some(SocketAddr::from(([10, 0, 0, 1], 2000))), false);
        assert_eq!(first, second);
    }
}
