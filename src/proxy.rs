use {
    crate::Upstream,
    axum::{
        body::Body,
        extract::{Request, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        Router,
    },
    gatehouse_ext_auth::AuthGate,
    std::sync::Arc,
    tracing::warn,
};

/// The largest request body the proxy will buffer before relaying it.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Axum state for the reverse proxy.
#[derive(Clone)]
struct ProxyState {
    gate: Arc<AuthGate>,
    upstream: Arc<Upstream>,
}

/// Builds a router that sends every request through `gate` and relays allowed requests to `upstream`.
pub fn router(gate: AuthGate, upstream: Upstream) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(ProxyState {
            gate: Arc::new(gate),
            upstream: Arc::new(upstream),
        })
}

async fn proxy_handler(State(state): State<ProxyState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                message = "could not read request body",
                error_message = %err,
            );
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let request = http::Request::from_parts(parts, body);

    match state.gate.serve(request, state.upstream.as_ref()).await {
        Ok(response) => response.map(Body::from).into_response(),
        Err(err) => {
            warn!(
                message = "upstream failure",
                error_message = %err,
            );
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
