//! The gate module contains the decision engine that consults the verification service for every request.

use {
    crate::{
        cookies, Addressing, GateInitError, RequestBuilder, Transport, VerificationError,
        VerificationResponse,
    },
    async_trait::async_trait,
    bytes::Bytes,
    gatehouse_config::ExtAuth,
    http::{header, Request, Response, StatusCode},
    std::{fmt, time::Instant},
    tracing::{debug, info, instrument, warn},
    url::Url,
};

/// The next handler in the chain, invoked with the enriched request when the verification service allows it.
#[async_trait]
pub trait Next<B: Send + 'static>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handles an allowed request, producing the response the client will see.
    async fn handle(&self, request: Request<B>) -> Result<Response<Bytes>, Self::Error>;
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The configured endpoint could not be parsed.
    EndpointResolution,
    /// The verification request could not be constructed from the inbound request.
    InvalidRequest,
    /// The verification service could not be reached or its response could not be read.
    Transport,
    /// The verification service answered with a status other than 200.
    DeniedByPolicy(StatusCode),
}

impl DenialReason {
    /// A short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::EndpointResolution => "endpoint_resolution",
            DenialReason::InvalidRequest => "invalid_request",
            DenialReason::Transport => "transport",
            DenialReason::DeniedByPolicy(_) => "denied_by_policy",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&VerificationError> for DenialReason {
    fn from(err: &VerificationError) -> Self {
        match err {
            VerificationError::EndpointResolution { .. } => DenialReason::EndpointResolution,
            VerificationError::Transport(_) => DenialReason::Transport,
            VerificationError::Addressing(_)
            | VerificationError::InboundUrl(_)
            | VerificationError::InvalidHeaderValue(_) => DenialReason::InvalidRequest,
        }
    }
}

/// A denial, always answered with `401 Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenialReason,
    /// The verification service's response body, or empty when the gate itself failed.
    pub body: Bytes,
}

impl Denial {
    /// The status code written for every denial, whatever the verification service answered.
    pub const STATUS: StatusCode = StatusCode::UNAUTHORIZED;

    fn internal(reason: DenialReason) -> Self {
        Self {
            reason,
            body: Bytes::new(),
        }
    }

    /// Converts the denial into the response written to the client.
    pub fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = Self::STATUS;
        response
    }
}

/// The outcome of consulting the verification service.
#[derive(Debug)]
pub enum Decision<B> {
    /// Carries the inbound request, enriched with the verification response's headers and cookies.
    Allow(Request<B>),
    Deny(Denial),
}

impl<B> Decision<B> {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    fn outcome(&self) -> &'static str {
        if self.is_allowed() {
            "allowed"
        } else {
            "denied"
        }
    }
}

/// The verification endpoint, resolved once at construction.
#[derive(Debug, Clone)]
enum Endpoint {
    Resolved(Url),
    Unresolved {
        endpoint: String,
        error: url::ParseError,
    },
}

/// The `AuthGate` decides whether each inbound request may proceed by consulting an external verification
/// service.
///
/// Any failure on the authorization path results in a denial. The gate holds no per-request state, so a single
/// instance can serve any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct AuthGate {
    endpoint: Endpoint,
    builder: RequestBuilder,
    transport: Transport,
}

impl AuthGate {
    /// Creates a new [`AuthGate`] with its own transport.
    ///
    /// # Arguments
    ///
    /// * `config` - The external authorization configuration. An empty endpoint is rejected.
    pub fn new(config: &ExtAuth) -> Result<Self, GateInitError> {
        Self::with_transport(config, Transport::new(config)?)
    }

    /// Creates a new [`AuthGate`] that sends verification requests through `client`.
    pub fn with_client(config: &ExtAuth, client: reqwest::Client) -> Result<Self, GateInitError> {
        Self::with_transport(config, Transport::with_client(client, config.timeout))
    }

    /// Creates a new [`AuthGate`] from a prepared [`Transport`].
    pub fn with_transport(config: &ExtAuth, transport: Transport) -> Result<Self, GateInitError> {
        if config.proxy.trim().is_empty() {
            return Err(GateInitError::MissingEndpoint);
        }
        let endpoint = match Url::parse(&config.proxy) {
            Ok(url) => Endpoint::Resolved(url),
            Err(error) => {
                warn!(
                    message = "unresolvable endpoint",
                    endpoint = config.proxy.as_str(),
                    error_message = %error,
                );
                Endpoint::Unresolved {
                    endpoint: config.proxy.clone(),
                    error,
                }
            }
        };
        let addressing = Addressing::from_router_flag(config.router);
        if addressing == Addressing::OutOfBand && !config.headers {
            warn!(
                message = "out-of-band addressing without header propagation",
                endpoint = config.proxy.as_str(),
            );
        }
        info!(
            message = "load ext_auth",
            endpoint = config.proxy.as_str(),
            addressing = addressing.as_str(),
            headers = config.headers,
            cookies = config.cookies,
            timeout = ?transport.timeout(),
        );
        Ok(Self {
            endpoint,
            builder: RequestBuilder {
                addressing,
                propagate_headers: config.headers,
                propagate_cookies: config.cookies,
            },
            transport,
        })
    }

    /// The addressing strategy selected at construction.
    pub fn addressing(&self) -> Addressing {
        self.builder.addressing
    }

    /// Consults the verification service about `request`.
    ///
    /// A single attempt is made. On a `200 OK` the request is allowed after enrichment: the verification
    /// response's cookies are added to the request's cookies and its header set replaces the request's headers.
    /// Any other status is denied with the response body. Any error is denied with an empty body.
    #[instrument(name = "verify request", skip(self, request))]
    pub async fn decide<B: Send>(&self, request: Request<B>) -> Decision<B> {
        info!(
            message = "process request",
            method = request.method().as_str(),
            uri = request.uri().to_string(),
            user_agent = request
                .headers()
                .get(header::USER_AGENT)
                .map(|ua| ua.to_str().unwrap_or_default())
        );

        let started = Instant::now();
        let decision = match self.verify(&request).await {
            Ok(response) => Self::interpret(request, response),
            Err(err) => {
                warn!(
                    message = "verification failed",
                    error_message = %err,
                );
                Decision::Deny(Denial::internal(DenialReason::from(&err)))
            }
        };
        let elapsed = started.elapsed().as_secs_f64();
        metrics::histogram!("verification_duration_seconds").record(elapsed);

        let (reason, status) = match &decision {
            Decision::Allow(_) => ("allowed", StatusCode::OK.as_u16()),
            Decision::Deny(denial) => (
                denial.reason.as_str(),
                match denial.reason {
                    DenialReason::DeniedByPolicy(status) => status.as_u16(),
                    _ => 0,
                },
            ),
        };
        metrics::counter!(
            "gate_decision_total",
            "outcome" => decision.outcome(),
            "reason" => reason
        )
        .increment(1);
        info!(
            message = "verification decision",
            outcome = decision.outcome(),
            reason = reason,
            verification_status = status,
            elapsed = elapsed,
        );

        decision
    }

    /// Runs `request` through the gate, forwarding it to `next` if allowed.
    ///
    /// Exactly one response is produced: either the next handler's or a `401 Unauthorized`. Errors from the
    /// next handler are returned unchanged for the hosting server to answer.
    pub async fn serve<B, N>(&self, request: Request<B>, next: &N) -> Result<Response<Bytes>, N::Error>
    where
        B: Send + 'static,
        N: Next<B> + ?Sized,
    {
        let response = match self.decide(request).await {
            Decision::Allow(request) => next.handle(request).await?,
            Decision::Deny(denial) => denial.into_response(),
        };
        info!(
            message = "process response",
            status = response.status().as_u16(),
        );
        Ok(response)
    }

    async fn verify<B>(&self, request: &Request<B>) -> Result<VerificationResponse, VerificationError> {
        let endpoint = match &self.endpoint {
            Endpoint::Resolved(url) => url,
            Endpoint::Unresolved { endpoint, error } => {
                return Err(VerificationError::EndpointResolution {
                    endpoint: endpoint.clone(),
                    source: *error,
                })
            }
        };
        let verification_request = self.builder.build(endpoint, request)?;
        debug!(
            message = "send verification request",
            url = verification_request.url.as_str(),
        );
        self.transport.send(verification_request).await
    }

    fn interpret<B>(mut request: Request<B>, response: VerificationResponse) -> Decision<B> {
        if response.status != StatusCode::OK {
            return Decision::Deny(Denial {
                reason: DenialReason::DeniedByPolicy(response.status),
                body: response.body,
            });
        }

        let mut jar = cookies::request_cookies(request.headers());
        for cookie in cookies::response_cookies(&response.headers) {
            if !jar.contains(&cookie) {
                jar.push(cookie);
            }
        }
        *request.headers_mut() = response.headers;
        if !jar.is_empty() {
            cookies::set_cookies(request.headers_mut(), &jar);
        }
        Decision::Allow(request)
    }
}
