//! The two mutually exclusive strategies for telling the verification service which resource was requested.

use crate::VerificationError;
use http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};
use url::Url;

/// The header carrying the inbound URL in [`Addressing::OutOfBand`] mode.
pub const X_AUTH_URL: HeaderName = HeaderName::from_static("x-auth-url");

/// Selects how the inbound request's target is conveyed to the verification service.
///
/// Chosen once when the gate is constructed and never mixed within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// The verification request targets the endpoint verbatim and the inbound URL travels in
    /// the [`X_AUTH_URL`] header.
    ///
    /// The header is part of header propagation, so with propagation disabled the verification service has no
    /// way to recover the inbound URL.
    OutOfBand,
    /// The inbound user info, path, and query replace those of the endpoint URL so the verification service can
    /// route by path.
    PathReplicated,
}

impl Addressing {
    /// Maps the `router` configuration flag to an addressing strategy.
    pub fn from_router_flag(router: bool) -> Self {
        if router {
            Addressing::PathReplicated
        } else {
            Addressing::OutOfBand
        }
    }

    /// A short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Addressing::OutOfBand => "out-of-band",
            Addressing::PathReplicated => "path-replicated",
        }
    }

    /// Produces the verification request URL for this strategy.
    ///
    /// Path replication reads the path and query straight from the request target, so it does not depend on the
    /// inbound host being known.
    pub(crate) fn target<B>(
        &self,
        endpoint: &Url,
        inbound: &Request<B>,
    ) -> Result<Url, VerificationError> {
        match self {
            Addressing::OutOfBand => Ok(endpoint.clone()),
            Addressing::PathReplicated => replicate_path(endpoint, inbound.uri()),
        }
    }

    /// Adds any headers this strategy requires. Only called when headers are propagated.
    pub(crate) fn decorate<B>(
        &self,
        headers: &mut HeaderMap,
        inbound: &Request<B>,
    ) -> Result<(), VerificationError> {
        match self {
            Addressing::OutOfBand => {
                // Inserted after the bulk copy, so a client-supplied value never survives.
                headers.insert(X_AUTH_URL, side_channel_value(inbound)?);
                Ok(())
            }
            Addressing::PathReplicated => Ok(()),
        }
    }
}

/// The [`X_AUTH_URL`] value: the absolute inbound URL, or the request target as received when no host is known.
fn side_channel_value<B>(inbound: &Request<B>) -> Result<HeaderValue, VerificationError> {
    let value = match inbound_url(inbound) {
        Ok(url) => url.to_string(),
        Err(_) => inbound.uri().to_string(),
    };
    Ok(HeaderValue::from_str(&value)?)
}

/// Keeps the endpoint's scheme, host, and port and takes the user info, path, and query from the request target.
///
/// A received request target never carries a fragment, so any fragment on the endpoint is cleared.
fn replicate_path(endpoint: &Url, inbound: &Uri) -> Result<Url, VerificationError> {
    let (username, password) = user_info(inbound);
    let mut target = endpoint.clone();
    target
        .set_username(username)
        .map_err(|_| VerificationError::Addressing(String::from("cannot set user info")))?;
    target
        .set_password(password)
        .map_err(|_| VerificationError::Addressing(String::from("cannot set user info")))?;
    target.set_path(inbound.path());
    target.set_query(inbound.query());
    target.set_fragment(None);
    Ok(target)
}

/// Splits the `user:password` prefix off an absolute-form authority.
fn user_info(uri: &Uri) -> (&str, Option<&str>) {
    match uri
        .authority()
        .and_then(|authority| authority.as_str().rsplit_once('@'))
    {
        Some((info, _)) => match info.split_once(':') {
            Some((username, password)) => (username, Some(password)),
            None => (info, None),
        },
        None => ("", None),
    }
}

/// Reconstructs the absolute URL of an inbound request.
///
/// Requests received by a server usually carry an origin-form target like `/path?query`, in which case the
/// scheme defaults to `http` and the authority comes from the `Host` header.
pub fn inbound_url<B>(request: &Request<B>) -> Result<Url, VerificationError> {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|err| VerificationError::InboundUrl(err.to_string()));
    }

    let host = inbound_host(request)
        .ok_or_else(|| VerificationError::InboundUrl(String::from("missing host")))?;
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{}{}", host, path_and_query))
        .map_err(|err| VerificationError::InboundUrl(err.to_string()))
}

/// The host the client addressed: the `Host` header if present, otherwise the request target's authority.
pub fn inbound_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(|host| host.to_string())
        .or_else(|| {
            request
                .uri()
                .authority()
                .map(|authority| authority.host().to_string())
                .zip(request.uri().port_u16())
                .map(|(host, port)| format!("{}:{}", host, port))
                .or_else(|| request.uri().host().map(|host| host.to_string()))
        })
}
