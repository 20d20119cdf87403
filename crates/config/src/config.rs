//! The config module provides the internal representation of Gatehouse's configuration.

use crate::ConfigFileError;
use serde::Serialize;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// The root of a Gatehouse configuration.
///
/// Wraps all child configuration structures and provides the internal representation of Gatehouse's configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration for the services being launched.
    pub service: Service,
    /// Configuration for the external authorization gate.
    pub ext_auth: ExtAuth,
    /// Configuration for the protected service that allowed requests are forwarded to.
    pub upstream: Upstream,
    /// Configuration for metrics collection.
    pub metrics: Metrics,
}

impl Config {
    /// Replaces the external authorization configuration, typically with one parsed from a directive file.
    ///
    /// The replacement is validated before it is accepted.
    pub fn with_ext_auth(mut self, ext_auth: ExtAuth) -> Result<Self, ConfigFileError> {
        ext_auth.validate()?;
        self.ext_auth = ext_auth;
        Ok(self)
    }
}

/// Configuration for the services being launched.
#[derive(Debug, Clone)]
pub struct Service {
    /// The port for the primary service.
    pub port: u16,
    /// The port for the admin service and health checks.
    pub admin_port: u16,
    /// True if the admin service is enabled, false otherwise.
    pub admin_enabled: bool,
}

/// The default [`Service::port`] value.
pub const DEFAULT_PORT: u16 = 8089;
/// The default [`Service::admin_port`] value.
pub const DEFAULT_ADMIN_PORT: u16 = 8090;

impl Default for Service {
    /// Default service config
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            admin_port: DEFAULT_ADMIN_PORT,
            admin_enabled: true,
        }
    }
}

/// Configuration for the external authorization gate.
///
/// Immutable once an engine has been constructed from it. Every request passing through the gate is first
/// sent to the verification service at [`ExtAuth::proxy`].
#[derive(Debug, Clone, PartialEq, Eq, Validate, Serialize)]
pub struct ExtAuth {
    /// The address of the verification service.
    #[validate(length(min = 1), custom = "validate_endpoint")]
    pub proxy: String,
    /// True if the inbound request headers should be sent to the verification service.
    ///
    /// The `X-Auth-URL` header is only sent when this is enabled, so out-of-band addressing
    /// requires it. See [`ExtAuth::router`].
    pub headers: bool,
    /// True if the inbound request cookies should be sent to the verification service.
    pub cookies: bool,
    /// The maximum amount of time to wait for the verification service.
    #[serde(with = "duration_string")]
    pub timeout: Duration,
    /// Skips certificate chain and hostname verification for `https` endpoints.
    ///
    /// This is unsafe outside of trusted networks and self-signed deployments.
    pub insecure_skip_verify: bool,
    /// Copies the inbound path, query, fragment, and user info onto the verification request URL instead of
    /// sending the inbound URL in the `X-Auth-URL` header.
    pub router: bool,
}

/// The default [`ExtAuth::headers`] value.
pub const DEFAULT_PROPAGATE_HEADERS: bool = true;
/// The default [`ExtAuth::cookies`] value.
pub const DEFAULT_PROPAGATE_COOKIES: bool = true;
/// The default [`ExtAuth::timeout`] value.
pub const DEFAULT_EXT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for ExtAuth {
    /// Default gate config. The endpoint is empty and must be supplied.
    fn default() -> Self {
        Self {
            proxy: String::new(),
            headers: DEFAULT_PROPAGATE_HEADERS,
            cookies: DEFAULT_PROPAGATE_COOKIES,
            timeout: DEFAULT_EXT_AUTH_TIMEOUT,
            insecure_skip_verify: false,
            router: false,
        }
    }
}

/// Configuration for the protected service.
#[derive(Debug, Clone, Validate)]
pub struct Upstream {
    /// The base URI that allowed requests are forwarded to.
    #[validate(length(min = 1), custom = "validate_endpoint")]
    pub uri: String,
    /// The maximum amount of time to wait for the protected service.
    pub timeout: Duration,
}

/// The default [`Upstream::timeout`] value.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for metrics collection.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// A prefix prepended to every exported metric name. Empty for none.
    pub prefix: String,
}

/// Prefixes an endpoint with `http://` if it does not specify a scheme.
///
/// Endpoints such as `testserver:9000` would otherwise parse with `testserver` as the scheme.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() || endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

/// Checks that an endpoint is an absolute `http` or `https` URL with a host.
fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let url = url::Url::parse(endpoint).map_err(|_| ValidationError::new("invalid_url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::new("unsupported_scheme"));
    }
    if url.host_str().is_none() {
        return Err(ValidationError::new("missing_host"));
    }
    Ok(())
}

/// Serializes durations in the same string form the loaders accept.
mod duration_string {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&crate::format_duration(*duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("testserver:9000"),
            "http://testserver:9000"
        );
        assert_eq!(
            normalize_endpoint("https://testserver:9000"),
            "https://testserver:9000"
        );
        assert_eq!(normalize_endpoint("  "), "");
    }

    #[test]
    fn test_ext_auth_defaults() {
        let ext_auth = ExtAuth::default();
        assert!(ext_auth.headers);
        assert!(ext_auth.cookies);
        assert!(!ext_auth.router);
        assert!(!ext_auth.insecure_skip_verify);
        assert_eq!(ext_auth.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_ext_auth_validation() {
        let mut ext_auth = ExtAuth {
            proxy: "https://auth.internal:9000/verify".to_string(),
            ..Default::default()
        };
        assert!(ext_auth.validate().is_ok());

        ext_auth.proxy = String::new();
        assert!(ext_auth.validate().is_err());

        ext_auth.proxy = "ftp://auth.internal".to_string();
        assert!(ext_auth.validate().is_err());

        ext_auth.proxy = "not a url".to_string();
        assert!(ext_auth.validate().is_err());
    }
}
