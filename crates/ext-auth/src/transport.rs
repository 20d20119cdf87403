//! The outbound HTTP client used to reach the verification service.

use crate::{GateInitError, VerificationError, VerificationRequest};
use bytes::Bytes;
use gatehouse_config::ExtAuth;
use http::{HeaderMap, StatusCode};
use std::time::Duration;
use tracing::warn;

/// A reusable client shared by every request passing through one gate.
///
/// The timeout and TLS policy are fixed when the transport is built and never change afterwards.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    timeout: Duration,
}

/// A verification service response whose body has been read to completion.
#[derive(Debug, Clone)]
pub struct VerificationResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Transport {
    /// Builds a transport from the gate configuration.
    ///
    /// Certificate verification is only relaxed when `insecure_skip_verify` is set and the endpoint is `https`.
    pub fn new(config: &ExtAuth) -> Result<Self, GateInitError> {
        let skip_verify = config.insecure_skip_verify && is_secure(&config.proxy);
        if skip_verify {
            warn!(
                message = "tls verification disabled",
                endpoint = config.proxy.as_str(),
            );
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(skip_verify)
            .build()?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    /// Wraps an existing client. The timeout still applies to every request.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The maximum time a single verification call may take.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a verification request and reads the whole response body.
    ///
    /// Reading the body on every path releases the connection back to the pool.
    pub async fn send(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationResponse, VerificationError> {
        let response = self
            .client
            .request(VerificationRequest::METHOD, request.url)
            .headers(request.headers)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(VerificationResponse {
            status,
            headers,
            body,
        })
    }
}

fn is_secure(endpoint: &str) -> bool {
    url::Url::parse(endpoint)
        .map(|url| url.scheme() == "https")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_secure() {
        assert!(is_secure("https://auth.internal:9443"));
        assert!(!is_secure("http://auth.internal:9001"));
        assert!(!is_secure("::not a url::"));
    }

    #[test]
    fn test_new_transport() -> Result<(), Box<dyn std::error::Error>> {
        let config = ExtAuth {
            proxy: "https://auth.internal:9443".to_string(),
            timeout: Duration::from_secs(3),
            insecure_skip_verify: true,
            ..Default::default()
        };
        let transport = Transport::new(&config)?;
        assert_eq!(transport.timeout(), Duration::from_secs(3));

        Ok(())
    }
}
