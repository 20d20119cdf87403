//! Translates an inbound request into the request sent to the verification service.

use crate::{addressing::inbound_host, cookies, Addressing, VerificationError};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request};
use url::Url;

/// Headers describing a single connection or a message body. None of them apply to the body-less
/// verification request.
const NON_FORWARDED_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
    header::EXPECT,
];

/// A fully built request to the verification service.
///
/// The method is always `GET` and there is never a body.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl VerificationRequest {
    /// The method every verification request is sent with.
    pub const METHOD: Method = Method::GET;
}

/// Builds [`VerificationRequest`]s from inbound requests according to a fixed propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBuilder {
    pub addressing: Addressing,
    pub propagate_headers: bool,
    pub propagate_cookies: bool,
}

impl RequestBuilder {
    /// Builds the verification request for `inbound`, addressed at `endpoint`.
    ///
    /// Header propagation copies the inbound header set, forces `Host` to the inbound host when one is known, and
    /// then lets the addressing strategy add its own headers. A request without any host is still built. Cookie propagation re-serializes the inbound cookie pairs into a
    /// single `Cookie` header, replacing any raw copy. With cookie propagation off, no cookies are sent.
    pub fn build<B>(
        &self,
        endpoint: &Url,
        inbound: &Request<B>,
    ) -> Result<VerificationRequest, VerificationError> {
        let url = self.addressing.target(endpoint, inbound)?;

        let mut headers = HeaderMap::new();
        if self.propagate_headers {
            headers = inbound.headers().clone();
            for name in NON_FORWARDED_HEADERS.iter() {
                headers.remove(name);
            }
            if let Some(host) = inbound_host(inbound) {
                headers.insert(header::HOST, HeaderValue::from_str(&host)?);
            }
            self.addressing.decorate(&mut headers, inbound)?;
        }

        if self.propagate_cookies {
            cookies::set_cookies(&mut headers, &cookies::request_cookies(inbound.headers()));
        } else {
            headers.remove(header::COOKIE);
        }

        Ok(VerificationRequest { url, headers })
    }
}
