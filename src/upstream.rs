use {
    async_trait::async_trait,
    bytes::Bytes,
    gatehouse_ext_auth::Next,
    http::{header, HeaderMap, HeaderName, Request, Response},
    std::time::Duration,
    tracing::debug,
    url::Url,
};

/// Headers that describe a single hop or the framing of a message body. They are never forwarded in either
/// direction because the proxy re-frames every message it relays.
const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("keep-alive"),
];

/// Returned when an allowed request cannot be relayed to the protected service.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("invalid upstream uri '{0}': {1}")]
    InvalidUri(String, url::ParseError),
    #[error("could not build upstream client: {0}")]
    Client(reqwest::Error),
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid upstream response: {0}")]
    Response(#[from] http::Error),
}

/// Relays allowed requests to the protected service.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    /// Creates a new [`Upstream`] forwarding to `config.uri`.
    pub fn new(config: &gatehouse_config::Upstream) -> Result<Self, UpstreamError> {
        let base = Url::parse(&config.uri)
            .map_err(|err| UpstreamError::InvalidUri(config.uri.clone(), err))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            // Redirects are the client's business, not the proxy's.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self { client, base })
    }

    /// Creates a new [`Upstream`] with a default timeout, primarily for tests.
    pub fn with_base(base: Url) -> Result<Self, UpstreamError> {
        Self::new(&gatehouse_config::Upstream {
            uri: base.to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Joins the inbound path and query onto the base URI.
    fn target(&self, uri: &http::Uri) -> Url {
        let mut target = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        target.set_path(&format!("{}{}", base_path, uri.path()));
        target.set_query(uri.query());
        target
    }
}

/// Removes every header that must not cross the proxy.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS.iter() {
        headers.remove(name);
    }
}

#[async_trait]
impl Next<Bytes> for Upstream {
    type Error = UpstreamError;

    async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Self::Error> {
        let (parts, body) = request.into_parts();
        let target = self.target(&parts.uri);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!(
            message = "forward request",
            method = parts.method.as_str(),
            upstream = target.as_str(),
        );
        let response = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;

        let mut builder = Response::builder().status(status);
        if let Some(response_headers) = builder.headers_mut() {
            *response_headers = headers;
        }
        Ok(builder.body(body)?)
    }
}
