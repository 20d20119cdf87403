/// Returned when an [`AuthGate`](crate::AuthGate) cannot be constructed from its configuration.
///
/// These are startup failures. A gate that fails to construct is never installed.
#[derive(thiserror::Error, Debug)]
pub enum GateInitError {
    #[error("no proxy for extauth configured")]
    MissingEndpoint,
    #[error("could not build verification client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Returned when a verification request cannot be built, sent, or read.
///
/// Every variant is absorbed by the gate and converted into a denial.
#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("invalid verification endpoint '{endpoint}': {source}")]
    EndpointResolution {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("could not address verification endpoint: {0}")]
    Addressing(String),
    #[error("could not reconstruct inbound url: {0}")]
    InboundUrl(String),
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("verification request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
