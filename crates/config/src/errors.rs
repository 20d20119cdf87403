/// This error will be returned if an attempt to load Gatehouse's configuration file fails.
#[derive(thiserror::Error, Debug)]
pub enum ConfigFileError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("file not found: '{0}'")]
    NotFound(std::path::PathBuf),
    #[error(transparent)]
    Deserialization(#[from] toml::de::Error),
    #[error(transparent)]
    Validation(#[from] validator::ValidationError),
    #[error(transparent)]
    Validations(#[from] validator::ValidationErrors),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("invalid duration for '{0}': {1}")]
    InvalidDuration(String, DurationError),
    #[error("no proxy for extauth configured")]
    MissingEndpoint,
    #[error("missing upstream uri")]
    MissingUpstream,
}

/// This error will be returned if a duration string cannot be parsed.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration: '{0}'")]
    Invalid(String),
    #[error("missing unit in duration: '{0}'")]
    MissingUnit(String),
    #[error("unknown unit '{0}' in duration: '{1}'")]
    UnknownUnit(String, String),
    #[error("negative duration: '{0}'")]
    Negative(String),
    #[error("duration out of range: '{0}'")]
    Overflow(String),
}

/// This error will be returned if an `extauth` directive block cannot be parsed.
///
/// Line numbers are one-based.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("line {line}: wrong argument count or unexpected line ending after '{token}'")]
    ArgumentCount { line: usize, token: String },
    #[error("line {line}: unsupported directive: '{directive}'")]
    Unsupported { line: usize, directive: String },
    #[error("line {line}: invalid boolean for '{directive}': '{value}'")]
    InvalidBool {
        line: usize,
        directive: String,
        value: String,
    },
    #[error("line {line}: invalid timeout: {source}")]
    InvalidTimeout { line: usize, source: DurationError },
    #[error("line {line}: unexpected token '{token}'")]
    Unexpected { line: usize, token: String },
    #[error("unclosed block opened on line {line}")]
    UnclosedBlock { line: usize },
    #[error("no proxy for extauth configured")]
    MissingEndpoint,
}
