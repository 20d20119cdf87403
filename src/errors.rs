#[derive(thiserror::Error, Debug)]
pub enum CliArgumentError {
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),
    #[error("missing subcommand")]
    MissingSubcommand,
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("error starting reverse proxy service: {0}")]
    ReverseProxyService(std::io::Error),
    #[error("error starting admin service: {0}")]
    AdminService(std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("failed to configure Prometheus metrics exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}
