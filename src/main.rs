mod admin;
mod ecs;
mod errors;

use {
    crate::admin::{AdminState, HealthState, MetricsState, PrometheusBuilder, PrometheusHandle},
    axum::{
        extract::Path, extract::State, http::StatusCode, response::Json, routing::get, Router,
        ServiceExt,
    },
    clap::{Parser, Subcommand},
    errors::*,
    gatehouse_cli::Upstream,
    gatehouse_config::{Config, ConfigFileError},
    gatehouse_ext_auth::AuthGate,
    metrics_exporter_prometheus::Matcher,
    metrics_util::layers::{Layer as _, PrefixLayer},
    serde::Serialize,
    std::net::{IpAddr, Ipv4Addr, SocketAddr},
    std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    },
    tokio::{net::TcpListener, task::JoinSet},
    tower_http::normalize_path::NormalizePathLayer,
    tower_layer::Layer,
    tracing::{error, info},
    tracing_forest::ForestLayer,
    tracing_log::LogTracer,
    tracing_subscriber::layer::SubscriberExt,
    tracing_subscriber::{EnvFilter, Registry},
};

/// gatehouse launches and inspects the Gatehouse authorization gate.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[clap(arg_required_else_help = true)]
struct Cli {
    /// Log levels: error, warn, info, debug, trace
    ///
    /// Default is "info".
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Log formats: ecs, forest
    ///
    /// Default is "ecs".
    #[arg(short = 'f', long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// The subcommands supported by the Gatehouse CLI.
#[derive(Subcommand)]
enum Command {
    /// Launch as a reverse proxy in front of the upstream service
    ReverseProxy {
        /// Sets a custom config file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Replaces the config file's [ext_auth] table with an extauth directive file
        #[arg(short, long, value_name = "FILE")]
        directive: Option<PathBuf>,
    },
    /// Validate the configuration and print the effective authorization policy
    Check {
        /// Sets a custom config file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Replaces the config file's [ext_auth] table with an extauth directive file
        #[arg(short, long, value_name = "FILE")]
        directive: Option<PathBuf>,
    },
}

/// An [`EnvFilter`] pattern to limit matched log events to error events.
const ERROR_FILTER: &str = "error";
/// An [`EnvFilter`] pattern to limit matched log events to warning events.
const WARN_FILTER: &str = "warn";
/// An [`EnvFilter`] pattern to limit matched log events to informational events.
const INFO_FILTER: &str = "info";
/// An [`EnvFilter`] pattern to limit matched log events to debug events.
///
/// The HTTP client and server libraries are noisy at debug level and are held back to info. The unfiltered
/// behavior can still be accessed by specifying `debug,` with a trailing comma as the log level argument.
const DEBUG_FILTER: &str = "debug,reqwest=info,hyper=info,hyper_util=info,h2=info,rustls=info";
/// An [`EnvFilter`] pattern to limit matched log events to trace events.
const TRACE_FILTER: &str = "trace";

/// Histogram buckets for the time spent consulting the verification service, in seconds.
const VERIFICATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn init_tracing(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    color_eyre::install()?;

    LogTracer::init()?;

    let log_level: &str = cli.log_level.as_ref().map_or("info", |ll| ll.as_str());
    let log_format: &str = cli.log_format.as_ref().map_or("ecs", |lf| lf.as_str());
    let (ecs_layer, forest_layer) = match log_format {
        "ecs" => (
            Some(ForestLayer::from(
                tracing_forest::Printer::new().formatter(crate::ecs::EcsFormatter),
            )),
            None,
        ),
        "forest" => (None, Some(ForestLayer::default())),
        _ => return Err(CliArgumentError::InvalidLogFormat(log_format.to_string()).into()),
    };

    let subscriber = Registry::default()
        .with(ecs_layer)
        .with(forest_layer)
        .with(EnvFilter::new(
            match log_level.to_ascii_lowercase().as_str() {
                "error" => ERROR_FILTER,
                "warn" => WARN_FILTER,
                "info" => INFO_FILTER,
                "debug" => DEBUG_FILTER,
                "trace" => TRACE_FILTER,
                _ => log_level,
            },
        ));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Loads the config file, replacing its `[ext_auth]` table if a directive file is given.
fn load_config(config: &PathBuf, directive: Option<&PathBuf>) -> Result<Config, ConfigFileError> {
    let config_root = gatehouse_config::toml::load_config(config)?;
    match directive {
        Some(directive) => config_root.with_ext_auth(gatehouse_config::load_directive(directive)?),
        None => Ok(config_root),
    }
}

/// Installs the global Prometheus recorder, prefixing metric names if configured.
fn install_metrics(
    metrics: &gatehouse_config::Metrics,
) -> Result<PrometheusHandle, MetricsError> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Suffix("verification_duration_seconds".to_string()),
        VERIFICATION_BUCKETS,
    )?;
    if metrics.prefix.is_empty() {
        return Ok(builder.install_recorder()?);
    }
    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(PrefixLayer::new(metrics.prefix.as_str()).layer(recorder))
        .map_err(|err| MetricsError::Install(err.to_string()))?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match &cli.command.ok_or(CliArgumentError::MissingSubcommand)? {
        Command::ReverseProxy { config, directive } => {
            let mut service_tasks: JoinSet<std::result::Result<(), ServiceError>> = JoinSet::new();

            let config_root = load_config(config, directive.as_ref())?;
            let port = config_root.service.port;
            let admin_port = config_root.service.admin_port;
            let admin_enabled = config_root.service.admin_enabled;
            let prometheus_handle = install_metrics(&config_root.metrics)?;

            let admin_state = Arc::new(Mutex::new(AdminState {
                health: HealthState {
                    live: true,
                    started: false,
                    ready: false,
                },
                metrics: MetricsState::new(prometheus_handle),
            }));

            if admin_enabled {
                let admin_state = admin_state.clone();

                service_tasks.spawn(async move {
                    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::UNSPECIFIED), admin_port));
                    let app = NormalizePathLayer::trim_trailing_slash().layer(
                        Router::new()
                            .route("/health", get(admin::default_probe_handler)) // :probe is optional and defaults to liveness probe
                            .route("/health/:probe", get(admin::probe_handler))
                            .route("/metrics", get(admin::metrics_handler))
                            .with_state(admin_state),
                    );

                    let listener = TcpListener::bind(addr)
                        .await
                        .map_err(ServiceError::AdminService)?;
                    axum::serve(
                        listener,
                        ServiceExt::<axum::extract::Request>::into_make_service(app),
                    )
                    .await
                    .map_err(ServiceError::AdminService)
                });
            }

            let gate = AuthGate::new(&config_root.ext_auth)?;
            let upstream = Upstream::new(&config_root.upstream)?;
            let app = gatehouse_cli::router(gate, upstream);

            {
                let admin_state = admin_state.clone();

                service_tasks.spawn(async move {
                    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
                    let listener = TcpListener::bind(addr)
                        .await
                        .map_err(ServiceError::ReverseProxyService)?;
                    {
                        let mut admin_state = match admin_state.lock() {
                            Ok(state) => state,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        admin_state.health.started = true;
                        admin_state.health.ready = true;
                    }
                    info!(message = "listening", port = port);
                    axum::serve(listener, app)
                        .await
                        .map_err(ServiceError::ReverseProxyService)
                });
            }

            while let Some(r) = service_tasks.join_next().await {
                match r {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(
                        message = "service could not start",
                        error_message = ?e,
                    ),
                    Err(e) => error!(
                        message = "join error on service initialization",
                        error_message = ?e,
                    ),
                }
            }
        }
        Command::Check { config, directive } => {
            let config_root = load_config(config, directive.as_ref())?;
            // Constructing the gate surfaces any remaining endpoint or TLS client problems.
            let gate = AuthGate::new(&config_root.ext_auth)?;
            Upstream::new(&config_root.upstream)?;

            let policy = Policy {
                ext_auth: &config_root.ext_auth,
                addressing: gate.addressing().as_str(),
                upstream: &config_root.upstream.uri,
            };
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
    }

    Ok(())
}

/// The effective authorization policy printed by the `check` subcommand.
#[derive(Serialize)]
struct Policy<'a> {
    ext_auth: &'a gatehouse_config::ExtAuth,
    addressing: &'static str,
    upstream: &'a str,
}
