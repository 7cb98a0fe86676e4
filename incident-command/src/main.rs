mod config;

use clap::{Args, Parser};
use config::{CommonConfig, Config, ConfigError};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "incident_command";

#[derive(Parser)]
#[command(about = "Incident command gateway")]
enum CliCommand {
    /// Run the incident gateway
    Gateway(ConfigArgs),
    /// Load and validate a config file, then exit
    ValidateConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short = 'c', default_value = "incident-command.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid gateway config: {0}")]
    InvalidConfig(#[from] incident_gateway::config::ValidationError),
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Serve(#[from] incident_gateway::errors::ServeError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Gateway(args) => run_gateway(&args),
        CliCommand::ValidateConfig(args) => validate_config(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "incident-command exited with an error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_config(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(&args.config)?;
    config.gateway.validate()?;
    println!("{}: ok", args.config.display());
    Ok(())
}

fn run_gateway(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(&args.config)?;

    // Keep the guard alive so buffered events are flushed on exit
    let _sentry = init_logging(&config.common);
    init_metrics(&config.common)?;

    tracing::info!(config = %args.config.display(), "Starting incident gateway");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(incident_gateway::run(config.gateway))?;
    Ok(())
}

fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = common.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
