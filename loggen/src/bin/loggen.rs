use std::{
    env,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use clap::{Args, Parser, Subcommand};
use loggen::{
    admin::{self, Admin},
    config::Config,
    control::Control,
    scheduler::{self, Scheduler},
    telemetry::EmissionMetrics,
    writer::{self, Writer},
};
use loggen_payload::{Registry, SequenceState};
use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::{
    runtime::Builder,
    signal,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] loggen::config::Error),
    #[error("Failed to build the format registry: {0}")]
    Payload(#[from] loggen_payload::Error),
    #[error("Failed to open the destination: {0}")]
    Writer(#[from] writer::Error),
    #[error(transparent)]
    Scheduler(#[from] scheduler::Error),
    #[error(transparent)]
    Admin(#[from] admin::Error),
    #[error("Failed to install the metrics recorder: {0}")]
    Prometheus(#[from] BuildError),
    #[error("Failed to encode formats: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    args: LoggenArgs,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Generate events with the specified configuration (default)
    Run,
    /// Validate configuration and exit
    ConfigCheck,
    /// Print every event type and its formats as JSON and exit
    Formats,
}

#[derive(Args)]
struct LoggenArgs {
    /// path on disk to the configuration file, overridden by the contents of
    /// `LOGGEN_CONFIG` when set
    #[clap(long, global = true)]
    config_path: Option<PathBuf>,
    /// directory of additional templates, laid out as `<type>/<group>.yaml`
    #[clap(long, global = true, env = "LOGGEN_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,
    /// log filter used when `RUST_LOG` is not set
    #[clap(long, global = true, default_value = "info")]
    log_level: String,
}

fn load_config(args: &LoggenArgs) -> Result<Config, Error> {
    let mut config = if let Ok(contents) = env::var("LOGGEN_CONFIG") {
        debug!("Using config from env var 'LOGGEN_CONFIG'");
        Config::parse(&contents)?
    } else if let Some(path) = &args.config_path {
        debug!("Attempting to open configuration file at: {}", path.display());
        Config::load(path)?
    } else {
        debug!("No configuration given, using defaults");
        Config::default()
    };
    if let Some(dir) = &args.template_dir {
        config.payload.template_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Load the configuration, build the registry it runs against and check the
/// one against the other.
fn prepare(args: &LoggenArgs) -> Result<(Config, Registry), Error> {
    let config = load_config(args)?;
    let registry = Registry::builtin(&config.payload, &Arc::new(SequenceState::new()))?;
    config.validate(&registry)?;
    Ok((config, registry))
}

async fn inner_main(config: Config, registry: Registry) -> Result<(), Error> {
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let shutdown = CancellationToken::new();
    let control = Arc::new(Control::new(&config, Arc::new(registry)));

    let writer = Writer::from_config(
        &config.destination,
        EmissionMetrics::new(),
        shutdown.clone(),
    )
    .await?;
    let scheduler = Scheduler::new(&config, Arc::clone(&control), writer, shutdown.clone())?;

    let admin_task = if config.api.enabled {
        let listener = admin::bind(config.api.addr).await?;
        let admin = Arc::new(Admin::new(
            Arc::clone(&control),
            Some(prometheus),
            &config.api.base_path,
        ));
        Some(tokio::spawn(admin.serve(listener, shutdown.clone())))
    } else {
        None
    };

    let mut scheduler_task = tokio::spawn(scheduler.run());
    let started = Instant::now();
    let mut interval = time::interval(Duration::from_millis(400));
    let res = loop {
        tokio::select! {
            _ = interval.tick() => {
                gauge!("uptime_seconds").set(started.elapsed().as_secs_f64());
            },

            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                shutdown.cancel();
            },
            res = &mut scheduler_task => {
                break match res {
                    Ok(scheduler_result) => scheduler_result.map_err(Error::from),
                    Err(err) => Err(Error::Join(err)),
                };
            }
        }
    };

    shutdown.cancel();
    if let Some(task) = admin_task {
        if let Err(err) = task.await {
            error!("Could not join the admin api task: {err}");
        }
    }
    res
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting loggen {version}.");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ConfigCheck => match prepare(&cli.args) {
            Ok(_) => {
                info!("Configuration is valid");
                std::process::exit(0)
            }
            Err(err) => {
                error!("Configuration validation failed: {err}");
                std::process::exit(1)
            }
        },
        Commands::Formats => {
            let (_, registry) = prepare(&cli.args)?;
            let formats = serde_json::to_string_pretty(&registry.list_formats())?;
            writeln!(io::stdout().lock(), "{formats}")?;
            Ok(())
        }
        Commands::Run => {
            let (config, registry) = prepare(&cli.args)?;
            let runtime = Builder::new_multi_thread()
                .enable_io()
                .enable_time()
                .build()?;
            let res = runtime.block_on(inner_main(config, registry));
            info!("Bye. :)");
            res
        }
    }
}
