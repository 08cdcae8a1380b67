use std::env;
use std::path::PathBuf;
use clap::Parser;
use log::{info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::error::AppRunError;
use crate::platform::btle::run_client;
use crate::sink::{sink_task, LogSink};

pub mod config;
pub mod device;
pub mod error;
pub mod platform;
pub mod sink;

#[derive(Parser, Debug, Default)]
#[command(author, version)]
#[command(about = "Connects to a TremorBLE sensor and reports tremor / dyskinesia status changes.", long_about = None)]
pub struct Args {
    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Connect to the peripheral advertising this name instead of the configured one
    #[arg(long)]
    pub name: Option<String>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Write the default configuration to the config file and exit
    #[arg(long)]
    pub write_default_config: bool,
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Warn)
        .level_for("tremor_ble", level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn load_config(config_io: &ConfigIO, args: &Args) -> Result<Config, AppRunError> {
    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Config::default()
        },
        Err(err) => return Err(err.into()),
    };

    if let Some(name) = &args.name {
        config.peripheral_name = name.clone();
    }

    Ok(config)
}

async fn run_async(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::open(args.config.as_deref())?;

    // only one instance may own the peripheral
    let mut instance_lock = config_io.instance_lock()?;
    let _guard = instance_lock.acquire()?;

    if args.write_default_config {
        config_io.save(&Config::default()).await?;
        info!("Wrote default config to {}", config_io.path().display());
        return Ok(());
    }

    let config = load_config(&config_io, &args).await?;
    info!("Looking for peripheral {:?}", config.peripheral_name);

    let app_cancel = CancellationToken::new();

    let ctrl_c_cancel = app_cancel.clone();
    spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(err) => warn!("Failed to listen for ctrl-c: {}", err),
        }
        ctrl_c_cancel.cancel();
    });

    // the sink outlives the client so shutdown events still reach it; it ends once the
    // client drops its sender
    let (events, sink_handle) = sink_task(CancellationToken::new(), LogSink::new());
    let result = run_client(app_cancel.clone(), &config, events).await;

    app_cancel.cancel();
    if let Err(err) = sink_handle.await {
        warn!("Event sink task failed: {}", err);
    }

    result?;
    Ok(())
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args))
}
