use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use log::{error, info};

use crate::app::bridge::Bridge;
use crate::app::cli::Cli;
use crate::app::console::run_console;
use crate::config::io::ConfigIO;
use crate::device::btle::BtleRadio;
use crate::device::permissions::AlwaysGranted;
use crate::error::{readable_thread_panic_error, AppRunError};

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod server;
pub mod state;

pub fn init_logging(level: log::LevelFilter) {
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
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn run_bridge(config_io: ConfigIO, cli: Cli) -> Result<(), AppRunError> {
    let mut config = config_io.load_or_init().await?;
    cli.apply(&mut config);
    info!("Using {:?}", config);

    let radio = Arc::new(BtleRadio::new(config.service_filter.clone()).await?);
    let bridge = Bridge::new(radio, Arc::new(AlwaysGranted), config.scan_window());

    let (_, server) = bridge.http_listener(SocketAddr::from(([0, 0, 0, 0], config.http_port))).bind()?;
    let server = tokio::spawn(server);

    // the status server has no shutdown handshake; it lives until the process exits
    tokio::select! {
        _ = run_console(&bridge, config.auto_connect.clone()) => info!("Bye"),
        result = server => {
            if let Err(err) = result {
                if err.is_panic() {
                    error!("Status server stopped: {}", readable_thread_panic_error(&err.into_panic()));
                }
            }
        },
    }

    Ok(())
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync()?;

    // only one bridge may own the radio and the port
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_bridge(config_io, cli))
}
