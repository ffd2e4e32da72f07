use anyhow::{Context, Result};
use clap::Parser;
use portkeeper::nat::{FatalCallback, IgdClient, IgdConfig, ManagerConfig, MappingManager, Transport};
use portkeeper::signal::{claim_shutdown, SignalGuard, SignalHandoff, SHUTDOWN_SIGNALS};
use portkeeper::{init_logging, PortSet};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep ports open on the router via UPnP until interrupted", long_about = None)]
struct Args {
    /// One or more ports to open up on the router
    #[arg(required = true, value_parser = clap::value_parser!(u16).range(1..))]
    port: Vec<u16>,

    /// Enable extra debug logging
    #[arg(short, long)]
    debug: bool,

    /// Mapping protocol (tcp or udp)
    #[arg(short, long, default_value = "tcp")]
    protocol: Transport,

    /// Description shown in the router's mapping table
    #[arg(long, default_value = NAME)]
    description: String,

    /// Seconds between renewals while something is mapped
    #[arg(long, default_value_t = ManagerConfig::default().renew_interval.as_secs())]
    renew_secs: u64,

    /// Seconds between retries while nothing is mapped
    #[arg(long, default_value_t = ManagerConfig::default().retry_interval.as_secs())]
    retry_secs: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(if args.debug { "debug" } else { "info" });

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let handoff = Arc::new(SignalHandoff::new().context("Failed to create the signal notification pipe")?);

    let client = IgdClient::new(IgdConfig {
        transport: args.protocol,
        description: args.description,
        ..Default::default()
    });
    let config = ManagerConfig {
        renew_interval: Duration::from_secs(args.renew_secs),
        retry_interval: Duration::from_secs(args.retry_secs),
    };
    let mut manager = MappingManager::new(NAME, client, config);

    let signals = SignalGuard::install(handoff.clone(), SHUTDOWN_SIGNALS).context("Failed to install signal handlers")?;

    // Set from the worker thread if it gives up
    let failed = Arc::new(AtomicBool::new(false));
    let on_fatal: FatalCallback = {
        let failed = failed.clone();
        let handoff = handoff.clone();
        Box::new(move || {
            failed.store(true, Ordering::SeqCst);
            if claim_shutdown() {
                tracing::debug!("Error encountered, signaling main thread to exit");
                if let Err(e) = handoff.notify() {
                    tracing::error!("Failed to wake main thread: {}", e);
                }
            }
        })
    };

    let started = manager.start(PortSet::from(args.port), Some(on_fatal));

    if started.is_ok() {
        // Woken by a signal handler or by the fatal callback above
        match handoff.wait() {
            Ok(()) => tracing::debug!("Shutdown requested"),
            Err(e) => tracing::error!("Waiting for shutdown failed: {}", e),
        }
    }

    // Later signals are ignored from here on
    claim_shutdown();
    manager.stop();
    drop(signals);

    started.context("Port mapping did not start")?;

    Ok(if failed.load(Ordering::SeqCst) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
