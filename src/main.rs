//! ldhdns entry point.

use anyhow::Context;
use log::{error, info};
use tokio::signal::unix::{signal, SignalKind};

use ldhdns::controller::Controller;
use ldhdns::monitor::{ReapplySignal, SystemEventMonitor};
use ldhdns::registrar::Registrar;
use ldhdns::reload::PidFileReloader;
use ldhdns::resolver::Resolve1Client;
use ldhdns::runtime::DockerRuntime;
use ldhdns::Config;

const USAGE: &str = "usage: ldhdns <controller|dns|version>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mode = std::env::args().nth(1).unwrap_or_default();
    match mode.as_str() {
        "controller" => run_controller().await,
        "dns" => run_dns().await,
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let (mut interrupt, mut terminate) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            error!("Unable to listen for shutdown signals: {}", e);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

async fn run_controller() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    info!("Starting controller with config: {:?}", cfg);
    info!(
        "Configured for {:?} domain and {:?} container label",
        cfg.domain_suffix, cfg.subdomain_label
    );

    let runtime = DockerRuntime::connect()?;
    let resolver = Resolve1Client::connect()
        .await
        .context("Failed to connect to the system bus")?;

    let mut controller = Controller::new(cfg, runtime, resolver)
        .await
        .context("Failed to start server")?;

    let result = async {
        controller.start().await?;

        let (reapply_tx, reapply_rx) = ReapplySignal::channel();
        let monitor = SystemEventMonitor::connect().await?;
        let monitor_handle = monitor.spawn(controller.links(), reapply_tx);

        info!("Running event loop...");
        let outcome = controller.run(reapply_rx, shutdown_signal()).await;
        monitor_handle.abort();
        outcome
    }
    .await;

    if let Err(e) = &result {
        error!("Controller failed: {}", e);
    }

    info!("Shutting down...");
    controller.shutdown().await;
    info!("Shutdown complete.");

    result.map_err(Into::into)
}

async fn run_dns() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    info!("Starting registrar with config: {:?}", cfg);

    let runtime = DockerRuntime::connect()?;
    let reloader = PidFileReloader::new(&cfg.pid_file);
    let registrar = Registrar::new(cfg, runtime, reloader);

    info!("Loading existing containers...");
    registrar
        .bootstrap()
        .await
        .context("Failed to load existing containers")?;

    info!("Running event loop...");
    registrar.run(shutdown_signal()).await?;

    info!("Bye...");
    Ok(())
}
