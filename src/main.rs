//! docker-hostsd entry point.

use std::path::PathBuf;

use log::{error, info};
use tokio::signal;
use tokio::sync::{mpsc, watch};

use docker_hostsd::config::Config;
use docker_hostsd::driver::Driver;
use docker_hostsd::hosts_file;
use docker_hostsd::mapping::build_mapping;
use docker_hostsd::reconcile::{ReconcileOutcome, Reconciler};
use docker_hostsd::runtime::{ContainerRuntime, DockerRuntime};

const USAGE: &str = "usage: docker-hostsd [--listen] [--dry-run] [--tld <name>] [FILE]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut cfg = Config::load()?;
    apply_args(&mut cfg, std::env::args().skip(1))?;
    info!("Starting docker-hostsd with config: {:?}", cfg);

    let reconciler = Reconciler::new(cfg.hosts_path.clone(), cfg.dry_run);
    let runtime = DockerRuntime::new(cfg.retry_interval());

    if !cfg.listen {
        return one_shot(&runtime, &reconciler, &cfg.tld).await;
    }

    // Notification channel, fed by the event subscription task.
    let (event_tx, event_rx) = mpsc::channel(128);
    let subscriber = DockerRuntime::new(cfg.retry_interval());
    let subscribe_handle = tokio::spawn(async move {
        if let Err(e) = subscriber.subscribe(event_tx).await {
            error!("event subscription failed: {}", e);
        }
    });

    // Graceful shutdown on Ctrl+C.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                let _ = cancel_tx.send(true);
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    let driver = Driver::new(runtime, reconciler, cfg.tld.clone(), cfg.debounce_window());
    driver.run(event_rx, cancel_rx).await?;

    subscribe_handle.abort();
    info!("Shutdown complete.");
    Ok(())
}

/// One reconcile pass from a fresh snapshot, then exit.
async fn one_shot(
    runtime: &DockerRuntime,
    reconciler: &Reconciler,
    tld: &str,
) -> anyhow::Result<()> {
    let records = runtime.snapshot().await?;
    let mapping = build_mapping(&records, tld);
    match reconciler.reconcile(&mapping)? {
        ReconcileOutcome::Unchanged => info!("hosts file already up to date"),
        ReconcileOutcome::WouldWrite(_) => print!("{}", hosts_file::render(&mapping)),
        ReconcileOutcome::Written(path) => info!("wrote {}", path.display()),
    }
    Ok(())
}

/// Folds CLI flags over the loaded configuration.
fn apply_args(cfg: &mut Config, mut args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" => cfg.listen = true,
            "--dry-run" => cfg.dry_run = true,
            "--tld" => {
                cfg.tld = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--tld requires a value\n{}", USAGE))?;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => {
                anyhow::bail!("unknown flag {}\n{}", flag, USAGE);
            }
            path => cfg.hosts_path = PathBuf::from(path),
        }
    }
    Ok(())
}
