use clap::Parser;
use container_lifecycle::ContainerLifecycle;
use container_probe::{ContainerProbe, ProbeError, ProbeResult};
use miette::IntoDiagnostic;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod checks;
mod cli;
mod log;
mod observer;

use checks::build_probe;
use cli::Cli;
use observer::TracingObserver;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    log::init_tracing(cli.log_level, cli.log_format);

    let config = cli.probe_config()?;
    let check = cli.check();
    info!(
        "Serving {} probe on {}:{} ({:?})",
        config.kind, config.address, config.port, check
    );

    let observer = Arc::new(TracingObserver::new(config.kind));
    let probe = build_probe(&config, Arc::new(check))?.with_observer(observer.clone());

    let lifecycle = ContainerLifecycle::new();
    lifecycle.install_signals().into_diagnostic()?;

    serve(&probe, &lifecycle).await?;
    info!("Served {} probe connections", observer.handled());
    lifecycle.complete();

    Ok(())
}

/// Run `probe` until the lifecycle ends or the probe loop exits on its own.
async fn serve(probe: &ContainerProbe, lifecycle: &ContainerLifecycle) -> ProbeResult<()> {
    match probe.start(&lifecycle.cancellation_token()).await {
        Ok(_) => {}
        Err(ProbeError::Cancelled) => {
            info!("Shutdown requested before the probe started");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let completion = probe.completion();
    tokio::select! {
        _ = lifecycle.wait_for_end() => {}
        _ = completion.wait() => {
            warn!("Probe loop exited on its own, shutting down");
            lifecycle.end();
        }
    }

    probe.stop(&CancellationToken::new()).await?;
    Ok(())
}
