//! Checks the binary can drive a probe with.

use async_trait::async_trait;
use container_probe::{
    AvailabilityCheck, ContainerProbe, HealthCheck, ProbeConfig, ProbeKind, ProbeResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A predicate source selected on the command line
#[derive(Debug, Clone)]
pub enum BuiltinCheck {
    /// Always passes; the probe mirrors process liveness
    Always,
    /// Passes while the file exists
    ReadyFile(PathBuf),
    /// Passes while `sh -c <command>` exits 0 within the timeout
    Exec { command: String, timeout: Duration },
}

impl BuiltinCheck {
    pub async fn run(&self) -> ProbeResult<bool> {
        match self {
            BuiltinCheck::Always => Ok(true),
            BuiltinCheck::ReadyFile(path) => Ok(tokio::fs::try_exists(path).await?),
            BuiltinCheck::Exec { command, timeout } => run_exec(command, *timeout).await,
        }
    }
}

async fn run_exec(command: &str, timeout: Duration) -> ProbeResult<bool> {
    let status = tokio::time::timeout(
        timeout,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status(),
    )
    .await;

    match status {
        Ok(Ok(status)) => {
            if !status.success() {
                debug!("Check command exited with {}", status);
            }
            Ok(status.success())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            debug!("Check command timed out after {:?}", timeout);
            Ok(false)
        }
    }
}

#[async_trait]
impl HealthCheck for BuiltinCheck {
    async fn is_healthy(&self) -> ProbeResult<bool> {
        self.run().await
    }
}

#[async_trait]
impl AvailabilityCheck for BuiltinCheck {
    async fn is_available(&self) -> ProbeResult<bool> {
        self.run().await
    }
}

/// Build the probe kind named in `config` around `check`
pub fn build_probe(config: &ProbeConfig, check: Arc<BuiltinCheck>) -> ProbeResult<ContainerProbe> {
    config.validate()?;
    match config.kind {
        ProbeKind::Health => {
            ContainerProbe::health(config.address, config.port, config.polling_interval, check)
        }
        ProbeKind::Availability => ContainerProbe::availability(
            config.address,
            config.port,
            config.polling_interval,
            check,
        ),
    }
}
