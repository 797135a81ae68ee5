use clap::{Parser, ValueEnum};
use container_probe::{ProbeConfig, ProbeKind};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::checks::BuiltinCheck;
use crate::log::{Level, LogFormat};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Liveness probe
    #[default]
    Health,
    /// Readiness probe
    Availability,
}

impl From<KindArg> for ProbeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Health => ProbeKind::Health,
            KindArg::Availability => ProbeKind::Availability,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Accept TCP connections on a probe port while a check passes.",
    long_about = None
)]
pub struct Cli {
    #[arg(
        long,
        env = "PROBE_CONFIG",
        help = "Load address, port, polling interval and kind from a YAML or JSON file. \
                Takes precedence over the matching flags, except --port."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "PROBE_ADDRESS",
        default_value = "0.0.0.0",
        help = "Address to listen on."
    )]
    pub address: IpAddr,

    #[arg(
        short,
        long,
        env = "PROBE_PORT",
        required_unless_present = "config",
        help = "Port to listen on."
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "PROBE_POLLING_INTERVAL",
        value_parser = humantime::parse_duration,
        default_value = "1s",
        help = "Time between check evaluations, e.g. 500ms or 2s."
    )]
    pub polling_interval: Duration,

    #[arg(long, value_enum, default_value_t, help = "Which probe to serve.")]
    pub kind: KindArg,

    #[arg(
        long,
        conflicts_with = "exec",
        help = "Pass the check while this file exists."
    )]
    pub ready_file: Option<PathBuf>,

    #[arg(long, help = "Pass the check while `sh -c <EXEC>` exits 0.")]
    pub exec: Option<String>,

    #[arg(
        long,
        value_parser = humantime::parse_duration,
        default_value = "5s",
        help = "Fail the --exec check if the command runs longer than this."
    )]
    pub exec_timeout: Duration,

    #[arg(long, value_enum, default_value_t, help = "Minimum log level.")]
    pub log_level: Level,

    #[arg(long, value_enum, default_value_t, help = "Log output format.")]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn probe_config(&self) -> miette::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_path(path)?,
            None => {
                let port = self
                    .port
                    .ok_or_else(|| miette::miette!("--port is required without --config"))?;
                ProbeConfig {
                    address: self.address,
                    port,
                    polling_interval: self.polling_interval,
                    kind: self.kind.into(),
                }
            }
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn check(&self) -> BuiltinCheck {
        if let Some(path) = &self.ready_file {
            BuiltinCheck::ReadyFile(path.clone())
        } else if let Some(command) = &self.exec {
            BuiltinCheck::Exec {
                command: command.clone(),
                timeout: self.exec_timeout,
            }
        } else {
            BuiltinCheck::Always
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_build_config() {
        let cli = Cli::try_parse_from([
            "probe-endpoint",
            "--port",
            "10034",
            "--polling-interval",
            "250ms",
            "--kind",
            "availability",
        ])
        .unwrap();

        let config = cli.probe_config().unwrap();
        assert_eq!(config.port, 10034);
        assert_eq!(config.polling_interval, Duration::from_millis(250));
        assert_eq!(config.kind, ProbeKind::Availability);
        assert!(matches!(cli.check(), BuiltinCheck::Always));
    }

    #[test]
    fn test_port_zero_rejected() {
        let cli = Cli::try_parse_from(["probe-endpoint", "--port", "0"]).unwrap();
        assert!(cli.probe_config().is_err());
    }

    #[test]
    fn test_ready_file_and_exec_conflict() {
        let result = Cli::try_parse_from([
            "probe-endpoint",
            "--port",
            "1",
            "--ready-file",
            "/tmp/ready",
            "--exec",
            "true",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_exec_check() {
        let cli = Cli::try_parse_from([
            "probe-endpoint",
            "--port",
            "1",
            "--exec",
            "pg_isready",
            "--exec-timeout",
            "2s",
        ])
        .unwrap();

        match cli.check() {
            BuiltinCheck::Exec { command, timeout } => {
                assert_eq!(command, "pg_isready");
                assert_eq!(timeout, Duration::from_secs(2));
            }
            other => panic!("unexpected check {:?}", other),
        }
    }

    #[test]
    fn test_config_file_with_port_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.yaml");
        std::fs::write(&path, "port: 9000\npolling_interval: 2s\n").unwrap();

        let cli = Cli::try_parse_from([
            "probe-endpoint",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ])
        .unwrap();

        let config = cli.probe_config().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.polling_interval, Duration::from_secs(2));
    }
}
