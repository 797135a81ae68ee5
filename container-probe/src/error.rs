use miette::Diagnostic;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by probe endpoints, probe controllers and their configuration
#[derive(Error, Diagnostic, Debug)]
pub enum ProbeError {
    #[error("Invalid probe port {0}, the port must be at least 1")]
    #[diagnostic(help("pick a port between 1 and 65535"))]
    InvalidPort(u16),

    #[error("Invalid polling interval {0:?}, the interval must be at least 1ms")]
    InvalidPollingInterval(Duration),

    #[error("Failed to bind probe listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept probe connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Probe check failed: {0}")]
    Check(String),

    #[error("Probe loop panicked: {0}")]
    Panicked(String),

    #[error("Lifecycle operation was cancelled before the lock was acquired")]
    Cancelled,

    #[error("Invalid probe configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Create a check failure from anything printable
    pub fn check<S: ToString>(message: S) -> Self {
        Self::Check(message.to_string())
    }

    /// Create a configuration error from anything printable
    pub fn config<S: ToString>(message: S) -> Self {
        Self::Config(message.to_string())
    }

    /// Turn a caught panic payload into an error
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// A specialized result type for probe operations
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;
