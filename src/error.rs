// src/error.rs
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = VpnError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum VpnError {
    #[error("command not found: {program}")]
    CommandNotFound { program: String },

    #[error("command `{command}` failed{}: {stderr}", exit_suffix(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("command `{command}` timed out after {:?}", .timeout)]
    CommandTimeout { command: String, timeout: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed interface name '{0}' (expected e.g. 'de12-wireguard')")]
    MalformedInterfaceName(String),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("not connected")]
    NotConnected,

    #[error("no VPN server selected")]
    NoServerSelected,

    #[error("no VPN server matches {0}")]
    NoMatchingServer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("locations table: {0}")]
    Locations(#[from] csv::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => " (terminated by signal)".to_string(),
    }
}

impl From<reqwest::Error> for VpnError {
    fn from(err: reqwest::Error) -> Self {
        VpnError::Network(err.to_string())
    }
}
