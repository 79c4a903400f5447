use std::{io, path::PathBuf};

use thiserror::Error;

/// Problems detected before any simulation starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {what} `{}`", path.display())]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value that would make a density, reward or table shape degenerate
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the simulator session
#[derive(Error, Debug)]
pub enum SimError {
    #[error("failed to launch simulator `{binary}`")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to simulator at {addr} after {attempts} attempts")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("simulator did not answer within the step timeout")]
    Timeout,

    #[error("simulator connection error: {0}")]
    Io(io::Error),

    #[error("malformed simulator response: {0}")]
    Protocol(String),

    #[error("simulator rejected command 0x{command:02x}: {description}")]
    Command { command: u8, description: String },

    #[error("no simulator session is open")]
    NotStarted,

    #[error("scripted failure: {0}")]
    Scripted(String),
}

impl From<io::Error> for SimError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

/// Failures while saving or loading the value table
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("value table I/O on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{}` is not a valid table file: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("table shape mismatch: expected {expected:?}, found {found:?}")]
    Shape {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// Top level error of a training run
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("episode {} failed", .episode + 1)]
    Episode {
        /// 0-based; displayed counting from 1 like the progress log
        episode: u32,
        #[source]
        source: SimError,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("episode log: {0}")]
    Report(#[from] csv::Error),
}
