//! Error types for the experiment driver.
//!
//! Errors say what went wrong and where. A protocol failure always carries the
//! [`Step`] it happened in, so a failed run can report the stage or chain depth
//! that broke without emitting any partial measurements.

use crate::client::{Operation, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Result type alias for experiment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error categories.
///
/// Configuration and empty-sample errors are local mistakes and are surfaced
/// immediately. Protocol failures abort the current experiment phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationMismatch,
    ProtocolCallFailure,
    EmptySampleSet,
    InvalidConfig,
    Persistence,
}

impl ErrorKind {
    /// Get machine-readable name (kebab-case).
    pub fn name(self) -> &'static str {
        match self {
            Self::ConfigurationMismatch => "configuration-mismatch",
            Self::ProtocolCallFailure => "protocol-call-failure",
            Self::EmptySampleSet => "empty-sample-set",
            Self::InvalidConfig => "invalid-config",
            Self::Persistence => "persistence",
        }
    }

    /// Whether the error was caught before any network activity.
    pub fn is_local(self) -> bool {
        !matches!(self, Self::ProtocolCallFailure | Self::Persistence)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Labeled stage of the fixed-operation experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    KeyRetrieval,
    Minting,
    Discharging,
    Delegating,
    Authorizing,
    Revoking,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::KeyRetrieval,
        Stage::Minting,
        Stage::Discharging,
        Stage::Delegating,
        Stage::Authorizing,
        Stage::Revoking,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::KeyRetrieval => "key-retrieval",
            Self::Minting => "minting",
            Self::Discharging => "discharging",
            Self::Delegating => "delegating",
            Self::Authorizing => "authorizing",
            Self::Revoking => "revoking",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where in an experiment a protocol call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A stage of the fixed-operation experiment, measured or not.
    Stage { stage: Stage, operation: Operation },
    /// Building the delegation chain, at the given chain position.
    ChainBuild { position: usize, operation: Operation },
    /// Authorization phase of the scalability experiment.
    Authorization { depth: usize },
    /// Revocation phase of the scalability experiment.
    Revocation { depth: usize },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Stage { stage, operation } => write!(f, "stage {} ({})", stage, operation),
            Step::ChainBuild {
                position,
                operation,
            } => write!(f, "chain build at position {} ({})", position, operation),
            Step::Authorization { depth } => write!(f, "authorization at depth {}", depth),
            Step::Revocation { depth } => write!(f, "revocation at depth {}", depth),
        }
    }
}

/// Errors that can occur while configuring, running or persisting experiments.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Agent list length disagrees with the declared chain length.
    #[error("configuration mismatch: chain length is {declared} but {supplied} agents were supplied")]
    ConfigurationMismatch { declared: usize, supplied: usize },

    /// A call to the protocol client failed or timed out.
    #[error("{step} failed: {source}")]
    ProtocolCallFailure {
        step: Step,
        #[source]
        source: ProtocolError,
    },

    /// Statistics were requested over zero samples.
    #[error("cannot summarize an empty sample set")]
    EmptySampleSet,

    /// Configuration is well-formed but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected shape.
    #[error("YAML parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Report destination could not be written.
    #[error("failed to write report to {destination}: {source}")]
    ReportWrite {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// Report could not be serialized.
    #[error("failed to serialize report: {0}")]
    ReportSerialize(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a protocol error with the step it happened in.
    pub fn protocol(step: Step, source: ProtocolError) -> Self {
        Error::ProtocolCallFailure { step, source }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigurationMismatch { .. } => ErrorKind::ConfigurationMismatch,
            Error::ProtocolCallFailure { .. } => ErrorKind::ProtocolCallFailure,
            Error::EmptySampleSet => ErrorKind::EmptySampleSet,
            Error::InvalidConfig(_) | Error::ConfigRead { .. } | Error::ConfigParse(_) => {
                ErrorKind::InvalidConfig
            }
            Error::ReportWrite { .. } | Error::ReportSerialize(_) => ErrorKind::Persistence,
        }
    }

    /// The failed step, for protocol failures.
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::ProtocolCallFailure { step, .. } => Some(*step),
            _ => None,
        }
    }
}
