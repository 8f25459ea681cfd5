//! Experiment configuration.
//!
//! Parses the YAML file that drives a benchmark run.
//!
//! # Configuration File Format
//!
//! ```yaml
//! key_exchange: per_party   # or: none
//! access_mode: read
//!
//! core_ops:
//!   target_endpoint: "Bob/social/post1.txt"
//!   iterations: 100
//!   measure_key_retrieval: true
//!   resource_owner:
//!     web_id: "http://localhost:3000/Bob/profile/card#me"
//!     email: "bob@example.com"
//!     password: "bob"
//!   delegator: { web_id: "...", email: "...", password: "..." }
//!   delegatee: { web_id: "...", email: "...", password: "..." }
//!
//! scalability:
//!   target_resource: "http://localhost:3000/Bob/social/post1.txt"
//!   chain_length: 3
//!   iterations: 50
//!   agents:
//!     - { web_id: "...", email: "...", password: "..." }
//!     - { web_id: "...", email: "...", password: "..." }
//!     - { web_id: "...", email: "...", password: "..." }
//! ```

use crate::chain::{ChainOptions, KeyExchange};
use crate::client::{AccessMode, Agent};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level experiment configuration.
#[derive(Debug, Deserialize)]
pub struct ExperimentConfig {
    /// Protocol variant: with or without per-party discharge keys
    #[serde(default)]
    pub key_exchange: KeyExchange,
    /// Access mode requested when minting
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Fixed-operation experiment, if configured
    #[serde(default)]
    pub core_ops: Option<CoreOpsConfig>,
    /// Scalability experiment, if configured
    #[serde(default)]
    pub scalability: Option<ScalabilityConfig>,
}

/// Fixed-operation experiment settings.
#[derive(Debug, Deserialize)]
pub struct CoreOpsConfig {
    /// Resource path relative to the resource owner's pod server
    pub target_endpoint: String,
    pub iterations: usize,
    /// Record the latency of discharge-key retrieval as its own stage
    #[serde(default)]
    pub measure_key_retrieval: bool,
    /// Agent whose pod holds the resource
    pub resource_owner: Agent,
    /// Agent that mints and delegates
    pub delegator: Agent,
    /// Agent that receives the delegation and accesses the resource
    pub delegatee: Agent,
}

impl CoreOpsConfig {
    /// Absolute resource URI on the resource owner's pod server.
    pub fn resource_uri(&self) -> String {
        format!(
            "{}{}",
            self.resource_owner.web_id.pod_origin(),
            self.target_endpoint.trim_start_matches('/')
        )
    }
}

/// Scalability experiment settings.
#[derive(Debug, Deserialize)]
pub struct ScalabilityConfig {
    /// Absolute resource URI, used verbatim
    pub target_resource: String,
    /// Declared chain length; must equal `agents.len()`
    pub chain_length: usize,
    pub iterations: usize,
    /// Rebuild the chain before each revocation pass after the first
    #[serde(default = "default_rebuild")]
    pub rebuild_chain_per_revocation_pass: bool,
    /// Chain agents, minter first
    pub agents: Vec<Agent>,
}

fn default_rebuild() -> bool {
    true
}

impl ExperimentConfig {
    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| Error::ConfigRead {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Options every chain build of this run uses.
    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            key_exchange: self.key_exchange,
            mode: self.access_mode,
        }
    }

    /// Check the configuration before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.core_ops.is_none() && self.scalability.is_none() {
            return Err(Error::InvalidConfig(
                "no experiment configured (expected core_ops and/or scalability)".to_string(),
            ));
        }

        if let Some(core) = &self.core_ops {
            if core.iterations == 0 {
                return Err(Error::InvalidConfig(
                    "core_ops.iterations must be at least 1".to_string(),
                ));
            }
            if core.target_endpoint.is_empty() {
                return Err(Error::InvalidConfig(
                    "core_ops.target_endpoint is empty".to_string(),
                ));
            }
        }

        if let Some(scale) = &self.scalability {
            if scale.agents.len() != scale.chain_length {
                return Err(Error::ConfigurationMismatch {
                    declared: scale.chain_length,
                    supplied: scale.agents.len(),
                });
            }
            if scale.chain_length == 0 {
                return Err(Error::InvalidConfig(
                    "scalability.chain_length must be at least 1".to_string(),
                ));
            }
            if scale.iterations == 0 {
                return Err(Error::InvalidConfig(
                    "scalability.iterations must be at least 1".to_string(),
                ));
            }
            url::Url::parse(&scale.target_resource).map_err(|e| {
                Error::InvalidConfig(format!(
                    "scalability.target_resource '{}': {}",
                    scale.target_resource, e
                ))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const AGENT: &str = r#"{ web_id: "http://localhost:3000/Alice/profile/card#me", email: "alice@example.com", password: "alice" }"#;

    fn scalability_yaml(chain_length: usize, agents: usize) -> String {
        let agents: Vec<String> = (0..agents).map(|_| format!("    - {}", AGENT)).collect();
        format!(
            "scalability:\n  target_resource: \"http://localhost:3000/Bob/social/post1.txt\"\n  chain_length: {}\n  iterations: 5\n  agents:\n{}\n",
            chain_length,
            agents.join("\n")
        )
    }

    #[test]
    fn test_parse_core_ops() {
        let yaml = format!(
            r#"
key_exchange: none
core_ops:
  target_endpoint: "/Bob/social/post1.txt"
  iterations: 10
  resource_owner: {{ web_id: "http://localhost:3000/Bob/profile/card#me", email: "bob@example.com", password: "bob" }}
  delegator: {agent}
  delegatee: {agent}
"#,
            agent = AGENT
        );
        let config = ExperimentConfig::from_yaml(&yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.key_exchange, KeyExchange::None);
        assert_eq!(config.access_mode, AccessMode::Read);
        let core = config.core_ops.unwrap();
        assert!(!core.measure_key_retrieval);
        assert_eq!(
            core.resource_uri(),
            "http://localhost:3000/Bob/social/post1.txt"
        );
    }

    #[test]
    fn test_parse_scalability_defaults() {
        let config = ExperimentConfig::from_yaml(&scalability_yaml(3, 3)).unwrap();
        config.validate().unwrap();
        let scale = config.scalability.unwrap();
        assert_eq!(scale.agents.len(), 3);
        assert!(scale.rebuild_chain_per_revocation_pass);
        assert_eq!(config.key_exchange, KeyExchange::PerParty);
    }

    #[test]
    fn test_chain_length_mismatch() {
        let config = ExperimentConfig::from_yaml(&scalability_yaml(5, 3)).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationMismatch);
        assert!(matches!(
            err,
            Error::ConfigurationMismatch {
                declared: 5,
                supplied: 3
            }
        ));
    }

    #[test]
    fn test_rejects_invalid_web_id() {
        let yaml = scalability_yaml(1, 1).replace("http://localhost:3000/Alice", "Alice");
        let err = ExperimentConfig::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_requires_an_experiment() {
        let config = ExperimentConfig::from_yaml("access_mode: read\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = ExperimentConfig::from_file("/nonexistent/experiments.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
