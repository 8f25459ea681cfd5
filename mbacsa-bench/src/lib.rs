//! # MBACSA Bench
//!
//! Latency and scalability experiments for macaroon-based delegated access
//! control.
//!
//! The delegation protocol (mint, delegate, discharge, authorize, revoke) is
//! reached through the [`DelegationClient`] trait. This crate drives it:
//! building multi-hop delegation chains in dependency order, repeating
//! authorization and revocation trials against them, and turning raw latency
//! samples into reproducible reports.
//!
//! ## Experiments
//!
//! - **Core operations** ([`core_ops`]): one delegation hop, every protocol
//!   stage measured per iteration.
//! - **Scalability** ([`scalability`]): authorization and revocation latency at
//!   every depth of an `n`-agent chain. Revocation runs tail to head because
//!   cutting an edge near the root severs everything below it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mbacsa_bench::{ExperimentConfig, JsonReportWriter, LocalAuthority};
//!
//! let config = ExperimentConfig::from_file("experiments.yaml")?;
//! config.validate()?;
//!
//! let client = LocalAuthority::new();
//! let scale = config.scalability.as_ref().unwrap();
//! let report = mbacsa_bench::run_scalability(&client, scale, config.chain_options()).await?;
//!
//! JsonReportWriter::new("results").write_scalability(&report)?;
//! ```

pub mod chain;
pub mod client;
pub mod config;
pub mod core_ops;
pub mod error;
pub mod report;
pub mod scalability;
pub mod simulation;
pub mod stats;
pub mod timing;

// Re-exports for convenience
pub use chain::{build_chain, ChainOptions, DelegationChain, KeyExchange};
pub use client::{
    AccessMode, Agent, AgentId, CredentialBundle, DelegationClient, DelegationToken,
    DischargeProof, ProtocolError,
};
pub use config::{CoreOpsConfig, ExperimentConfig, ScalabilityConfig};
pub use core_ops::run_core_ops;
pub use error::{Error, ErrorKind, Result, Stage, Step};
pub use report::{CoreOpsReport, JsonReportWriter, Report, ReportWriter, ScalabilityReport};
pub use scalability::run_scalability;
pub use simulation::{LocalAuthority, SimulatedLatency};
pub use stats::PerformanceResult;
pub use timing::{measure, timed, Timed};
