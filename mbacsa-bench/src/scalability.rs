//! Chain-length scalability experiment.
//!
//! Two phases over one `n`-agent delegation chain:
//!
//! - **Authorization**: every iteration checks access at each depth
//!   `0..n` with the authorization bundle of that depth. Authorization does not
//!   consume chain state, so the same chain serves every iteration.
//! - **Revocation**: every iteration cuts each edge of the chain from the tail
//!   to the head, depth `n-1` down to `0`. Cutting a lower edge first would
//!   sever every edge above it. Revocation is destructive, so the chain is
//!   re-established before each pass after the first (untimed).
//!
//! Both phases produce exactly `n` results, indexed by depth.

use crate::chain::{build_chain, revocation_edge, ChainOptions, DelegationChain};
use crate::client::{Agent, DelegationClient};
use crate::config::ScalabilityConfig;
use crate::error::{Error, Result, Step};
use crate::report::ScalabilityReport;
use crate::stats::PerformanceResult;
use crate::timing::timed;
use tracing::{debug, info, warn};

/// Per-depth latency buckets, sized to the chain length up front.
#[derive(Debug, Clone)]
pub struct DepthSamples {
    buckets: Vec<Vec<f64>>,
}

impl DepthSamples {
    pub fn new(chain_length: usize, iterations: usize) -> Self {
        Self {
            buckets: (0..chain_length)
                .map(|_| Vec::with_capacity(iterations))
                .collect(),
        }
    }

    pub fn chain_length(&self) -> usize {
        self.buckets.len()
    }

    /// Append one sample to the bucket of `depth`.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is outside the chain.
    pub fn record(&mut self, depth: usize, elapsed_us: f64) {
        self.buckets[depth].push(elapsed_us);
    }

    pub fn samples(&self, depth: usize) -> &[f64] {
        &self.buckets[depth]
    }

    /// One result per depth, in depth order.
    ///
    /// Fails with [`Error::EmptySampleSet`] if any depth has no samples.
    pub fn summarize(&self) -> Result<Vec<PerformanceResult>> {
        self.buckets
            .iter()
            .map(|bucket| PerformanceResult::from_samples(bucket))
            .collect()
    }
}

/// Depths visited by one revocation pass: `n-1, n-2, .., 0`.
pub fn revocation_order(chain_length: usize) -> impl Iterator<Item = usize> {
    (0..chain_length).rev()
}

/// Run `iterations` authorization checks at every depth of `chain`.
pub async fn authorization_phase<C>(
    client: &C,
    chain: &DelegationChain,
    resource_uri: &str,
    iterations: usize,
) -> Result<DepthSamples>
where
    C: DelegationClient + ?Sized,
{
    let mut samples = DepthSamples::new(chain.len(), iterations);
    for iteration in 0..iterations {
        for depth in 0..chain.len() {
            let bundle = chain.authorization_bundle(depth);
            let (_, us) = timed(|| client.access(resource_uri, bundle))
                .await
                .map_err(|source| Error::protocol(Step::Authorization { depth }, source))?;
            debug!(depth, elapsed_us = us, "Authorization sample");
            samples.record(depth, us);
        }
        debug!(iteration, "Authorization pass complete");
    }
    Ok(samples)
}

/// Revoke every edge of `chain` once, tail to head, recording into `samples`.
///
/// At depth 0 the root revokes itself; at depth `d` agent `d-1` revokes agent
/// `d`. No revocation at depth `d` starts before all deeper ones completed.
pub async fn revocation_pass<C>(
    client: &C,
    agents: &[Agent],
    chain: &DelegationChain,
    samples: &mut DepthSamples,
) -> Result<()>
where
    C: DelegationClient + ?Sized,
{
    if agents.len() != chain.len() {
        return Err(Error::ConfigurationMismatch {
            declared: chain.len(),
            supplied: agents.len(),
        });
    }
    if samples.chain_length() != chain.len() {
        return Err(Error::ConfigurationMismatch {
            declared: chain.len(),
            supplied: samples.chain_length(),
        });
    }

    for depth in revocation_order(chain.len()) {
        let (revoker, revokee) = revocation_edge(depth);
        let bundle = chain.revocation_bundle(depth);
        let (_, us) = timed(|| {
            client.revoke(&agents[revoker].web_id, &agents[revokee].web_id, bundle)
        })
        .await
        .map_err(|source| Error::protocol(Step::Revocation { depth }, source))?;
        debug!(depth, elapsed_us = us, "Revocation sample");
        samples.record(depth, us);
    }
    Ok(())
}

/// Run both phases of the scalability experiment.
///
/// Fails with [`Error::ConfigurationMismatch`] before any protocol call when
/// the agent list does not match the declared chain length.
pub async fn run_scalability<C>(
    client: &C,
    config: &ScalabilityConfig,
    options: ChainOptions,
) -> Result<ScalabilityReport>
where
    C: DelegationClient + ?Sized,
{
    if config.agents.len() != config.chain_length {
        return Err(Error::ConfigurationMismatch {
            declared: config.chain_length,
            supplied: config.agents.len(),
        });
    }
    if config.iterations == 0 {
        return Err(Error::InvalidConfig(
            "scalability.iterations must be at least 1".to_string(),
        ));
    }

    let resource_uri = config.target_resource.as_str();
    info!(
        chain_length = config.chain_length,
        iterations = config.iterations,
        resource = %resource_uri,
        "Starting scalability experiment"
    );

    let mut chain = build_chain(
        client,
        &config.agents,
        config.chain_length,
        resource_uri,
        options,
    )
    .await?;

    let authorization = authorization_phase(client, &chain, resource_uri, config.iterations)
        .await?
        .summarize()?;
    info!("Authorization phase complete");

    if config.iterations > 1 && !config.rebuild_chain_per_revocation_pass {
        warn!(
            iterations = config.iterations,
            "Chain is not rebuilt between revocation passes; later passes reuse revoked tokens"
        );
    }

    let mut revocation = DepthSamples::new(config.chain_length, config.iterations);
    for iteration in 0..config.iterations {
        if iteration > 0 && config.rebuild_chain_per_revocation_pass {
            chain = build_chain(
                client,
                &config.agents,
                config.chain_length,
                resource_uri,
                options,
            )
            .await?;
        }
        revocation_pass(client, &config.agents, &chain, &mut revocation).await?;
        debug!(iteration, "Revocation pass complete");
    }
    let revocation = revocation.summarize()?;
    info!("Revocation phase complete");

    Ok(ScalabilityReport {
        chain_length: config.chain_length,
        iterations: config.iterations,
        authorization,
        revocation,
    })
}
