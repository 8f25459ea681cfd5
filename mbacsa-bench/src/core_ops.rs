//! Fixed-operation latency experiment.
//!
//! Each iteration runs the full protocol once for a single delegation hop:
//!
//! 1. delegator fetches its discharge key (measured only on request)
//! 2. delegator mints a token for the resource held by the resource owner
//! 3. delegator discharges its own caveat
//! 4. delegator delegates to the delegatee
//! 5. delegatee discharges the delegated token (untimed)
//! 6. delegatee accesses the resource with `[t_1, p_0, p_1]`
//! 7. delegator revokes the delegatee with `[t_0, p_0]`
//!
//! Samples of each stage are pooled across iterations before aggregation. Any
//! failure aborts the experiment and discards everything collected so far.

use crate::chain::{discharge_key, ChainOptions, KeyExchange};
use crate::client::{CredentialBundle, DelegationClient, MintRequest, Operation, ProtocolError};
use crate::config::CoreOpsConfig;
use crate::error::{Error, Result, Stage, Step};
use crate::report::CoreOpsReport;
use crate::stats::PerformanceResult;
use crate::timing::timed;
use tracing::{debug, info};

/// Append-only latency buckets, one per [`Stage`].
#[derive(Debug, Default)]
pub struct StageSamples {
    buckets: [Vec<f64>; Stage::ALL.len()],
}

impl StageSamples {
    pub fn with_capacity(iterations: usize) -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::with_capacity(iterations)),
        }
    }

    pub fn record(&mut self, stage: Stage, elapsed_us: f64) {
        debug!(stage = %stage, elapsed_us, "Stage sample");
        self.buckets[stage.index()].push(elapsed_us);
    }

    pub fn samples(&self, stage: Stage) -> &[f64] {
        &self.buckets[stage.index()]
    }

    /// Summarize one stage. Fails on a stage that was never recorded.
    pub fn summarize(&self, stage: Stage) -> Result<PerformanceResult> {
        PerformanceResult::from_samples(self.samples(stage))
    }
}

fn stage_failure(stage: Stage, operation: Operation) -> impl Fn(ProtocolError) -> Error {
    move |source| Error::protocol(Step::Stage { stage, operation }, source)
}

/// Whether key retrieval is timed as its own stage.
fn measures_key_retrieval(config: &CoreOpsConfig, options: ChainOptions) -> bool {
    config.measure_key_retrieval && options.key_exchange == KeyExchange::PerParty
}

/// Run the fixed-operation experiment `config.iterations` times.
pub async fn run_core_ops<C>(
    client: &C,
    config: &CoreOpsConfig,
    options: ChainOptions,
) -> Result<CoreOpsReport>
where
    C: DelegationClient + ?Sized,
{
    let samples = collect_stage_samples(client, config, options).await?;

    let report = CoreOpsReport {
        iterations: config.iterations,
        key_retrieval: if measures_key_retrieval(config, options) {
            Some(samples.summarize(Stage::KeyRetrieval)?)
        } else {
            None
        },
        minting: samples.summarize(Stage::Minting)?,
        delegating: samples.summarize(Stage::Delegating)?,
        discharging: samples.summarize(Stage::Discharging)?,
        authorizing: samples.summarize(Stage::Authorizing)?,
        revoking: samples.summarize(Stage::Revoking)?,
    };

    info!(
        iterations = config.iterations,
        authorizing_avg_ms = report.authorizing.mean,
        revoking_avg_ms = report.revoking.mean,
        "Core operations experiment complete"
    );
    Ok(report)
}

/// Run every iteration and return the pooled per-stage samples.
pub(crate) async fn collect_stage_samples<C>(
    client: &C,
    config: &CoreOpsConfig,
    options: ChainOptions,
) -> Result<StageSamples>
where
    C: DelegationClient + ?Sized,
{
    if config.iterations == 0 {
        return Err(Error::InvalidConfig(
            "core_ops.iterations must be at least 1".to_string(),
        ));
    }

    let owner = &config.resource_owner;
    let delegator = &config.delegator;
    let delegatee = &config.delegatee;
    let resource_uri = config.resource_uri();
    let measure_keys = measures_key_retrieval(config, options);

    info!(
        iterations = config.iterations,
        resource = %resource_uri,
        owner = %owner.web_id,
        measure_key_retrieval = measure_keys,
        "Starting core operations experiment"
    );

    let mut samples = StageSamples::with_capacity(config.iterations);

    for iteration in 0..config.iterations {
        // Key retrieval.
        let delegator_key = if measure_keys {
            let (key, us) = timed(|| client.public_discharge_key(&delegator.web_id))
                .await
                .map_err(stage_failure(Stage::KeyRetrieval, Operation::KeyRetrieval))?;
            samples.record(Stage::KeyRetrieval, us);
            Some(key)
        } else {
            discharge_key(client, &delegator.web_id, options.key_exchange)
                .await
                .map_err(stage_failure(Stage::KeyRetrieval, Operation::KeyRetrieval))?
        };

        // Minting.
        let delegator_access = client
            .retrieve_access_token(
                &delegator.web_id.pod_origin(),
                &delegator.email,
                &delegator.password,
            )
            .await
            .map_err(stage_failure(Stage::Minting, Operation::AccessToken))?;
        let request = MintRequest {
            discharge_key: delegator_key,
            mode: options.mode,
            requestor: delegator.web_id.clone(),
            resource_uri: resource_uri.clone(),
        };
        let (root, us) = timed(|| client.mint(&delegator.web_id, &request, &delegator_access))
            .await
            .map_err(stage_failure(Stage::Minting, Operation::Mint))?;
        samples.record(Stage::Minting, us);

        // Delegator discharges its own caveat.
        let (delegator_proof, us) =
            timed(|| client.discharge(&root, &delegator.web_id, &delegator_access))
                .await
                .map_err(stage_failure(Stage::Discharging, Operation::Discharge))?;
        samples.record(Stage::Discharging, us);

        // Delegation.
        let delegatee_key = discharge_key(client, &delegatee.web_id, options.key_exchange)
            .await
            .map_err(stage_failure(Stage::Delegating, Operation::KeyRetrieval))?;
        let (delegated, us) =
            timed(|| client.delegate(&root, &delegatee.web_id, delegatee_key.as_ref()))
                .await
                .map_err(stage_failure(Stage::Delegating, Operation::Delegate))?;
        samples.record(Stage::Delegating, us);

        // Delegatee discharge is a precondition of authorizing, not measured.
        let delegatee_access = client
            .retrieve_access_token(
                &delegatee.web_id.pod_origin(),
                &delegatee.email,
                &delegatee.password,
            )
            .await
            .map_err(stage_failure(Stage::Authorizing, Operation::AccessToken))?;
        let delegatee_proof = client
            .discharge(&delegated, &delegatee.web_id, &delegatee_access)
            .await
            .map_err(stage_failure(Stage::Authorizing, Operation::Discharge))?;
        let proofs = [delegator_proof, delegatee_proof];

        // Authorization with [t_1, p_0, p_1].
        let bundle = CredentialBundle::new(&delegated, &proofs);
        let (_, us) = timed(|| client.access(&resource_uri, bundle))
            .await
            .map_err(stage_failure(Stage::Authorizing, Operation::Access))?;
        samples.record(Stage::Authorizing, us);

        // Revocation of the delegatee with [t_0, p_0].
        let bundle = CredentialBundle::new(&root, &proofs[..1]);
        let (_, us) = timed(|| client.revoke(&delegator.web_id, &delegatee.web_id, bundle))
            .await
            .map_err(stage_failure(Stage::Revoking, Operation::Revoke))?;
        samples.record(Stage::Revoking, us);

        debug!(iteration, "Core operations iteration complete");
    }

    Ok(samples)
}
