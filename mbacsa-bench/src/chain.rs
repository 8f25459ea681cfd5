//! Delegation chain construction.
//!
//! A chain over agents `a_0 .. a_{n-1}` is two index-aligned sequences:
//!
//! ```text
//!   tokens:  t_0 = mint(a_0)   t_1 = delegate(t_0, a_1)  ...  t_{n-1}
//!   proofs:  p_0 by a_0        p_1 by a_1                ...  p_{n-1}
//! ```
//!
//! Minting and the minter's discharge complete first. Delegation runs strictly
//! in position order since each step consumes the previous token. Discharge
//! proofs for positions `1..n` only need their own token and agent, so they are
//! requested concurrently once every token exists.

use crate::client::{
    AccessMode, Agent, AgentId, CredentialBundle, DelegationClient, DelegationToken,
    DischargeKey, DischargeProof, MintRequest, Operation, ProtocolError,
};
use crate::error::{Error, Result, Step};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Whether parties exchange public discharge keys before minting and
/// delegating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyExchange {
    /// Retrieve each party's public discharge key and pass it along.
    #[default]
    PerParty,
    /// No key exchange; key retrieval is a no-op.
    None,
}

/// Options shared by every chain build of one experiment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainOptions {
    pub key_exchange: KeyExchange,
    pub mode: AccessMode,
}

/// A fully materialized delegation chain.
///
/// `tokens[i]` is held by agent `i` and `proofs[i]` attests `tokens[i]`. Both
/// sequences always have the same length.
#[derive(Debug, Clone)]
pub struct DelegationChain {
    tokens: Vec<DelegationToken>,
    proofs: Vec<DischargeProof>,
}

impl DelegationChain {
    /// Assemble a chain from already aligned parts.
    ///
    /// Fails with [`Error::ConfigurationMismatch`] when the lengths differ.
    pub fn from_parts(tokens: Vec<DelegationToken>, proofs: Vec<DischargeProof>) -> Result<Self> {
        if tokens.len() != proofs.len() {
            return Err(Error::ConfigurationMismatch {
                declared: tokens.len(),
                supplied: proofs.len(),
            });
        }
        Ok(Self { tokens, proofs })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[DelegationToken] {
        &self.tokens
    }

    pub fn proofs(&self) -> &[DischargeProof] {
        &self.proofs
    }

    /// Credentials proving access at `depth`: `tokens[depth]` plus
    /// `proofs[0..=depth]`.
    ///
    /// # Panics
    ///
    /// Panics if `depth >= self.len()`.
    pub fn authorization_bundle(&self, depth: usize) -> CredentialBundle<'_> {
        CredentialBundle::new(&self.tokens[depth], &self.proofs[..=depth])
    }

    /// Credentials cutting the edge into `depth`.
    ///
    /// The root revokes itself with `tokens[0], proofs[0..=0]`. Any other depth
    /// is revoked by its predecessor with `tokens[depth-1], proofs[0..depth]`.
    ///
    /// # Panics
    ///
    /// Panics if `depth >= self.len()`.
    pub fn revocation_bundle(&self, depth: usize) -> CredentialBundle<'_> {
        let issuer = depth.saturating_sub(1);
        CredentialBundle::new(&self.tokens[issuer], &self.proofs[..=issuer])
    }
}

/// Revoker and revokee positions for a revocation at `depth`.
pub fn revocation_edge(depth: usize) -> (usize, usize) {
    (depth.saturating_sub(1), depth)
}

/// Build a delegation chain over `agents` for `resource_uri`.
///
/// `agents[0]` mints. `chain_length` is the declared length and must equal
/// `agents.len()`; a mismatch fails before any protocol call. A failure at any
/// position aborts the whole build.
pub async fn build_chain<C>(
    client: &C,
    agents: &[Agent],
    chain_length: usize,
    resource_uri: &str,
    options: ChainOptions,
) -> Result<DelegationChain>
where
    C: DelegationClient + ?Sized,
{
    if agents.len() != chain_length {
        return Err(Error::ConfigurationMismatch {
            declared: chain_length,
            supplied: agents.len(),
        });
    }
    let Some((minter, delegatees)) = agents.split_first() else {
        return Err(Error::InvalidConfig(
            "delegation chain needs at least one agent".to_string(),
        ));
    };

    let fail = |position: usize, operation: Operation| {
        move |source: ProtocolError| {
            Error::protocol(Step::ChainBuild { position, operation }, source)
        }
    };

    // Root mint and the minter's own discharge.
    let minter_key = discharge_key(client, &minter.web_id, options.key_exchange)
        .await
        .map_err(fail(0, Operation::KeyRetrieval))?;
    let minter_access = client
        .retrieve_access_token(&minter.web_id.pod_origin(), &minter.email, &minter.password)
        .await
        .map_err(fail(0, Operation::AccessToken))?;
    let request = MintRequest {
        discharge_key: minter_key,
        mode: options.mode,
        requestor: minter.web_id.clone(),
        resource_uri: resource_uri.to_string(),
    };
    let root = client
        .mint(&minter.web_id, &request, &minter_access)
        .await
        .map_err(fail(0, Operation::Mint))?;
    let root_proof = client
        .discharge(&root, &minter.web_id, &minter_access)
        .await
        .map_err(fail(0, Operation::Discharge))?;
    debug!(minter = %minter.web_id, "Minted and discharged root token");

    // Delegation, strictly in position order.
    let mut tokens = Vec::with_capacity(chain_length);
    tokens.push(root);
    for (offset, delegatee) in delegatees.iter().enumerate() {
        let position = offset + 1;
        let key = discharge_key(client, &delegatee.web_id, options.key_exchange)
            .await
            .map_err(fail(position, Operation::KeyRetrieval))?;
        let token = client
            .delegate(&tokens[position - 1], &delegatee.web_id, key.as_ref())
            .await
            .map_err(fail(position, Operation::Delegate))?;
        debug!(position, holder = %delegatee.web_id, "Delegated token");
        tokens.push(token);
    }

    // Discharge proofs for the delegatees, all or nothing.
    let discharges = delegatees.iter().enumerate().map(|(offset, delegatee)| {
        let position = offset + 1;
        let token = &tokens[position];
        async move {
            let access = client
                .retrieve_access_token(
                    &delegatee.web_id.pod_origin(),
                    &delegatee.email,
                    &delegatee.password,
                )
                .await
                .map_err(fail(position, Operation::AccessToken))?;
            client
                .discharge(token, &delegatee.web_id, &access)
                .await
                .map_err(fail(position, Operation::Discharge))
        }
    });
    let delegatee_proofs = try_join_all(discharges).await?;

    let mut proofs = Vec::with_capacity(chain_length);
    proofs.push(root_proof);
    proofs.extend(delegatee_proofs);

    debug!(chain_length, "Delegation chain established");
    DelegationChain::from_parts(tokens, proofs)
}

/// Retrieve `agent`'s discharge key, or nothing when keys are not exchanged.
pub(crate) async fn discharge_key<C>(
    client: &C,
    agent: &AgentId,
    key_exchange: KeyExchange,
) -> std::result::Result<Option<DischargeKey>, ProtocolError>
where
    C: DelegationClient + ?Sized,
{
    match key_exchange {
        KeyExchange::PerParty => client.public_discharge_key(agent).await.map(Some),
        KeyExchange::None => Ok(None),
    }
}
