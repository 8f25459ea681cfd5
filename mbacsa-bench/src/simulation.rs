//! In-process delegation authority.
//!
//! [`LocalAuthority`] implements [`DelegationClient`] without a network. It
//! keeps the protocol's observable rules so experiments can be dry-run and
//! tested end to end:
//!
//! 1. A token carries its lineage, one caveat per chain position
//! 2. Access requires exactly one matching discharge proof per position
//! 3. Revocation requires the revoker to present a currently valid bundle for a
//!    token it holds, and invalidates the revokee's caveat and everything
//!    derived from it
//!
//! Rule 3 is what makes revocation order matter: cutting an edge near the root
//! invalidates the bundles later revocations would need.
//!
//! Artifacts are base64url-encoded JSON documents.

use crate::client::{
    AccessGrant, AccessMode, AccessToken, AgentId, CredentialBundle, DelegationClient,
    DelegationToken, DischargeKey, DischargeProof, MintRequest, ProtocolError, RevocationReceipt,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Artificial round-trip latency added to every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedLatency {
    pub base: Duration,
    /// Upper bound of a uniformly distributed extra delay
    pub jitter: Duration,
}

impl SimulatedLatency {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    fn sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
        self.base + Duration::from_micros(extra)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Caveat {
    id: String,
    holder: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenBody {
    resource: String,
    mode: AccessMode,
    lineage: Vec<Caveat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProofBody {
    caveat: String,
    agent: String,
}

/// Authority bookkeeping.
///
/// `children` only holds live delegation edges; revoking a caveat drops its
/// whole subtree. `revoked` keeps every revoked id for the authority's
/// lifetime since tokens carry them, and `sessions` keeps every issued access
/// token. Both grow with the number of calls served.
#[derive(Debug, Default)]
struct AuthorityState {
    /// Access tokens issued, mapped to the pod origin they are valid for
    sessions: HashMap<String, String>,
    /// Caveat id -> (holder, child caveat id) for every live delegation
    children: HashMap<String, Vec<(String, String)>>,
    /// Revoked caveat ids
    revoked: HashSet<String>,
}

impl AuthorityState {
    /// Revoke `caveat` and everything delegated from it, detaching it from
    /// `parent` when it has one.
    fn revoke_subtree(&mut self, parent: Option<&str>, caveat: &str) {
        if let Some(parent) = parent {
            let now_empty = match self.children.get_mut(parent) {
                Some(siblings) => {
                    siblings.retain(|(_, child)| child != caveat);
                    siblings.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.children.remove(parent);
            }
        }

        let mut pending = vec![caveat.to_string()];
        while let Some(id) = pending.pop() {
            if let Some(children) = self.children.remove(&id) {
                pending.extend(children.into_iter().map(|(_, child)| child));
            }
            self.revoked.insert(id);
        }
    }

    fn live_edges(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }
}

/// In-process implementation of the delegation protocol.
#[derive(Debug, Default)]
pub struct LocalAuthority {
    latency: SimulatedLatency,
    state: RwLock<AuthorityState>,
    calls: AtomicU64,
}

impl LocalAuthority {
    /// Create an authority that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: SimulatedLatency) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Number of protocol calls served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Discharge key the authority hands out for `agent`.
    pub fn discharge_key_for(agent: &AgentId) -> DischargeKey {
        DischargeKey::new(format!("dk:{}", URL_SAFE_NO_PAD.encode(agent.as_str())))
    }

    async fn round_trip(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.latency.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_key(agent: &AgentId, key: Option<&DischargeKey>) -> Result<(), ProtocolError> {
        match key {
            Some(key) if *key != Self::discharge_key_for(agent) => Err(ProtocolError::Rejected {
                status: 400,
                message: format!("discharge key does not belong to {}", agent),
            }),
            _ => Ok(()),
        }
    }

    /// Validate `bundle` against the current revocation state.
    fn verify_bundle(
        state: &AuthorityState,
        bundle: CredentialBundle<'_>,
    ) -> Result<TokenBody, ProtocolError> {
        let token: TokenBody = decode(bundle.token.as_str())?;
        if bundle.proofs.len() != token.lineage.len() {
            return Err(ProtocolError::Rejected {
                status: 401,
                message: format!(
                    "expected {} discharge proofs, got {}",
                    token.lineage.len(),
                    bundle.proofs.len()
                ),
            });
        }
        for (position, (caveat, proof)) in token.lineage.iter().zip(bundle.proofs).enumerate() {
            let proof: ProofBody = decode(proof.as_str())?;
            if proof.caveat != caveat.id || proof.agent != caveat.holder {
                return Err(ProtocolError::Rejected {
                    status: 401,
                    message: format!("discharge proof {} does not match its caveat", position),
                });
            }
            if state.revoked.contains(&caveat.id) {
                return Err(ProtocolError::Rejected {
                    status: 401,
                    message: format!("delegation at position {} has been revoked", position),
                });
            }
        }
        Ok(token)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_vec(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode<T: DeserializeOwned>(serialized: &str) -> Result<T, ProtocolError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(serialized)
        .map_err(|e| ProtocolError::Malformed(format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[async_trait]
impl DelegationClient for LocalAuthority {
    async fn public_discharge_key(&self, agent: &AgentId) -> Result<DischargeKey, ProtocolError> {
        self.round_trip().await;
        Ok(Self::discharge_key_for(agent))
    }

    async fn retrieve_access_token(
        &self,
        pod_origin: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<AccessToken, ProtocolError> {
        self.round_trip().await;
        if email.is_empty() || password.expose_secret().is_empty() {
            return Err(ProtocolError::Unauthorized(format!(
                "invalid credentials for {}",
                pod_origin
            )));
        }
        let token = Uuid::new_v4().to_string();
        self.state
            .write()
            .await
            .sessions
            .insert(token.clone(), pod_origin.to_string());
        Ok(AccessToken::new(token))
    }

    async fn mint(
        &self,
        minter: &AgentId,
        request: &MintRequest,
        access_token: &AccessToken,
    ) -> Result<DelegationToken, ProtocolError> {
        self.round_trip().await;
        let state = self.state.read().await;
        match state.sessions.get(access_token.secret().expose_secret()) {
            Some(origin) if *origin == minter.pod_origin() => {}
            _ => {
                return Err(ProtocolError::Unauthorized(format!(
                    "no session for {}",
                    minter
                )))
            }
        }
        Self::check_key(&request.requestor, request.discharge_key.as_ref())?;

        let body = TokenBody {
            resource: request.resource_uri.clone(),
            mode: request.mode,
            lineage: vec![Caveat {
                id: Uuid::new_v4().to_string(),
                holder: request.requestor.to_string(),
            }],
        };
        debug!(minter = %minter, resource = %body.resource, "Minted root token");
        encode(&body).map(DelegationToken::new)
    }

    async fn delegate(
        &self,
        token: &DelegationToken,
        new_holder: &AgentId,
        discharge_key: Option<&DischargeKey>,
    ) -> Result<DelegationToken, ProtocolError> {
        self.round_trip().await;
        Self::check_key(new_holder, discharge_key)?;

        let mut body: TokenBody = decode(token.as_str())?;
        let parent = body
            .lineage
            .last()
            .map(|c| c.id.clone())
            .ok_or_else(|| ProtocolError::Malformed("token has empty lineage".to_string()))?;
        let child = Caveat {
            id: Uuid::new_v4().to_string(),
            holder: new_holder.to_string(),
        };

        self.state
            .write()
            .await
            .children
            .entry(parent)
            .or_default()
            .push((child.holder.clone(), child.id.clone()));
        body.lineage.push(child);
        encode(&body).map(DelegationToken::new)
    }

    async fn discharge(
        &self,
        token: &DelegationToken,
        agent: &AgentId,
        access_token: &AccessToken,
    ) -> Result<DischargeProof, ProtocolError> {
        self.round_trip().await;
        let state = self.state.read().await;
        if !state
            .sessions
            .contains_key(access_token.secret().expose_secret())
        {
            return Err(ProtocolError::Unauthorized(format!("no session for {}", agent)));
        }

        let body: TokenBody = decode(token.as_str())?;
        let caveat = body
            .lineage
            .last()
            .ok_or_else(|| ProtocolError::Malformed("token has empty lineage".to_string()))?;
        if caveat.holder != agent.as_str() {
            return Err(ProtocolError::Rejected {
                status: 403,
                message: format!("{} cannot discharge a caveat addressed to {}", agent, caveat.holder),
            });
        }
        if state.revoked.contains(&caveat.id) {
            return Err(ProtocolError::Rejected {
                status: 401,
                message: "caveat has been revoked".to_string(),
            });
        }

        encode(&ProofBody {
            caveat: caveat.id.clone(),
            agent: caveat.holder.clone(),
        })
        .map(DischargeProof::new)
    }

    async fn access(
        &self,
        resource_uri: &str,
        bundle: CredentialBundle<'_>,
    ) -> Result<AccessGrant, ProtocolError> {
        self.round_trip().await;
        let state = self.state.read().await;
        let token = Self::verify_bundle(&state, bundle)?;
        if token.resource != resource_uri {
            return Err(ProtocolError::Rejected {
                status: 403,
                message: format!("token does not grant access to {}", resource_uri),
            });
        }
        Ok(AccessGrant {
            body: format!("contents of {}", resource_uri),
        })
    }

    async fn revoke(
        &self,
        revoker: &AgentId,
        revokee: &AgentId,
        bundle: CredentialBundle<'_>,
    ) -> Result<RevocationReceipt, ProtocolError> {
        self.round_trip().await;
        let mut state = self.state.write().await;
        let token = Self::verify_bundle(&state, bundle)?;
        let held = token
            .lineage
            .last()
            .ok_or_else(|| ProtocolError::Malformed("token has empty lineage".to_string()))?;
        if held.holder != revoker.as_str() {
            return Err(ProtocolError::Rejected {
                status: 403,
                message: format!("{} does not hold the presented token", revoker),
            });
        }

        let (parent, target) = if revoker == revokee && token.lineage.len() == 1 {
            (None, held.id.clone())
        } else {
            let child = state
                .children
                .get(&held.id)
                .and_then(|children| {
                    children
                        .iter()
                        .find(|(holder, child)| {
                            holder == revokee.as_str() && !state.revoked.contains(child)
                        })
                        .map(|(_, child)| child.clone())
                })
                .ok_or_else(|| ProtocolError::Rejected {
                    status: 404,
                    message: format!("no active delegation from {} to {}", revoker, revokee),
                })?;
            (Some(held.id.clone()), child)
        };

        state.revoke_subtree(parent.as_deref(), &target);
        debug!(
            revoker = %revoker,
            revokee = %revokee,
            live_edges = state.live_edges(),
            "Revoked delegation"
        );
        Ok(RevocationReceipt {
            message: format!("revoked {} -> {}", revoker, revokee),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::parse(&format!("http://localhost:3000/{}/profile/card#me", name)).unwrap()
    }

    async fn session(authority: &LocalAuthority, id: &AgentId) -> AccessToken {
        authority
            .retrieve_access_token(&id.pod_origin(), "user@example.com", &SecretString::new("pw".into()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_hop_access_and_revoke() {
        let authority = LocalAuthority::new();
        let alice = agent("Alice");
        let jane = agent("Jane");
        let resource = "http://localhost:3000/Bob/social/post1.txt";

        let alice_session = session(&authority, &alice).await;
        let root = authority
            .mint(
                &alice,
                &MintRequest {
                    discharge_key: Some(LocalAuthority::discharge_key_for(&alice)),
                    mode: AccessMode::Read,
                    requestor: alice.clone(),
                    resource_uri: resource.to_string(),
                },
                &alice_session,
            )
            .await
            .unwrap();
        let p0 = authority.discharge(&root, &alice, &alice_session).await.unwrap();
        let delegated = authority.delegate(&root, &jane, None).await.unwrap();
        let jane_session = session(&authority, &jane).await;
        let p1 = authority.discharge(&delegated, &jane, &jane_session).await.unwrap();

        let proofs = vec![p0, p1];
        let bundle = CredentialBundle::new(&delegated, &proofs);
        authority.access(resource, bundle).await.unwrap();

        // Missing proof is refused.
        let short = CredentialBundle::new(&delegated, &proofs[..1]);
        assert!(authority.access(resource, short).await.is_err());

        authority
            .revoke(&alice, &jane, CredentialBundle::new(&root, &proofs[..1]))
            .await
            .unwrap();
        assert!(authority.access(resource, bundle).await.is_err());
        // The root holder keeps access.
        authority
            .access(resource, CredentialBundle::new(&root, &proofs[..1]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_discharge_key_rejected() {
        let authority = LocalAuthority::new();
        let token = DelegationToken::new(
            encode(&TokenBody {
                resource: "http://localhost:3000/r".to_string(),
                mode: AccessMode::Read,
                lineage: vec![Caveat {
                    id: "c0".to_string(),
                    holder: agent("Alice").to_string(),
                }],
            })
            .unwrap(),
        );
        let wrong = LocalAuthority::discharge_key_for(&agent("Mallory"));
        let err = authority
            .delegate(&token, &agent("Jane"), Some(&wrong))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let authority = LocalAuthority::new();
        let token = DelegationToken::new("not-a-macaroon!");
        let err = authority
            .access("http://localhost:3000/r", CredentialBundle::new(&token, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(authority.call_count(), 1);
    }

    #[tokio::test]
    async fn test_revoked_subtrees_are_pruned() {
        use crate::chain::{build_chain, ChainOptions};
        use crate::client::Agent;
        use crate::scalability::{revocation_pass, DepthSamples};

        let authority = LocalAuthority::new();
        let agents: Vec<Agent> = ["Alice", "Jane", "Carol", "Dave"]
            .iter()
            .map(|name| Agent::new(agent(name), "user@example.com", "pw"))
            .collect();
        let resource = "http://localhost:3000/Bob/social/post1.txt";

        let mut samples = DepthSamples::new(4, 3);
        for _ in 0..3 {
            let chain = build_chain(&authority, &agents, 4, resource, ChainOptions::default())
                .await
                .unwrap();
            assert_eq!(authority.state.read().await.live_edges(), 3);

            revocation_pass(&authority, &agents, &chain, &mut samples)
                .await
                .unwrap();
            assert!(authority.state.read().await.children.is_empty());
        }
        assert_eq!(authority.state.read().await.revoked.len(), 12);
    }

    #[test]
    fn test_latency_sample_bounds() {
        let latency = SimulatedLatency::new(Duration::from_millis(2), Duration::from_millis(1));
        for _ in 0..100 {
            let d = latency.sample();
            assert!(d >= Duration::from_millis(2) && d <= Duration::from_millis(3));
        }
        assert_eq!(SimulatedLatency::default().sample(), Duration::ZERO);
    }
}
