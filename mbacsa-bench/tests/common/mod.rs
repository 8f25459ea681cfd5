//! Shared test fixtures: agents and a recording protocol client.

#![allow(dead_code)]

use async_trait::async_trait;
use mbacsa_bench::client::{
    AccessGrant, AccessToken, Agent, AgentId, CredentialBundle, DelegationClient,
    DelegationToken, DischargeKey, DischargeProof, MintRequest, Operation, ProtocolError,
    RevocationReceipt,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Mutex;

pub const RESOURCE: &str = "http://localhost:3000/Bob/social/post1.txt";

pub fn agent_id(name: &str) -> AgentId {
    AgentId::parse(&format!("http://localhost:3000/{}/profile/card#me", name)).unwrap()
}

pub fn agent(name: &str) -> Agent {
    Agent::new(agent_id(name), format!("{}@example.com", name), name)
}

/// `n` distinct agents named `agent0 .. agent{n-1}`.
pub fn agents(n: usize) -> Vec<Agent> {
    (0..n).map(|i| agent(&format!("agent{}", i))).collect()
}

/// One observed protocol call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DischargeKey { agent: String },
    AccessToken { origin: String },
    Mint { minter: String, has_key: bool },
    Delegate { token: String, to: String, has_key: bool },
    Discharge { token: String, agent: String },
    Access { resource: String, bundle: Vec<String> },
    Revoke { revoker: String, revokee: String, bundle: Vec<String> },
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::DischargeKey { .. } => Operation::KeyRetrieval,
            Call::AccessToken { .. } => Operation::AccessToken,
            Call::Mint { .. } => Operation::Mint,
            Call::Delegate { .. } => Operation::Delegate,
            Call::Discharge { .. } => Operation::Discharge,
            Call::Access { .. } => Operation::Access,
            Call::Revoke { .. } => Operation::Revoke,
        }
    }
}

/// Protocol client that answers deterministically and records every call.
///
/// Tokens spell out their lineage: `mint(a0)`, then `mint(a0)>a1`, ... Proofs
/// are `proof[<token>|<agent>]`, so a test can check which token a proof
/// attests.
#[derive(Debug, Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    /// Fail the n-th (zero-based) call of an operation
    failures: HashMap<Operation, usize>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(operation: Operation, nth: usize) -> Self {
        let mut failures = HashMap::new();
        failures.insert(operation, nth);
        Self {
            calls: Mutex::new(Vec::new()),
            failures,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    fn record(&self, call: Call) -> Result<(), ProtocolError> {
        let mut calls = self.calls.lock().unwrap();
        let operation = call.operation();
        let seen = calls.iter().filter(|c| c.operation() == operation).count();
        calls.push(call);
        match self.failures.get(&operation) {
            Some(&nth) if nth == seen => Err(ProtocolError::Transport(format!(
                "injected failure on {} #{}",
                operation, nth
            ))),
            _ => Ok(()),
        }
    }
}

pub fn proof_for(token: &str, agent: &AgentId) -> String {
    format!("proof[{}|{}]", token, agent)
}

fn bundle_strings(bundle: CredentialBundle<'_>) -> Vec<String> {
    bundle.serialized().into_iter().map(String::from).collect()
}

#[async_trait]
impl DelegationClient for RecordingClient {
    async fn public_discharge_key(&self, agent: &AgentId) -> Result<DischargeKey, ProtocolError> {
        self.record(Call::DischargeKey {
            agent: agent.to_string(),
        })?;
        Ok(DischargeKey::new(format!("key({})", agent)))
    }

    async fn retrieve_access_token(
        &self,
        pod_origin: &str,
        _email: &str,
        _password: &SecretString,
    ) -> Result<AccessToken, ProtocolError> {
        self.record(Call::AccessToken {
            origin: pod_origin.to_string(),
        })?;
        Ok(AccessToken::new("dpop"))
    }

    async fn mint(
        &self,
        minter: &AgentId,
        request: &MintRequest,
        _access_token: &AccessToken,
    ) -> Result<DelegationToken, ProtocolError> {
        self.record(Call::Mint {
            minter: minter.to_string(),
            has_key: request.discharge_key.is_some(),
        })?;
        Ok(DelegationToken::new(format!("mint({})", minter)))
    }

    async fn delegate(
        &self,
        token: &DelegationToken,
        new_holder: &AgentId,
        discharge_key: Option<&DischargeKey>,
    ) -> Result<DelegationToken, ProtocolError> {
        self.record(Call::Delegate {
            token: token.as_str().to_string(),
            to: new_holder.to_string(),
            has_key: discharge_key.is_some(),
        })?;
        Ok(DelegationToken::new(format!("{}>{}", token.as_str(), new_holder)))
    }

    async fn discharge(
        &self,
        token: &DelegationToken,
        agent: &AgentId,
        _access_token: &AccessToken,
    ) -> Result<DischargeProof, ProtocolError> {
        self.record(Call::Discharge {
            token: token.as_str().to_string(),
            agent: agent.to_string(),
        })?;
        Ok(DischargeProof::new(proof_for(token.as_str(), agent)))
    }

    async fn access(
        &self,
        resource_uri: &str,
        bundle: CredentialBundle<'_>,
    ) -> Result<AccessGrant, ProtocolError> {
        self.record(Call::Access {
            resource: resource_uri.to_string(),
            bundle: bundle_strings(bundle),
        })?;
        Ok(AccessGrant {
            body: "ok".to_string(),
        })
    }

    async fn revoke(
        &self,
        revoker: &AgentId,
        revokee: &AgentId,
        bundle: CredentialBundle<'_>,
    ) -> Result<RevocationReceipt, ProtocolError> {
        self.record(Call::Revoke {
            revoker: revoker.to_string(),
            revokee: revokee.to_string(),
            bundle: bundle_strings(bundle),
        })?;
        Ok(RevocationReceipt {
            message: "revoked".to_string(),
        })
    }
}
