//! Protocol client boundary.
//!
//! The delegation protocol itself (minting, discharge cryptography, macaroon
//! serialization, DPoP transport) lives behind [`DelegationClient`]. The
//! experiment runners only ever see the opaque artifacts defined here.
//!
//! # Artifacts
//!
//! - [`DelegationToken`]: a serialized macaroon, minted at chain position 0 or
//!   derived from the previous position by delegation.
//! - [`DischargeProof`]: a serialized discharge macaroon proving that the
//!   holder of one chain position satisfied that position's third-party caveat.
//! - [`CredentialBundle`]: one token plus a prefix of the discharge chain, the
//!   exact credential set sent to the resource server.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Canonical identity URI of an agent (a WebID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(Url);

impl AgentId {
    /// Parse an absolute identity URI.
    pub fn parse(uri: &str) -> Result<Self, url::ParseError> {
        Url::parse(uri).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Origin of the pod server hosting this identity, with a trailing slash.
    ///
    /// `http://localhost:3000/Alice/profile/card#me` becomes
    /// `http://localhost:3000/`.
    pub fn pod_origin(&self) -> String {
        format!("{}/", self.0.origin().ascii_serialization())
    }
}

impl TryFrom<String> for AgentId {
    type Error = url::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0.into()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent taking part in an experiment: identity plus login credentials.
#[derive(Debug, Deserialize)]
pub struct Agent {
    pub web_id: AgentId,
    pub email: String,
    pub password: SecretString,
}

impl Agent {
    pub fn new(web_id: AgentId, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            web_id,
            email: email.into(),
            password: SecretString::new(password.into()),
        }
    }
}

macro_rules! opaque_artifact {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(serialized: impl Into<String>) -> Self {
                Self(serialized.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let prefix: String = self.0.chars().take(12).collect();
                write!(f, "{}({}.., {} bytes)", stringify!($name), prefix, self.0.len())
            }
        }
    };
}

opaque_artifact!(
    /// Public key an agent's discharge service uses for third-party caveats.
    DischargeKey
);
opaque_artifact!(
    /// Serialized delegation token (attenuated macaroon).
    DelegationToken
);
opaque_artifact!(
    /// Serialized discharge macaroon for one chain position.
    DischargeProof
);

/// Proof-of-possession bound access token for an agent's pod server.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into()))
    }

    pub fn secret(&self) -> &SecretString {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Access mode granted by a minted token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Read,
    Append,
    Write,
    Control,
}

/// Parameters of a mint request.
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// Discharge key of the requestor. `None` for protocol variants without a
    /// per-party key exchange.
    pub discharge_key: Option<DischargeKey>,
    pub mode: AccessMode,
    pub requestor: AgentId,
    pub resource_uri: String,
}

/// A token plus the discharge proofs presented alongside it.
#[derive(Debug, Clone, Copy)]
pub struct CredentialBundle<'a> {
    pub token: &'a DelegationToken,
    pub proofs: &'a [DischargeProof],
}

impl<'a> CredentialBundle<'a> {
    pub fn new(token: &'a DelegationToken, proofs: &'a [DischargeProof]) -> Self {
        Self { token, proofs }
    }

    /// Serialized form `[token, proof_0, .., proof_k]`.
    pub fn serialized(&self) -> Vec<&'a str> {
        std::iter::once(self.token.as_str())
            .chain(self.proofs.iter().map(DischargeProof::as_str))
            .collect()
    }
}

/// Resource content returned by a successful access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub body: String,
}

/// Confirmation returned by a successful revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationReceipt {
    pub message: String,
}

/// The protocol operations, used to label failures and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    KeyRetrieval,
    AccessToken,
    Mint,
    Delegate,
    Discharge,
    Access,
    Revoke,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyRetrieval => "discharge-key",
            Self::AccessToken => "access-token",
            Self::Mint => "mint",
            Self::Delegate => "delegate",
            Self::Discharge => "discharge",
            Self::Access => "access",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors reported by a protocol client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connection failed, timed out or was reset.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with an error status.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A token, proof or response could not be decoded.
    #[error("malformed artifact: {0}")]
    Malformed(String),

    /// Credentials were refused.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Client for the delegation protocol.
///
/// Every method is one round trip. Implementations must not retry: measured
/// latency has to reflect a single attempt.
#[async_trait]
pub trait DelegationClient: Send + Sync {
    /// Fetch the public discharge key of `agent`.
    async fn public_discharge_key(&self, agent: &AgentId) -> Result<DischargeKey, ProtocolError>;

    /// Log in at `pod_origin` and obtain an access token.
    async fn retrieve_access_token(
        &self,
        pod_origin: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<AccessToken, ProtocolError>;

    /// Mint a root delegation token on behalf of `minter`.
    async fn mint(
        &self,
        minter: &AgentId,
        request: &MintRequest,
        access_token: &AccessToken,
    ) -> Result<DelegationToken, ProtocolError>;

    /// Derive a token for `new_holder` from `token`.
    async fn delegate(
        &self,
        token: &DelegationToken,
        new_holder: &AgentId,
        discharge_key: Option<&DischargeKey>,
    ) -> Result<DelegationToken, ProtocolError>;

    /// Discharge the last third-party caveat of `token` as `agent`.
    async fn discharge(
        &self,
        token: &DelegationToken,
        agent: &AgentId,
        access_token: &AccessToken,
    ) -> Result<DischargeProof, ProtocolError>;

    /// Access `resource_uri` presenting `bundle`.
    async fn access(
        &self,
        resource_uri: &str,
        bundle: CredentialBundle<'_>,
    ) -> Result<AccessGrant, ProtocolError>;

    /// Cut the delegation edge `revoker -> revokee`, authenticated by `bundle`.
    async fn revoke(
        &self,
        revoker: &AgentId,
        revokee: &AgentId,
        bundle: CredentialBundle<'_>,
    ) -> Result<RevocationReceipt, ProtocolError>;
}
