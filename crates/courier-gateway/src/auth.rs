use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use courier_core::security::Role;

/// Who is on the other end of an accepted socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    /// End-user identity the credential resolved to. Operators have none.
    pub subject: Option<String>,
}

impl Principal {
    pub fn operator() -> Self {
        Self {
            role: Role::Operator,
            subject: None,
        }
    }

    pub fn end_user(subject: impl Into<String>) -> Self {
        Self {
            role: Role::EndUser,
            subject: Some(subject.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("role {0} requires a credential")]
    MissingCredential(Role),

    #[error("credential not recognized")]
    InvalidCredential,
}

/// Decides whether a handshake may proceed.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, role: Role, credential: Option<&str>) -> Result<Principal, AuthError>;
}

/// Fixed token → subject table. Operators are trusted implicitly.
#[derive(Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        let _ = self.tokens.insert(token.into(), subject.into());
        self
    }

    pub fn from_map(tokens: &BTreeMap<String, String>) -> Self {
        Self {
            tokens: tokens.iter().map(|(t, s)| (t.clone(), s.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl std::fmt::Debug for StaticTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenVerifier")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, role: Role, credential: Option<&str>) -> Result<Principal, AuthError> {
        match role {
            Role::Operator => Ok(Principal::operator()),
            Role::EndUser => {
                let token = credential
                    .filter(|c| !c.is_empty())
                    .ok_or(AuthError::MissingCredential(role))?;
                self.tokens
                    .get(token)
                    .map(|subject| Principal::end_user(subject.clone()))
                    .ok_or(AuthError::InvalidCredential)
            }
        }
    }
}
