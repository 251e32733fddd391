use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Class of client on the other end of a connection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Internal staff. Authenticated by the surrounding session, no credential sent.
    Operator,
    /// Customer-facing client. Must present a credential on every handshake.
    EndUser,
}

impl Role {
    pub fn requires_credential(self) -> bool {
        matches!(self, Self::EndUser)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::EndUser => "end-user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Self::Operator),
            "end-user" => Ok(Self::EndUser),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Opaque session credential issued by the auth provider (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display() {
        assert_eq!(Role::Operator.to_string(), "operator");
        assert_eq!(Role::EndUser.to_string(), "end-user");
    }

    #[test]
    fn role_serde_matches_handshake_values() {
        let json = serde_json::to_string(&Role::EndUser).unwrap();
        assert_eq!(json, r#""end-user""#);
        let parsed: Role = serde_json::from_str(r#""operator""#).unwrap();
        assert_eq!(parsed, Role::Operator);
    }

    #[test]
    fn role_from_str() {
        assert_eq!("end-user".parse::<Role>().unwrap(), Role::EndUser);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn only_end_user_requires_credential() {
        assert!(Role::EndUser.requires_credential());
        assert!(!Role::Operator.requires_credential());
    }

    #[test]
    fn credential_debug_redacted() {
        let cred = Credential::new("tok-1");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("tok-1"), "credential leaked in debug: {debug}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn credential_expose() {
        let cred = Credential::from("tok-1");
        assert_eq!(cred.expose(), "tok-1");
        assert!(!cred.is_empty());
        assert!(Credential::new("").is_empty());
    }
}
