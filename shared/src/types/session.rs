use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::claims::AccessClaims;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Role carried in a user's metadata.
///
/// The set is closed: anything the dashboard does not recognise lands in
/// [`Role::Unrecognized`] so every decision site has to handle it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Client,
    /// No role claim at all (absent or blank).
    Anonymous,
    /// A role string this build does not know about, e.g. a future `viewer`.
    Unrecognized(String),
}

impl Role {
    /// Parse a raw role claim. Case-insensitive, surrounding whitespace ignored.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Anonymous;
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "client" => Self::Client,
            _ => Self::Unrecognized(trimmed.to_string()),
        }
    }

    /// The claim string written into tokens.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Client => "client",
            Self::Anonymous => "",
            Self::Unrecognized(raw) => raw,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Role::parse).unwrap_or(Role::Anonymous))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Resolved identity and authorization claims for one user.
///
/// Sessions are values: an auth-state change replaces the whole thing, nothing
/// edits one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "anonymous_role")]
    pub role: Role,
    #[serde(default)]
    pub authorized_sites: BTreeSet<String>,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

fn anonymous_role() -> Role {
    Role::Anonymous
}

impl Session {
    /// Build a session from verified token claims.
    ///
    /// A `sites` claim that is not an array (or is missing) yields an empty
    /// set; non-string array members are skipped.
    pub fn from_claims(claims: &AccessClaims) -> Self {
        let authorized_sites = claims
            .sites
            .as_array()
            .map(|sites| {
                sites
                    .iter()
                    .filter_map(|s| s.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            role: Role::parse(&claims.role),
            authorized_sites,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }

    pub fn can_access_site(&self, site_id: &str) -> bool {
        self.authorized_sites.contains(site_id)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}
