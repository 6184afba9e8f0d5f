//! Common types used throughout crmsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Identifier of a CRM tenant (sub-account / location).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new TenantId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty after trimming
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "TenantId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity types the sync engine materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Contacts,
    Opportunities,
    Appointments,
    /// Reference data: pipelines, pipeline stages and lost reasons.
    Lookup,
}

impl Entity {
    /// All entities in default processing order.
    pub const ALL: [Entity; 4] = [
        Entity::Contacts,
        Entity::Opportunities,
        Entity::Appointments,
        Entity::Lookup,
    ];

    /// Canonical name, used as the sync-state key and in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Contacts => "contacts",
            Entity::Opportunities => "opportunities",
            Entity::Appointments => "appointments",
            Entity::Lookup => "lookup",
        }
    }

    /// Parse a name as sent by callers. Case-insensitive; accepts aliases.
    pub fn parse(name: &str) -> crate::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "contacts" | "contact" => Ok(Entity::Contacts),
            "opportunities" | "opportunity" => Ok(Entity::Opportunities),
            "appointments" | "appointment" => Ok(Entity::Appointments),
            "lookup" | "lookups" | "lost_reasons" | "reference" => Ok(Entity::Lookup),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown entity '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Entity::parse(s)
    }
}

/// Secret string (API token, shared secret) that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret for use in a header or comparison.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} chars])", self.0.len())
    }
}
