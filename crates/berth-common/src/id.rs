//! Container and scope ID generation and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BerthError, BerthResult};

/// Maximum length of any Berth identifier.
const MAX_LENGTH: usize = 64;

/// Validate an identifier string.
///
/// Identifiers must be 1-64 characters, contain only alphanumeric
/// characters, hyphens, and underscores, and start alphanumeric.
fn validate(id: &str) -> BerthResult<()> {
    if id.is_empty() || id.len() > MAX_LENGTH {
        return Err(BerthError::InvalidId { id: id.to_string() });
    }

    let mut chars = id.chars();
    // Non-empty, checked above.
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(BerthError::InvalidId { id: id.to_string() });
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(BerthError::InvalidId { id: id.to_string() });
        }
    }

    Ok(())
}

/// A validated container ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> BerthResult<Self> {
        let id = id.into();
        validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a new random container ID.
    ///
    /// The ID is a 12-character hex string derived from a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(hex::encode(&uuid.as_bytes()[..6]))
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated scope ID.
///
/// Scope IDs follow the same character rules as container IDs; they are
/// assigned once at scope creation and never change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    /// Create a new scope ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> BerthResult<Self> {
        let id = id.into();
        validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a new random scope ID.
    ///
    /// The ID is an 8-character hex string derived from a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(hex::encode(&uuid.as_bytes()[..4]))
    }

    /// Get the scope ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScopeId {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ScopeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
