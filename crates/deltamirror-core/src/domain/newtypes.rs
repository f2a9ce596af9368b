//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for identifiers and opaque remote values.
//! Each newtype checks its invariants at construction time, so the rest of
//! the engine never handles an empty collection id or delta token.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Longest identifier accepted for collections and source roots
const MAX_ID_LEN: usize = 256;

/// Implements the string conversions shared by every validated string newtype.
macro_rules! string_newtype_conversions {
    ($name:ident) => {
        impl $name {
            /// Get the inner string reference
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s.to_string())
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

fn validate_identifier(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("identifier cannot be empty".to_string());
    }
    if value.len() > MAX_ID_LEN {
        return Err(format!("identifier longer than {MAX_ID_LEN} bytes"));
    }
    if value.chars().any(char::is_control) {
        return Err(format!("identifier contains control characters: {value:?}"));
    }
    Ok(())
}

// ============================================================================
// Run identifiers
// ============================================================================

/// Identifier of one sync run; a fresh one is bound on every accepted start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid RunId: {e}")))
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Collection and source identifiers
// ============================================================================

/// Identifier of a target collection (one `SyncRecord` each)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a new CollectionId
    ///
    /// # Errors
    /// Returns error if the id is blank, too long, or has control characters
    pub fn new(id: String) -> Result<Self, DomainError> {
        validate_identifier(&id).map_err(DomainError::InvalidCollectionId)?;
        Ok(Self(id))
    }
}

string_newtype_conversions!(CollectionId);

/// Identifier of a source root (a drive or folder being mirrored)
///
/// Delta tokens are tracked per source root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceRootId(String);

impl SourceRootId {
    /// Create a new SourceRootId
    ///
    /// # Errors
    /// Returns error if the id is blank, too long, or has control characters
    pub fn new(id: String) -> Result<Self, DomainError> {
        validate_identifier(&id).map_err(DomainError::InvalidSourceRootId)?;
        Ok(Self(id))
    }
}

string_newtype_conversions!(SourceRootId);

// ============================================================================
// Remote-side values
// ============================================================================

/// Remote item ID as reported by the provider
///
/// Format: alphanumeric plus `!`, `-` and `_`, e.g. "01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or has characters outside the provider alphabet
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '!' || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }
}

string_newtype_conversions!(RemoteId);

/// Content fingerprint reported by the remote side (opaque, compared for equality)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns error if the hash is empty or contains whitespace
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }
        if hash.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidHash(format!(
                "Hash contains whitespace: {hash:?}"
            )));
        }
        Ok(Self(hash))
    }
}

string_newtype_conversions!(ContentHash);

/// Opaque incremental-sync checkpoint handed out by the remote source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeltaToken(String);

impl DeltaToken {
    /// Create a new DeltaToken
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidDeltaToken(
                "Delta token cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }
}

string_newtype_conversions!(DeltaToken);

/// Identifier the content pipeline uses for a file
///
/// Derived from the remote item ID so the same remote file maps to the same
/// processed content no matter which collection it is synced into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&RemoteId> for FileId {
    fn from(id: &RemoteId) -> Self {
        Self(format!("remote:{}", id.as_str()))
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
