//! Identifier types used across the Meridian engine
//!
//! Two identifiers matter to the derivation core: `AccountId`, naming a
//! participant in the network, and `StoreAddress`, the content-derived
//! identifier of one replicated store. Both are opaque and immutable once
//! created; two addresses are equal iff they denote the same store.

use crate::error::IdentifierError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier - primary identifier for accounts in the network.
///
/// Represents one account (a person or organization) that owns devices,
/// datasets and trust relations. The identifier is opaque and reveals nothing
/// about the account's devices or stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Generate a fresh random account id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an account id from caller-provided entropy.
    pub fn new_from_entropy(entropy: [u8; 32]) -> Self {
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&entropy[..16]);
        Self(Uuid::from_bytes(uuid_bytes))
    }

    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account-{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid_str = s.strip_prefix("account-").unwrap_or(s);
        let uuid = Uuid::parse_str(uuid_str)
            .map_err(|e| IdentifierError::invalid_account_id(s, e.to_string()))?;
        Ok(Self(uuid))
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Content-derived address of one replicated store.
///
/// Derived from the store's creation record, so the address is globally unique
/// without coordination. Two addresses are equal iff they denote the same
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreAddress(pub [u8; 32]);

impl StoreAddress {
    /// Derive an address from the store's creation record bytes.
    pub fn derive(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    /// Create from a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", hex::encode(self.0))
    }
}

impl FromStr for StoreAddress {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_str = s.strip_prefix("store-").unwrap_or(s);
        let decoded = hex::decode(hex_str)
            .map_err(|e| IdentifierError::invalid_store_address(s, e.to_string()))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| IdentifierError::invalid_store_address(s, "expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}
