//! Identifier types for the credit engine.
//!
//! This module provides strongly-typed identifiers for users, ledger entries, holds,
//! idempotency keys and in-flight operations.
//!
//! # Macro-based ID Types
//!
//! The `uuid_id_type!` macro reduces boilerplate for UUID-based identifier types, and
//! `key_id_type!` does the same for validated string keys. Both give consistent
//! serialization, parsing, and display behaviour.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Maximum length in bytes of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Maximum length in bytes of a hold identifier.
///
/// Shorter than [`MAX_IDEMPOTENCY_KEY_LEN`] so the derived refund key always fits.
pub const MAX_HOLD_ID_LEN: usize = 128;

/// Prefix of the idempotency key used when a hold is refunded.
pub const REFUND_KEY_PREFIX: &str = "refund_";

/// Macro to define a UUID-based identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `uuid::Uuid` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - `Serialize`, `Deserialize` (as string)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Return the bytes of the UUID (16 bytes).
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

/// Macro to define a validated string key type.
///
/// Keys are non-empty, at most `$max` bytes, and made of visible ASCII characters
/// only, so they can be used verbatim as storage keys and in URLs.
macro_rules! key_id_type {
    ($name:ident, $max:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Return the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            fn validate(value: &str) -> Result<(), IdError> {
                if value.is_empty() {
                    return Err(IdError::EmptyKey);
                }
                if value.len() > $max {
                    return Err(IdError::KeyTooLong { max: $max });
                }
                if !value.bytes().all(|b| b.is_ascii_graphic()) {
                    return Err(IdError::InvalidKeyCharacter);
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }
    };
}

uuid_id_type!(UserId, "A user identifier (UUID format).\n\nOne account exists per user.");
uuid_id_type!(
    OperationId,
    "An identifier for an in-flight AI operation tracked by the operation cache."
);

key_id_type!(
    IdempotencyKey,
    MAX_IDEMPOTENCY_KEY_LEN,
    "A caller-supplied or system-generated token guaranteeing a balance mutation is applied at most once.\n\nUnique across all ledger entries."
);
key_id_type!(
    HoldId,
    MAX_HOLD_ID_LEN,
    "A hold identifier.\n\nThe hold id doubles as the idempotency key of the `reserve` ledger entry that created the hold."
);

impl FromStr for IdempotencyKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl IdempotencyKey {
    /// Whether the key has the form of a hold's refund key.
    ///
    /// Only the reservation manager may write entries under these keys.
    #[must_use]
    pub fn is_refund_key(&self) -> bool {
        self.0.starts_with(REFUND_KEY_PREFIX)
    }
}

impl FromStr for HoldId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        if s.starts_with(REFUND_KEY_PREFIX) {
            return Err(IdError::ReservedPrefix);
        }
        Ok(Self(s.to_string()))
    }
}

impl HoldId {
    /// Generate a fresh random hold identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("hold_{}", uuid::Uuid::new_v4().simple()))
    }

    /// The idempotency key of the `reserve` entry that created this hold.
    #[must_use]
    pub fn reserve_key(&self) -> IdempotencyKey {
        IdempotencyKey(self.0.clone())
    }

    /// The idempotency key of the `refund_hold` entry that cancels this hold.
    #[must_use]
    pub fn refund_key(&self) -> IdempotencyKey {
        IdempotencyKey(format!("{REFUND_KEY_PREFIX}{}", self.0))
    }
}

impl From<HoldId> for IdempotencyKey {
    fn from(id: HoldId) -> Self {
        Self(id.0)
    }
}

/// A ledger entry identifier using ULID for time-ordering.
///
/// Entry IDs are time-ordered to allow efficient range queries
/// and natural chronological sorting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerEntryId(Ulid);

impl LedgerEntryId {
    /// Create a new `LedgerEntryId` from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Generate a new `LedgerEntryId` with the current timestamp.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Return the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Return the bytes of the ULID (16 bytes).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Create a `LedgerEntryId` from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl FromStr for LedgerEntryId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for LedgerEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerEntryId({})", self.0)
    }
}

impl fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LedgerEntryId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LedgerEntryId> for String {
    fn from(id: LedgerEntryId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The key is empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// The key exceeds the maximum length.
    #[error("key exceeds {max} bytes")]
    KeyTooLong {
        /// Maximum allowed length in bytes.
        max: usize,
    },

    /// The key contains whitespace, control or non-ASCII characters.
    #[error("key must contain only visible ASCII characters")]
    InvalidKeyCharacter,

    /// The key uses a prefix reserved for system-generated refund keys.
    #[error("key must not start with \"refund_\"")]
    ReservedPrefix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrip() {
        let id = UserId::generate();
        let parsed = UserId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn user_id_serde_json() {
        let id = UserId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ledger_entry_ids_are_time_ordered() {
        let first = LedgerEntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = LedgerEntryId::generate();
        assert!(first < second);
        assert_eq!(LedgerEntryId::from_bytes(first.to_bytes()), first);
    }

    #[test]
    fn idempotency_key_validation() {
        assert!("evt_1MqLb2".parse::<IdempotencyKey>().is_ok());
        assert_eq!("".parse::<IdempotencyKey>(), Err(IdError::EmptyKey));
        assert_eq!(
            "has space".parse::<IdempotencyKey>(),
            Err(IdError::InvalidKeyCharacter)
        );
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert_eq!(
            long.parse::<IdempotencyKey>(),
            Err(IdError::KeyTooLong {
                max: MAX_IDEMPOTENCY_KEY_LEN
            })
        );
    }

    #[test]
    fn hold_id_rejects_refund_prefix() {
        assert_eq!(
            "refund_hold_1".parse::<HoldId>(),
            Err(IdError::ReservedPrefix)
        );
    }

    #[test]
    fn hold_keys() {
        let id: HoldId = "req-42".parse().unwrap();
        assert_eq!(id.reserve_key().as_str(), "req-42");
        assert_eq!(id.refund_key().as_str(), "refund_req-42");
        assert!(id.refund_key().is_refund_key());
        assert!(!id.reserve_key().is_refund_key());
    }

    #[test]
    fn generated_hold_ids_are_valid_and_distinct() {
        let a = HoldId::generate();
        let b = HoldId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().parse::<HoldId>().unwrap(), a);
    }

    #[test]
    fn hold_id_serde_rejects_invalid() {
        let result: Result<HoldId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }
}
