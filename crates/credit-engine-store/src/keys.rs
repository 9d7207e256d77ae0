//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.
//! Integers are written big-endian with the sign bit flipped so byte order matches
//! numeric order.

use chrono::{DateTime, Utc};

use credit_engine_core::{HoldId, IdempotencyKey, LedgerEntryId, UserId};

const USER_ID_LEN: usize = 16;
const ORDERED_I64_LEN: usize = 8;

/// Encode an `i64` so that byte-wise order equals numeric order.
#[must_use]
pub fn ordered_i64(value: i64) -> [u8; ORDERED_I64_LEN] {
    (value ^ i64::MIN).to_be_bytes()
}

/// Decode a value written by [`ordered_i64`].
#[must_use]
pub fn decode_ordered_i64(bytes: [u8; ORDERED_I64_LEN]) -> i64 {
    i64::from_be_bytes(bytes) ^ i64::MIN
}

/// Create an account key from a user ID.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a ledger entry key from an entry ID.
#[must_use]
pub fn entry_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a user-ledger index key.
///
/// Format: `user_id (16 bytes) || account_version (8 bytes)`
///
/// Every entry bumps the account version, so entries for a user sort in write order.
#[must_use]
pub fn user_entry_key(user_id: &UserId, account_version: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(USER_ID_LEN + ORDERED_I64_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&ordered_i64(account_version));
    key
}

/// Create a prefix for iterating all entries or holds of a user.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create an idempotency index key.
#[must_use]
pub fn idempotency_key(key: &IdempotencyKey) -> Vec<u8> {
    key.as_str().as_bytes().to_vec()
}

/// Decode an entry ID stored as an index value.
#[must_use]
pub fn decode_entry_id(value: &[u8]) -> Option<LedgerEntryId> {
    let bytes: [u8; 16] = value.try_into().ok()?;
    Some(LedgerEntryId::from_bytes(bytes))
}

/// Create a hold key from a hold ID.
#[must_use]
pub fn hold_key(hold_id: &HoldId) -> Vec<u8> {
    hold_id.as_str().as_bytes().to_vec()
}

/// Create a hold expiry index key.
///
/// Format: `expires_at millis (8 bytes) || hold_id`
#[must_use]
pub fn hold_expiry_key(expires_at: DateTime<Utc>, hold_id: &HoldId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ORDERED_I64_LEN + hold_id.as_str().len());
    key.extend_from_slice(&ordered_i64(expires_at.timestamp_millis()));
    key.extend_from_slice(hold_id.as_str().as_bytes());
    key
}

/// Split a hold expiry index key into its expiry (millis) and hold ID.
#[must_use]
pub fn split_hold_expiry_key(key: &[u8]) -> Option<(i64, HoldId)> {
    if key.len() < ORDERED_I64_LEN {
        return None;
    }
    let (millis, id) = key.split_at(ORDERED_I64_LEN);
    let millis = decode_ordered_i64(millis.try_into().ok()?);
    Some((millis, decode_hold_id(id)?))
}

/// Create a user-hold index key.
///
/// Format: `user_id (16 bytes) || created_at millis (8 bytes) || hold_id`
#[must_use]
pub fn user_hold_key(user_id: &UserId, created_at: DateTime<Utc>, hold_id: &HoldId) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(USER_ID_LEN + ORDERED_I64_LEN + hold_id.as_str().len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&ordered_i64(created_at.timestamp_millis()));
    key.extend_from_slice(hold_id.as_str().as_bytes());
    key
}

/// Extract the hold ID from a user-hold index key.
#[must_use]
pub fn hold_id_from_user_key(key: &[u8]) -> Option<HoldId> {
    decode_hold_id(key.get(USER_ID_LEN + ORDERED_I64_LEN..)?)
}

fn decode_hold_id(bytes: &[u8]) -> Option<HoldId> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
