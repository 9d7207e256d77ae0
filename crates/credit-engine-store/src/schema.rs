//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger entries, keyed by entry id (ULID).
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Index: entries by user, keyed by `user_id || account_version`.
    /// Value is the entry id.
    pub const LEDGER_BY_USER: &str = "ledger_by_user";

    /// Index: idempotency key to entry id. Enforces key uniqueness.
    pub const IDEMPOTENCY_KEYS: &str = "idempotency_keys";

    /// Hold records, keyed by hold id.
    pub const HOLDS: &str = "holds";

    /// Index: `reserved` holds by expiry, keyed by `expires_at || hold_id`.
    /// Value is empty (index only). Entries are removed when the hold settles.
    pub const HOLDS_BY_EXPIRY: &str = "holds_by_expiry";

    /// Index: holds by user, keyed by `user_id || created_at || hold_id`.
    /// Value is empty (index only).
    pub const HOLDS_BY_USER: &str = "holds_by_user";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::LEDGER_ENTRIES,
        cf::LEDGER_BY_USER,
        cf::IDEMPOTENCY_KEYS,
        cf::HOLDS,
        cf::HOLDS_BY_EXPIRY,
        cf::HOLDS_BY_USER,
    ]
}
