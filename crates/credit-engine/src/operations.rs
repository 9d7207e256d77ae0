//! Operation status cache.
//!
//! A TTL-bounded, process-local record of in-flight AI operations so callers can
//! poll progress. It is never consulted for credits; losing it loses nothing but
//! status lines.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use credit_engine_core::{HoldId, OperationId, UserId};

use crate::clock::Clock;

/// Progress of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Registered, not started.
    Pending,
    /// Running at the provider.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Failed or timed out.
    Failed,
}

/// A cached operation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// The operation.
    pub operation_id: OperationId,
    /// The account paying for it.
    pub user_id: UserId,
    /// The hold covering its cost.
    pub hold_id: HoldId,
    /// Current status.
    pub status: OperationStatus,
    /// Free-form progress or error detail.
    pub detail: Option<String>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Non-durable operation status map.
#[derive(Clone)]
pub struct OperationCache {
    records: Arc<DashMap<OperationId, OperationRecord>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl OperationCache {
    /// Create an empty cache whose records live for `ttl` after their last update.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            clock,
        }
    }

    fn is_live(&self, record: &OperationRecord, now: DateTime<Utc>) -> bool {
        now - record.updated_at < self.ttl
    }

    /// Register a new operation as `pending`, replacing any previous record.
    pub fn register(
        &self,
        operation_id: OperationId,
        user_id: UserId,
        hold_id: HoldId,
    ) -> OperationRecord {
        let record = OperationRecord {
            operation_id,
            user_id,
            hold_id,
            status: OperationStatus::Pending,
            detail: None,
            updated_at: self.clock.now(),
        };
        self.records.insert(operation_id, record.clone());
        record
    }

    /// Update the status of a live record. Returns `None` if unknown or expired.
    pub fn update(
        &self,
        operation_id: &OperationId,
        status: OperationStatus,
        detail: Option<String>,
    ) -> Option<OperationRecord> {
        let now = self.clock.now();
        let mut record = self.records.get_mut(operation_id)?;
        if !self.is_live(&record, now) {
            drop(record);
            self.records.remove(operation_id);
            return None;
        }
        record.status = status;
        record.detail = detail;
        record.updated_at = now;
        Some(record.value().clone())
    }

    /// Look up a live record.
    #[must_use]
    pub fn get(&self, operation_id: &OperationId) -> Option<OperationRecord> {
        let now = self.clock.now();
        let record = self.records.get(operation_id)?.value().clone();
        if self.is_live(&record, now) {
            Some(record)
        } else {
            self.records.remove(operation_id);
            None
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| now - record.updated_at < self.ttl);
        before.saturating_sub(self.records.len())
    }

    /// Number of records, live or not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
