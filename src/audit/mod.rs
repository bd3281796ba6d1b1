//! Routing audit log
//!
//! Every routed turn leaves a record of its decision and provider trail.
//! Records live in memory only and the oldest are evicted past a fixed
//! capacity. Each record carries a SHA-256 digest of its trail so a record
//! copied into logs or a support ticket can be checked for tampering.

use crate::models::{ProviderAttempt, RoutingDecision};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub turn_id: Uuid,
    pub user_id: Uuid,
    pub decision: RoutingDecision,
    pub trail: Vec<ProviderAttempt>,
    /// Provider whose answer was returned; `None` when the chain was exhausted
    pub answered_by: Option<String>,
    pub proposed_action_id: Option<Uuid>,
    pub trail_digest: String,
    pub created_at: DateTime<Utc>,
}

impl RouteRecord {
    pub fn new(
        turn_id: Uuid,
        user_id: Uuid,
        decision: RoutingDecision,
        trail: Vec<ProviderAttempt>,
        answered_by: Option<String>,
        proposed_action_id: Option<Uuid>,
    ) -> Self {
        let trail_digest = compute_trail_digest(&trail);
        Self {
            turn_id,
            user_id,
            decision,
            trail,
            answered_by,
            proposed_action_id,
            trail_digest,
            created_at: Utc::now(),
        }
    }
}

pub struct AuditLog {
    records: Arc<RwLock<VecDeque<RouteRecord>>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, record: RouteRecord) -> Result<Uuid> {
        let turn_id = record.turn_id;
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(turn_id)
    }

    pub async fn get(&self, turn_id: Uuid) -> Result<Option<RouteRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.turn_id == turn_id).cloned())
    }

    /// Oldest first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<RouteRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the JSON-serialised trail, streamed into the hasher
pub fn compute_trail_digest(trail: &[ProviderAttempt]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), trail).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
