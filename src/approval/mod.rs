//! Approval gate manager.
//!
//! Flow:
//!   1. The executor decides a skill needs approval
//!   2. `create` stores the record and publishes to `approvals:pending`
//!   3. The request task awaits `wait` (polls the durable record)
//!   4. An out-of-band resolver calls `resolve` (HTTP respond endpoint)
//!   5. The waiter unblocks with the decision, or auto-times-out
//!
//! Correctness never depends on the pub/sub channel; it is a push hint for
//! gateways that would otherwise poll. Resolution is write-once: the status
//! write is guarded on the record still being pending, inside one store
//! transaction.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::{APPROVALS_CHANNEL, Bus, NOTIFICATIONS_CHANNEL};
use crate::error::{Result, WardenError};
use crate::policy::{RiskLevel, Zone};
use crate::store::{Store, now_secs};
use crate::trace::Tracer;
use types::{ApprovalRequest, ApprovalStatus};

const KEY_PREFIX: &str = "approval";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TIMEOUT_RESOLVER: &str = "system:timeout";

pub struct ApprovalManager {
    store: Arc<Store>,
    bus: Arc<Bus>,
    tracer: Arc<Tracer>,
    default_timeout: Duration,
}

impl ApprovalManager {
    pub fn new(store: Arc<Store>, bus: Arc<Bus>, tracer: Arc<Tracer>, timeout_secs: u64) -> Self {
        Self {
            store,
            bus,
            tracer,
            default_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Create a pending approval. Returns the fresh approval id.
    ///
    /// The record is persisted with a storage TTL of twice the wait timeout,
    /// then a notification goes out on `approvals:pending`. Publish failures
    /// never reach the caller — waiters poll.
    pub async fn create(
        &self,
        action: &str,
        zone: Zone,
        risk_level: RiskLevel,
        description: &str,
        target: &str,
        proposed_content: Option<String>,
    ) -> Result<String> {
        let record = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            zone: zone.as_str().to_string(),
            risk_level: risk_level.as_str().to_string(),
            description: description.to_string(),
            target: target.to_string(),
            proposed_content,
            status: ApprovalStatus::Pending,
            created_at: now_secs(),
            resolved_at: None,
            resolved_by: None,
        };

        let key = key_for(&record.id);
        let fields = record.to_fields();
        let borrowed: Vec<(&str, &str)> = fields
            .iter()
            .map(|(f, v)| (f.as_str(), v.as_str()))
            .collect();
        self.store.hset(&key, &borrowed).await?;
        self.store
            .expire(&key, self.default_timeout.as_secs() * 2)
            .await?;

        let mut notification = json!({
            "approval_id": record.id,
            "action": record.action,
            "zone": record.zone,
            "risk_level": record.risk_level,
            "description": record.description,
            "target": record.target,
        });
        if let Some(content) = &record.proposed_content {
            notification["proposed_content"] = json!(content);
        }
        self.bus.publish(APPROVALS_CHANNEL, &notification.to_string());

        self.tracer
            .approval_event(
                &record.id,
                &record.action,
                &record.zone,
                &record.risk_level,
                "pending",
                &record.description,
            )
            .await;

        Ok(record.id)
    }

    /// Await resolution of an approval, polling the durable record.
    ///
    /// Returns the terminal status. A missing record or a storage failure
    /// reads as timeout (fail-closed). When the deadline passes, the record
    /// is resolved to timeout on behalf of the system so late resolvers see
    /// a terminal state.
    pub async fn wait(&self, approval_id: &str, timeout: Option<Duration>) -> ApprovalStatus {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let key = key_for(approval_id);
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let map = match self.store.hgetall(&key).await {
                Ok(Some(map)) => map,
                Ok(None) | Err(_) => return ApprovalStatus::Timeout,
            };
            let status = map
                .get("status")
                .and_then(|s| ApprovalStatus::parse(s))
                .unwrap_or(ApprovalStatus::Timeout);
            if status != ApprovalStatus::Pending {
                self.trace_resolution(approval_id, &map, status).await;
                return status;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }

        // Deadline reached: auto-resolve to timeout, but only if still
        // pending (a resolver may have won the race in the last interval).
        let resolved_at = now_secs().to_string();
        let wrote = self
            .store
            .hset_if(
                &key,
                "status",
                ApprovalStatus::Pending.as_str(),
                &[
                    ("status", ApprovalStatus::Timeout.as_str()),
                    ("resolved_at", &resolved_at),
                    ("resolved_by", TIMEOUT_RESOLVER),
                ],
            )
            .await
            .unwrap_or(false);
        if wrote {
            if let Ok(Some(map)) = self.store.hgetall(&key).await {
                self.trace_resolution(approval_id, &map, ApprovalStatus::Timeout)
                    .await;
            }
            let alert = json!({
                "text": format!("Approval {approval_id} timed out without a response."),
            });
            self.bus.publish(NOTIFICATIONS_CHANNEL, &alert.to_string());
        }
        ApprovalStatus::Timeout
    }

    /// Resolve a pending approval from an external authority.
    ///
    /// Returns false when the record is missing or already resolved — a
    /// resolved approval can never be re-resolved.
    pub async fn resolve(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        resolved_by: &str,
    ) -> Result<bool> {
        if !matches!(status, ApprovalStatus::Approved | ApprovalStatus::Denied) {
            return Err(WardenError::Approval(format!(
                "resolution status must be approved or denied, got {status}"
            )));
        }
        let resolved_at = now_secs().to_string();
        self.store
            .hset_if(
                &key_for(approval_id),
                "status",
                ApprovalStatus::Pending.as_str(),
                &[
                    ("status", status.as_str()),
                    ("resolved_at", &resolved_at),
                    ("resolved_by", resolved_by),
                ],
            )
            .await
    }

    pub async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>> {
        let map = self.store.hgetall(&key_for(approval_id)).await?;
        Ok(map.as_ref().and_then(ApprovalRequest::from_map))
    }

    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>> {
        let keys = self
            .store
            .keys_with_prefix(&format!("{KEY_PREFIX}:"))
            .await?;
        let mut pending = Vec::new();
        for key in keys {
            if let Some(map) = self.store.hgetall(&key).await? {
                if let Some(record) = ApprovalRequest::from_map(&map) {
                    if record.status == ApprovalStatus::Pending {
                        pending.push(record);
                    }
                }
            }
        }
        pending.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        Ok(pending)
    }

    async fn trace_resolution(
        &self,
        approval_id: &str,
        map: &std::collections::HashMap<String, String>,
        status: ApprovalStatus,
    ) {
        self.tracer
            .approval_event(
                approval_id,
                map.get("action").map(String::as_str).unwrap_or(""),
                map.get("zone").map(String::as_str).unwrap_or(""),
                map.get("risk_level").map(String::as_str).unwrap_or(""),
                status.as_str(),
                map.get("description").map(String::as_str).unwrap_or(""),
            )
            .await;
    }
}

fn key_for(approval_id: &str) -> String {
    format!("{KEY_PREFIX}:{approval_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (ApprovalManager, Arc<Store>, Arc<Bus>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let bus = Arc::new(Bus::new());
        let tracer = Arc::new(Tracer::new(Some(store.clone())));
        let mgr = ApprovalManager::new(store.clone(), bus.clone(), tracer, 300);
        (mgr, store, bus)
    }

    async fn create_sample(mgr: &ApprovalManager) -> String {
        mgr.create(
            "skill:web_search",
            Zone::External,
            RiskLevel::Low,
            "Execute skill 'web_search' for user u1",
            "web_search",
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (mgr, _store, _bus) = manager();
        let id = mgr
            .create(
                "file:write",
                Zone::Identity,
                RiskLevel::Medium,
                "Write soul.md",
                "/agent/soul.md",
                Some("new content".into()),
            )
            .await
            .unwrap();

        let record = mgr.get(&id).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.action, "file:write");
        assert_eq!(record.zone, "identity");
        assert_eq!(record.risk_level, "medium");
        assert_eq!(record.description, "Write soul.md");
        assert_eq!(record.target, "/agent/soul.md");
        assert_eq!(record.proposed_content.as_deref(), Some("new content"));
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert!(record.resolved_at.is_none());
        assert!(record.resolved_by.is_none());
    }

    #[tokio::test]
    async fn create_publishes_notification() {
        let (mgr, _store, bus) = manager();
        let mut rx = bus.subscribe(APPROVALS_CHANNEL);
        let id = create_sample(&mgr).await;

        let payload = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["approval_id"], id.as_str());
        assert_eq!(parsed["action"], "skill:web_search");
        assert_eq!(parsed["target"], "web_search");
    }

    #[tokio::test]
    async fn resolve_is_write_once() {
        let (mgr, _store, _bus) = manager();
        let id = create_sample(&mgr).await;

        assert!(mgr.resolve(&id, ApprovalStatus::Approved, "owner").await.unwrap());
        // Every subsequent attempt fails, whatever the status.
        assert!(!mgr.resolve(&id, ApprovalStatus::Denied, "owner").await.unwrap());
        assert!(!mgr.resolve(&id, ApprovalStatus::Approved, "owner").await.unwrap());

        let record = mgr.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.resolved_by.as_deref(), Some("owner"));
        assert!(record.resolved_at.is_some());
    }

    #[tokio::test]
    async fn resolve_rejects_non_terminal_status() {
        let (mgr, _store, _bus) = manager();
        let id = create_sample(&mgr).await;
        assert!(mgr.resolve(&id, ApprovalStatus::Pending, "owner").await.is_err());
        assert!(mgr.resolve(&id, ApprovalStatus::Timeout, "owner").await.is_err());
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let (mgr, _store, _bus) = manager();
        assert!(!mgr.resolve("ghost", ApprovalStatus::Approved, "owner").await.unwrap());
    }

    #[tokio::test]
    async fn wait_returns_out_of_band_resolution() {
        let (mgr, store, _bus) = manager();
        let id = create_sample(&mgr).await;

        let resolver_store = store.clone();
        let resolver_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let bus = Arc::new(Bus::new());
            let tracer = Arc::new(Tracer::new(None));
            let mgr = ApprovalManager::new(resolver_store, bus, tracer, 300);
            mgr.resolve(&resolver_id, ApprovalStatus::Denied, "owner")
                .await
                .unwrap();
        });

        let status = mgr.wait(&id, Some(Duration::from_secs(5))).await;
        assert_eq!(status, ApprovalStatus::Denied);
    }

    #[tokio::test]
    async fn wait_times_out_and_writes_resolution() {
        let (mgr, _store, bus) = manager();
        let mut alerts = bus.subscribe(NOTIFICATIONS_CHANNEL);
        let id = create_sample(&mgr).await;

        let status = mgr.wait(&id, Some(Duration::from_millis(50))).await;
        assert_eq!(status, ApprovalStatus::Timeout);

        let record = mgr.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Timeout);
        assert_eq!(record.resolved_by.as_deref(), Some(TIMEOUT_RESOLVER));

        // A timeout is terminal — late resolvers are rejected.
        assert!(!mgr.resolve(&id, ApprovalStatus::Approved, "owner").await.unwrap());

        let alert = alerts.recv().await.unwrap();
        assert!(alert.contains("timed out"));
    }

    #[tokio::test]
    async fn wait_on_missing_record_is_timeout() {
        let (mgr, _store, _bus) = manager();
        let status = mgr.wait("ghost", Some(Duration::from_secs(1))).await;
        assert_eq!(status, ApprovalStatus::Timeout);
    }

    #[tokio::test]
    async fn wait_on_broken_store_is_timeout() {
        let (mgr, store, _bus) = manager();
        let id = create_sample(&mgr).await;
        store.poison().await;
        let status = mgr.wait(&id, Some(Duration::from_secs(1))).await;
        assert_eq!(status, ApprovalStatus::Timeout);
    }

    #[tokio::test]
    async fn list_pending_excludes_resolved() {
        let (mgr, _store, _bus) = manager();
        let a = create_sample(&mgr).await;
        let b = create_sample(&mgr).await;
        mgr.resolve(&a, ApprovalStatus::Approved, "owner").await.unwrap();

        let pending = mgr.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }

    #[tokio::test]
    async fn concurrent_resolvers_race_to_one_winner() {
        let (mgr, store, _bus) = manager();
        let id = create_sample(&mgr).await;
        let mgr = Arc::new(mgr);

        let mut handles = Vec::new();
        for i in 0..8 {
            let mgr = mgr.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let status = if i % 2 == 0 {
                    ApprovalStatus::Approved
                } else {
                    ApprovalStatus::Denied
                };
                mgr.resolve(&id, status, "owner").await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        drop(store);
    }
}
