//! Lease markers: exclusively-created control objects that make a
//! decision single-winner across concurrent triggers.
//!
//! A lease lives in generation-numbered slots, `lease-<name>.<gen>.json`, in
//! the control bucket. A contender creates the slot above the highest one it
//! saw with `put_if_absent`, then reads the slots back and keeps its claim
//! only if its slot is the highest and no lower slot is still live. A slot
//! is never deleted and recreated under the same number while others exist,
//! so an expired or unreadable record is taken over without a second winner.
//! A crashed holder blocks others for at most one TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::store::ObjectStore;

/// Persisted lease content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_id: String,
    pub holder: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Keys reserved under this lease, for operators
    #[serde(default)]
    pub members: Vec<String>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Result of a lease acquisition. Store failures come back as `Err`.
#[derive(Debug)]
pub enum Claim {
    Claimed(Lease),
    AlreadyClaimed {
        holder: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Claim::Claimed(_))
    }
}

/// Creates and inspects leases in one control bucket.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

pub(crate) fn lease_key(name: &str, generation: u64) -> String {
    format!("lease-{}.{}.json", name, generation)
}

fn parse_generation(name: &str, key: &str) -> Option<u64> {
    key.strip_prefix(&format!("lease-{}.", name))?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// One generation of a lease as read from the store.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    generation: u64,
    key: String,
    /// `None` when the content does not parse
    record: Option<LeaseRecord>,
}

impl Slot {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.record.as_ref().map_or(false, |r| !r.is_expired(now))
    }
}

/// Whether the record in slot `generation` with `lease_id` holds the lease,
/// given every slot visible after it was created.
pub(crate) fn holds_lease(slots: &[Slot], generation: u64, lease_id: &str, now: DateTime<Utc>) -> bool {
    let own = slots.iter().any(|s| {
        s.generation == generation && s.record.as_ref().map_or(false, |r| r.lease_id == lease_id)
    });
    own && slots
        .iter()
        .all(|s| s.generation == generation || (s.generation < generation && !s.is_live(now)))
}

fn already_claimed(top: Option<&Slot>) -> Claim {
    match top.and_then(|s| s.record.as_ref()) {
        Some(record) => Claim::AlreadyClaimed {
            holder: record.holder.clone(),
            expires_at: Some(record.expires_at),
        },
        None => Claim::AlreadyClaimed {
            holder: "unknown".to_string(),
            expires_at: None,
        },
    }
}

impl LeaseManager {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Try to take the named lease for `ttl`.
    pub async fn acquire(&self, name: &str, holder: &str, ttl: Duration) -> StorageResult<Claim> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(2));
        let now = Utc::now();

        let slots = self.slots(name).await?;
        if let Some(top) = slots.last() {
            if top.is_live(now) {
                debug!(lease = %top.key, holder = ?top.record.as_ref().map(|r| &r.holder), "Lease held elsewhere");
                return Ok(already_claimed(Some(top)));
            }
        }

        let generation = slots.last().map_or(0, |s| s.generation + 1);
        let key = lease_key(name, generation);
        let record = LeaseRecord {
            lease_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            claimed_at: now,
            expires_at: now + ttl,
            members: Vec::new(),
        };
        let body = serde_json::to_vec(&record)?;

        if !self.store.put_if_absent(&self.bucket, &key, body).await? {
            debug!(lease = %key, "Lease slot taken by another contender");
            let slots = self.slots(name).await?;
            return Ok(already_claimed(slots.last()));
        }

        // Read back: a contender that saw an older view may have created a
        // slot above ours, or a lower slot may have come back to life.
        let slots = self.slots(name).await?;
        if !holds_lease(&slots, generation, &record.lease_id, Utc::now()) {
            warn!(lease = %key, "Lost lease arbitration, withdrawing");
            self.remove(&key).await?;
            let top = slots.iter().rev().find(|s| s.generation != generation);
            return Ok(already_claimed(top));
        }

        for stale in slots.iter().filter(|s| s.generation < generation) {
            warn!(lease = %stale.key, "Removing superseded lease record");
            if let Err(e) = self.remove(&stale.key).await {
                warn!(lease = %stale.key, error = %e, "Failed to remove superseded lease record");
            }
        }

        info!(lease = %key, holder, lease_id = %record.lease_id, "Lease acquired");
        Ok(Claim::Claimed(Lease {
            store: self.store.clone(),
            bucket: self.bucket.clone(),
            key,
            record,
        }))
    }

    /// Current record for a lease, if any.
    pub async fn current(&self, name: &str) -> StorageResult<Option<LeaseRecord>> {
        Ok(self.slots(name).await?.pop().and_then(|s| s.record))
    }

    /// Every slot of the named lease, lowest generation first.
    async fn slots(&self, name: &str) -> StorageResult<Vec<Slot>> {
        let mut slots = Vec::new();
        for info in self.store.list(&self.bucket).await? {
            let Some(generation) = parse_generation(name, &info.key) else {
                continue;
            };
            let bytes = match self.store.get(&self.bucket, &info.key).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let record = match serde_json::from_slice::<LeaseRecord>(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(lease = %info.key, error = %e, "Unreadable lease record");
                    None
                }
            };
            slots.push(Slot {
                generation,
                key: info.key,
                record,
            });
        }
        slots.sort_by_key(|s| s.generation);
        Ok(slots)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match self.store.delete(&self.bucket, key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A held lease. Dropping it does not release it; call `release`.
#[derive(Clone)]
pub struct Lease {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    record: LeaseRecord,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("record", &self.record)
            .finish()
    }
}

impl Lease {
    pub fn id(&self) -> &str {
        &self.record.lease_id
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    /// Rewrite the record with the keys it reserves.
    pub async fn record_members(&mut self, members: Vec<String>) -> StorageResult<()> {
        self.record.members = members;
        let body = serde_json::to_vec(&self.record)?;
        self.store.put(&self.bucket, &self.key, body).await
    }

    /// Delete the lease if it is still ours. A missing record is fine.
    ///
    /// An expired lease is left for the next acquirer to remove, since it
    /// may already have been superseded.
    pub async fn release(&self) -> StorageResult<()> {
        if self.record.is_expired(Utc::now()) {
            warn!(lease = %self.key, "Lease expired before release, leaving it in place");
            return Ok(());
        }

        match self.store.get(&self.bucket, &self.key).await {
            Ok(bytes) => {
                let owner = serde_json::from_slice::<LeaseRecord>(&bytes)
                    .map(|r| r.lease_id)
                    .unwrap_or_default();
                if owner != self.record.lease_id {
                    warn!(lease = %self.key, "Lease was taken over, leaving it in place");
                    return Ok(());
                }
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        match self.store.delete(&self.bucket, &self.key).await {
            Ok(()) => {
                info!(lease = %self.key, lease_id = %self.record.lease_id, "Lease released");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, LeaseManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = LeaseManager::new(store.clone(), "ctl");
        (store, manager)
    }

    #[tokio::test]
    async fn test_second_acquire_is_already_claimed() {
        let (_, manager) = manager();
        let ttl = Duration::from_secs(60);

        let first = manager.acquire("gate", "worker-a", ttl).await.unwrap();
        assert!(first.is_claimed());

        match manager.acquire("gate", "worker-b", ttl).await.unwrap() {
            Claim::AlreadyClaimed { holder, expires_at } => {
                assert_eq!(holder, "worker-a");
                assert!(expires_at.is_some());
            }
            Claim::Claimed(_) => panic!("lease granted twice"),
        }
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let (store, manager) = manager();
        let ttl = Duration::from_secs(60);

        let Claim::Claimed(lease) = manager.acquire("gate", "a", ttl).await.unwrap() else {
            panic!("expected claim");
        };
        lease.release().await.unwrap();
        assert_eq!(store.count("ctl").await, 0);

        // Releasing twice is harmless.
        lease.release().await.unwrap();
        assert!(manager.acquire("gate", "b", ttl).await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_stale_lease_taken_over() {
        let (store, manager) = manager();
        let past = Utc::now() - chrono::Duration::hours(3);
        let stale = LeaseRecord {
            lease_id: "old".to_string(),
            holder: "crashed".to_string(),
            claimed_at: past,
            expires_at: past + chrono::Duration::hours(2),
            members: vec![],
        };
        store
            .put("ctl", &lease_key("gate", 0), serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let Claim::Claimed(lease) = manager
            .acquire("gate", "fresh", Duration::from_secs(60))
            .await
            .unwrap()
        else {
            panic!("stale lease should be taken over");
        };
        assert_ne!(lease.id(), "old");

        // The crashed holder's release must not remove the new lease.
        let old = Lease {
            store: store.clone(),
            bucket: "ctl".to_string(),
            key: lease_key("gate", 0),
            record: stale,
        };
        old.release().await.unwrap();
        assert_eq!(manager.current("gate").await.unwrap().unwrap().holder, "fresh");
        // The superseded slot was swept on takeover
        assert_eq!(store.keys("ctl").await, vec![lease_key("gate", 1)]);
    }

    #[tokio::test]
    async fn test_garbage_record_taken_over() {
        let (store, manager) = manager();
        store.put("ctl", &lease_key("gate", 0), b"not json".to_vec()).await.unwrap();

        let claim = manager.acquire("gate", "a", Duration::from_secs(60)).await.unwrap();
        assert!(claim.is_claimed());
        assert_eq!(manager.current("gate").await.unwrap().unwrap().holder, "a");
    }

    fn slot(generation: u64, lease_id: &str, expires_in: chrono::Duration) -> Slot {
        let now = Utc::now();
        Slot {
            generation,
            key: lease_key("gate", generation),
            record: Some(LeaseRecord {
                lease_id: lease_id.to_string(),
                holder: lease_id.to_string(),
                claimed_at: now,
                expires_at: now + expires_in,
                members: vec![],
            }),
        }
    }

    #[test]
    fn test_holds_lease_requires_highest_slot_and_no_live_predecessor() {
        let now = Utc::now();
        let live = chrono::Duration::minutes(5);
        let expired = chrono::Duration::minutes(-5);

        // Superseding an expired slot wins
        let slots = vec![slot(0, "old", expired), slot(1, "me", live)];
        assert!(holds_lease(&slots, 1, "me", now));

        // A live lower slot means someone else legitimately holds it
        let slots = vec![slot(0, "other", live), slot(1, "me", live)];
        assert!(!holds_lease(&slots, 1, "me", now));

        // A higher slot always beats ours
        let slots = vec![slot(1, "me", live), slot(2, "other", live)];
        assert!(!holds_lease(&slots, 1, "me", now));

        // Our slot must read back with our id
        let slots = vec![slot(1, "other", live)];
        assert!(!holds_lease(&slots, 1, "me", now));
        let mut unreadable = slot(1, "me", live);
        unreadable.record = None;
        assert!(!holds_lease(&[unreadable], 1, "me", now));
    }

    #[test]
    fn test_parse_generation_ignores_other_names() {
        assert_eq!(parse_generation("gate", "lease-gate.7.json"), Some(7));
        assert_eq!(parse_generation("gate", "lease-gate.x.json"), None);
        assert_eq!(parse_generation("gate", "lease-gate-b.0.json"), None);
        assert_eq!(parse_generation("gate", "published-gate.json"), None);
    }

    #[tokio::test]
    async fn test_record_members_persists() {
        let (_, manager) = manager();
        let Claim::Claimed(mut lease) = manager
            .acquire("gate", "a", Duration::from_secs(60))
            .await
            .unwrap()
        else {
            panic!("expected claim");
        };

        lease
            .record_members(vec!["a.mp4".to_string(), "b.mp4".to_string()])
            .await
            .unwrap();
        let current = manager.current("gate").await.unwrap().unwrap();
        assert_eq!(current.members, vec!["a.mp4", "b.mp4"]);
        assert_eq!(current.lease_id, lease.id());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (_, manager) = manager();
        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .acquire("gate", &format!("w{}", i), Duration::from_secs(60))
                    .await
                    .unwrap()
                    .is_claimed()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
