//! Work queue - hands pending work units to workers one at a time.
//!
//! Units are plain files in a directory that an external producer fills.
//! Every claim runs inside a single async mutex: listing the directory,
//! picking a unit and deleting (or leasing) it happen as one step, so two
//! concurrent REQUEST_TASK calls can never receive the same unit.
//!
//! With a lease timeout configured a claimed unit stays on disk, leased to
//! the claiming peer, until that peer submits its result. If no result
//! arrives before the lease expires the unit becomes claimable again. A
//! unit handed out `max_deliveries` times without ever completing is moved
//! to the failed directory instead of going out again. Without a lease
//! timeout the unit is deleted the moment it is claimed.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lanrun_core::{validate_unit_name, CoreError, PeerId, WorkUnit};

/// Work queue errors.
///
/// `Io` means the store could not be read or written; callers must not
/// confuse it with an empty queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Work queue store unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidName(#[from] CoreError),
}

/// A time-bounded exclusive hold on a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub peer_id: PeerId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counts reported by [`WorkQueue::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Units available for claiming.
    pub pending: usize,
    /// Units handed out and awaiting a result.
    pub leased: usize,
}

/// Where units go once they have been delivered too often.
#[derive(Debug, Clone)]
struct DeliveryLimit {
    max_deliveries: u32,
    failed_dir: PathBuf,
}

/// Lease table and delivery counts, guarded together.
#[derive(Debug, Default)]
struct Claims {
    leases: HashMap<String, Lease>,
    deliveries: HashMap<String, u32>,
}

impl Claims {
    fn forget(&mut self, name: &str) -> Option<Lease> {
        self.deliveries.remove(name);
        self.leases.remove(name)
    }
}

/// Directory-backed queue of pending work units.
pub struct WorkQueue {
    dir: PathBuf,
    lease_timeout: Option<chrono::Duration>,
    delivery_limit: Option<DeliveryLimit>,
    /// Guards every claim.
    claims: Mutex<Claims>,
}

impl WorkQueue {
    /// Open (creating if needed) the queue directory.
    pub async fn open(
        dir: impl Into<PathBuf>,
        lease_timeout: Option<Duration>,
    ) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let lease_timeout = lease_timeout.map(|timeout| {
            chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX)
        });

        info!(
            dir = %dir.display(),
            lease_secs = ?lease_timeout.map(|d| d.num_seconds()),
            "Work queue opened"
        );

        Ok(Self {
            dir,
            lease_timeout,
            delivery_limit: None,
            claims: Mutex::new(Claims::default()),
        })
    }

    /// Move units delivered `max_deliveries` times to `failed_dir` rather
    /// than handing them out again. Zero means unlimited. Only meaningful
    /// with leases.
    pub fn with_delivery_limit(mut self, max_deliveries: u32, failed_dir: impl Into<PathBuf>) -> Self {
        self.delivery_limit = (max_deliveries > 0).then(|| DeliveryLimit {
            max_deliveries,
            failed_dir: failed_dir.into(),
        });
        self
    }

    /// True when claimed units are leased rather than deleted.
    pub fn uses_leases(&self) -> bool {
        self.lease_timeout.is_some()
    }

    /// Add a unit to the queue.
    ///
    /// Written under a dot-name and renamed into place, so a claim never
    /// observes a half-written unit.
    pub async fn enqueue(&self, unit: &WorkUnit) -> Result<(), QueueError> {
        validate_unit_name(&unit.name)?;

        let tmp = self.dir.join(format!(".{}.{}.tmp", unit.name, Uuid::new_v4()));
        fs::write(&tmp, &unit.payload).await?;
        if let Err(e) = fs::rename(&tmp, self.dir.join(&unit.name)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(unit = %unit.name, bytes = unit.payload.len(), "Work unit enqueued");
        Ok(())
    }

    /// Claim one unit for `peer_id`, or `None` if nothing is available.
    pub async fn claim_one(&self, peer_id: &PeerId) -> Result<Option<WorkUnit>, QueueError> {
        self.claim_one_at(peer_id, Utc::now()).await
    }

    /// Claim one unit as of `now`.
    pub async fn claim_one_at(
        &self,
        peer_id: &PeerId,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkUnit>, QueueError> {
        let mut claims = self.claims.lock().await;

        for name in self.list_names().await? {
            if let Some(lease) = claims.leases.get(&name) {
                if !lease.is_expired(now) {
                    continue;
                }
                info!(
                    unit = %name,
                    previous_peer = %lease.peer_id,
                    "Lease expired, redelivering work unit"
                );
            }

            let delivered = claims.deliveries.get(&name).copied().unwrap_or(0);
            if let Some(limit) = &self.delivery_limit {
                if self.uses_leases() && delivered >= limit.max_deliveries {
                    self.set_aside(&name, delivered, &limit.failed_dir).await?;
                    claims.forget(&name);
                    continue;
                }
            }

            let path = self.dir.join(&name);
            let payload = match fs::read(&path).await {
                Ok(payload) => payload,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Removed by someone outside the queue since the listing.
                    claims.forget(&name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.lease_timeout {
                Some(timeout) => {
                    claims.leases.insert(
                        name.clone(),
                        Lease {
                            peer_id: peer_id.clone(),
                            claimed_at: now,
                            expires_at: now
                                .checked_add_signed(timeout)
                                .unwrap_or(DateTime::<Utc>::MAX_UTC),
                        },
                    );
                    claims.deliveries.insert(name.clone(), delivered + 1);
                }
                None => match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                },
            }

            return Ok(Some(WorkUnit::new(name, payload)));
        }

        Ok(None)
    }

    /// Confirm that a result for `name` was stored.
    ///
    /// Only a leased unit is retired, and only when `peer_id` (if given)
    /// holds the lease. A unit that is pending or leased to someone else
    /// stays queued. Returns true if a unit was removed. Without leases
    /// units are already gone, so this is a no-op.
    pub async fn complete(&self, name: &str, peer_id: Option<&PeerId>) -> Result<bool, QueueError> {
        validate_unit_name(name)?;
        if !self.uses_leases() {
            return Ok(false);
        }

        let mut claims = self.claims.lock().await;
        let Some(lease) = claims.leases.get(name) else {
            debug!(unit = %name, "Result for a unit that is not leased, keeping it queued");
            return Ok(false);
        };
        if let Some(peer_id) = peer_id {
            if *peer_id != lease.peer_id {
                info!(
                    unit = %name,
                    peer_id = %peer_id,
                    holder = %lease.peer_id,
                    "Result from a peer that does not hold the lease, keeping it queued"
                );
                return Ok(false);
            }
        }

        let removed = match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            // The lease stays so the unit is not handed out again right away.
            Err(e) => return Err(e.into()),
        };
        claims.forget(name);

        if removed {
            debug!(unit = %name, "Work unit completed");
        }
        Ok(removed)
    }

    /// Give up a lease early, making the unit claimable again.
    ///
    /// Used when a TASK_PACKAGE could not be delivered. Returns false when
    /// there was no lease to drop (including delete-on-claim mode, where the
    /// unit is already gone).
    pub async fn release(&self, name: &str) -> bool {
        let mut claims = self.claims.lock().await;
        let released = claims.leases.remove(name).is_some();
        if released {
            // The unit never reached the peer, so this was not a delivery.
            if let Some(count) = claims.deliveries.get_mut(name) {
                *count = count.saturating_sub(1);
            }
            info!(unit = %name, "Lease released");
        } else if !self.uses_leases() {
            warn!(unit = %name, "Work unit was deleted on claim and cannot be returned");
        }
        released
    }

    /// Drop every lease that has expired at `now`. Returns the unit names.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut claims = self.claims.lock().await;
        let mut expired: Vec<String> = claims
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_expired(now))
            .map(|(name, _)| name.clone())
            .collect();
        expired.sort();

        for name in &expired {
            if let Some(lease) = claims.leases.remove(name) {
                info!(unit = %name, peer_id = %lease.peer_id, "Lease expired");
            }
        }
        expired
    }

    /// Current lease on `name`, if any.
    pub async fn lease(&self, name: &str) -> Option<Lease> {
        self.claims.lock().await.leases.get(name).cloned()
    }

    /// How many times `name` has been handed out without completing.
    pub async fn deliveries(&self, name: &str) -> u32 {
        self.claims
            .lock()
            .await
            .deliveries
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = Utc::now();
        let claims = self.claims.lock().await;
        let names = self.list_names().await?;

        let leased = names
            .iter()
            .filter(|name| claims.leases.get(*name).is_some_and(|l| !l.is_expired(now)))
            .count();

        Ok(QueueStats {
            pending: names.len() - leased,
            leased,
        })
    }

    /// Move a unit that keeps failing out of the queue.
    async fn set_aside(&self, name: &str, delivered: u32, failed_dir: &Path) -> Result<(), QueueError> {
        fs::create_dir_all(failed_dir).await?;
        match fs::rename(self.dir.join(name), failed_dir.join(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        warn!(
            unit = %name,
            deliveries = delivered,
            failed_dir = %failed_dir.display(),
            "Work unit never completed, moved to failed directory"
        );
        Ok(())
    }

    /// Unit names on disk, in claim order.
    async fn list_names(&self) -> Result<Vec<String>, QueueError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if validate_unit_name(&name).is_err() {
                continue;
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn queue_with(
        dir: &Path,
        lease: Option<Duration>,
        names: &[&str],
    ) -> WorkQueue {
        let queue = WorkQueue::open(dir, lease).await.unwrap();
        for name in names {
            queue
                .enqueue(&WorkUnit::new(*name, name.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        queue
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), None, &[]).await;
        assert!(queue.claim_one(&PeerId::new("w1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_without_lease_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), None, &["a.zip", "b.zip"]).await;

        let unit = queue.claim_one(&PeerId::new("w1")).await.unwrap().unwrap();
        assert_eq!(unit.name, "a.zip");
        assert_eq!(unit.payload, b"a.zip");
        assert!(!dir.path().join("a.zip").exists());
        assert!(dir.path().join("b.zip").exists());
    }

    #[tokio::test]
    async fn test_hidden_and_temporary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), None, &[]).await;
        std::fs::write(dir.path().join(".a.zip.partial.tmp"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert!(queue.claim_one(&PeerId::new("w1")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_deliver_each_unit_once() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("unit-{i:02}.zip")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let queue = Arc::new(queue_with(dir.path(), None, &refs).await);

        let mut handles = Vec::new();
        for i in 0..32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.claim_one(&PeerId::new(format!("w{i}"))).await.unwrap()
            }));
        }

        let mut delivered = Vec::new();
        let mut empty = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Some(unit) => delivered.push(unit.name),
                None => empty += 1,
            }
        }

        let unique: HashSet<_> = delivered.iter().cloned().collect();
        assert_eq!(delivered.len(), 20);
        assert_eq!(unique.len(), 20);
        assert_eq!(empty, 12);
    }

    #[tokio::test]
    async fn test_leased_unit_is_not_handed_out_twice() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"]).await;

        let unit = queue.claim_one(&PeerId::new("w1")).await.unwrap().unwrap();
        assert_eq!(unit.name, "a.zip");
        assert!(dir.path().join("a.zip").exists());
        assert!(queue.claim_one(&PeerId::new("w2")).await.unwrap().is_none());

        let lease = queue.lease("a.zip").await.unwrap();
        assert_eq!(lease.peer_id, PeerId::new("w1"));
        assert_eq!(
            queue.stats().await.unwrap(),
            QueueStats {
                pending: 0,
                leased: 1
            }
        );
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"]).await;
        let t0 = Utc::now();

        queue
            .claim_one_at(&PeerId::new("w1"), t0)
            .await
            .unwrap()
            .unwrap();
        let later = t0 + chrono::Duration::seconds(61);
        let again = queue
            .claim_one_at(&PeerId::new("w2"), later)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(again.name, "a.zip");
        assert_eq!(queue.lease("a.zip").await.unwrap().peer_id, PeerId::new("w2"));
    }

    #[tokio::test]
    async fn test_complete_deletes_leased_unit() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"]).await;

        let w1 = PeerId::new("w1");
        queue.claim_one(&w1).await.unwrap().unwrap();
        assert!(queue.complete("a.zip", Some(&w1)).await.unwrap());
        assert!(!dir.path().join("a.zip").exists());
        assert!(queue.lease("a.zip").await.is_none());
        assert_eq!(queue.deliveries("a.zip").await, 0);

        // Second confirmation for the same unit is harmless.
        assert!(!queue.complete("a.zip", Some(&w1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_keeps_unit_that_was_never_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"]).await;

        assert!(!queue.complete("a.zip", Some(&PeerId::new("w1"))).await.unwrap());
        assert!(!queue.complete("a.zip", None).await.unwrap());
        assert!(dir.path().join("a.zip").exists());

        let unit = queue.claim_one(&PeerId::new("w2")).await.unwrap().unwrap();
        assert_eq!(unit.name, "a.zip");
    }

    #[tokio::test]
    async fn test_complete_from_another_peer_keeps_the_lease() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"]).await;
        let holder = PeerId::new("w1");
        queue.claim_one(&holder).await.unwrap().unwrap();

        assert!(!queue.complete("a.zip", Some(&PeerId::new("w2"))).await.unwrap());
        assert!(dir.path().join("a.zip").exists());
        assert_eq!(queue.lease("a.zip").await.unwrap().peer_id, holder);

        // A submission that names no peer is accepted from the holder's side.
        assert!(queue.complete("a.zip", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_unit_that_never_completes_is_moved_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks");
        let failed = dir.path().join("failed");
        let queue = queue_with(&tasks, Some(Duration::from_secs(1)), &["poison.zip"])
            .await
            .with_delivery_limit(3, &failed);
        let w1 = PeerId::new("w1");
        let mut now = Utc::now();

        for attempt in 1..=3 {
            let unit = queue.claim_one_at(&w1, now).await.unwrap().unwrap();
            assert_eq!(unit.name, "poison.zip");
            assert_eq!(queue.deliveries("poison.zip").await, attempt);
            now += chrono::Duration::seconds(2);
        }

        assert!(queue.claim_one_at(&w1, now).await.unwrap().is_none());
        assert!(!tasks.join("poison.zip").exists());
        assert_eq!(std::fs::read(failed.join("poison.zip")).unwrap(), b"poison.zip");
        assert_eq!(queue.deliveries("poison.zip").await, 0);
    }

    #[tokio::test]
    async fn test_released_lease_does_not_count_as_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), Some(Duration::from_secs(60)), &["a.zip"])
            .await
            .with_delivery_limit(1, dir.path().join("failed"));
        let w1 = PeerId::new("w1");

        queue.claim_one(&w1).await.unwrap().unwrap();
        assert!(queue.release("a.zip").await);
        assert_eq!(queue.deliveries("a.zip").await, 0);

        let unit = queue.claim_one(&w1).await.unwrap().unwrap();
        assert_eq!(unit.name, "a.zip");
    }

    #[tokio::test]
    async fn test_release_and_release_expired() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(
            dir.path(),
            Some(Duration::from_secs(60)),
            &["a.zip", "b.zip"],
        )
        .await;
        let t0 = Utc::now();

        queue.claim_one_at(&PeerId::new("w1"), t0).await.unwrap();
        queue.claim_one_at(&PeerId::new("w1"), t0).await.unwrap();

        assert!(queue.release("a.zip").await);
        assert!(!queue.release("a.zip").await);

        let expired = queue
            .release_expired(t0 + chrono::Duration::seconds(120))
            .await;
        assert_eq!(expired, vec!["b.zip".to_string()]);
        assert_eq!(queue.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_missing_store_is_an_error_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir.path().join("tasks"), None, &[]).await;
        std::fs::remove_dir(dir.path().join("tasks")).unwrap();

        let result = queue.claim_one(&PeerId::new("w1")).await;
        assert!(matches!(result, Err(QueueError::Io(_))));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(dir.path(), None, &[]).await;

        let result = queue.enqueue(&WorkUnit::new("../escape.zip", vec![])).await;
        assert!(matches!(result, Err(QueueError::InvalidName(_))));
    }
}
