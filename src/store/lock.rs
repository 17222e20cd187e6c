use crate::core::{ApplicationId, ControllerError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = Arc<StdMutex<HashMap<ApplicationId, Arc<Mutex<()>>>>>;

/// Named mutual-exclusion locks, one per application id.
///
/// Entries are created on first use and pruned when the last holder or waiter is gone,
/// so the table only grows with the number of applications being worked on concurrently.
#[derive(Clone)]
pub struct LockManager {
    locks: LockTable,
    timeout: Option<Duration>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(StdMutex::new(HashMap::new())),
            timeout: None,
        }
    }

    /// Lock acquisition fails with `LockTimeout` after waiting this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Waits until the lock of `id` is exclusively held by the caller.
    pub async fn lock(&self, id: &ApplicationId) -> Result<ApplicationLock> {
        let mutex = {
            let mut locks = self.locks.lock()?;
            Arc::clone(locks.entry(id.clone()).or_default())
        };

        let acquire = Arc::clone(&mutex).lock_owned();
        let guard = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                Ok(guard) => guard,
                Err(_) => {
                    drop(mutex);
                    self.prune(id);
                    return Err(ControllerError::LockTimeout(id.to_string()));
                }
            },
            None => acquire.await,
        };
        debug!(application = %id, "acquired application lock");

        Ok(ApplicationLock {
            id: id.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    /// Number of ids currently held or waited on.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    fn prune(&self, id: &ApplicationId) {
        prune_entry(&self.locks, id);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn prune_entry(locks: &LockTable, id: &ApplicationId) {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(mutex) = locks.get(id) {
        if Arc::strong_count(mutex) == 1 {
            locks.remove(id);
        }
    }
}

/// RAII guard for an application lock. The lock is released when this is dropped.
pub struct ApplicationLock {
    id: ApplicationId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl ApplicationLock {
    pub fn id(&self) -> &ApplicationId {
        &self.id
    }

    /// Whether this guard covers `id`.
    pub fn covers(&self, id: &ApplicationId) -> bool {
        &self.id == id && self.guard.is_some()
    }
}

impl std::fmt::Debug for ApplicationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationLock").field("id", &self.id).finish()
    }
}

impl Drop for ApplicationLock {
    fn drop(&mut self) {
        // Release before pruning, so the guard's own reference is not counted.
        self.guard.take();
        prune_entry(&self.locks, &self.id);
        debug!(application = %self.id, "released application lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(name: &str) -> ApplicationId {
        ApplicationId::default_instance("tenant1", name)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_is_exclusive() {
        let manager = LockManager::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _lock = manager.lock(&id("app1")).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_locks(), 0);
    }

    #[tokio::test]
    async fn waiter_is_woken_on_release() {
        let manager = LockManager::new();
        let app = id("app1");
        let held = manager.lock(&app).await.unwrap();

        let mut waiter = tokio_test::task::spawn(manager.lock(&app));
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let lock = tokio_test::assert_ready_ok!(waiter.poll());
        assert!(lock.covers(&app));
    }

    #[tokio::test]
    async fn different_ids_do_not_block_each_other() {
        let manager = LockManager::new().with_timeout(Duration::from_millis(50));
        let _first = manager.lock(&id("app1")).await.unwrap();
        let second = manager.lock(&id("app2")).await.unwrap();
        assert!(second.covers(&id("app2")));
        assert_eq!(manager.active_locks(), 2);
    }

    #[tokio::test]
    async fn waiting_past_timeout_fails() {
        let manager = LockManager::new().with_timeout(Duration::from_millis(20));
        let held = manager.lock(&id("app1")).await.unwrap();

        let err = manager.lock(&id("app1")).await.unwrap_err();
        assert!(matches!(err, ControllerError::LockTimeout(_)));

        drop(held);
        assert!(manager.lock(&id("app1")).await.is_ok());
    }

    #[tokio::test]
    async fn lock_is_released_on_early_return() {
        async fn fails(manager: &LockManager) -> Result<()> {
            let _lock = manager.lock(&id("app1")).await?;
            Err(ControllerError::invalid("boom"))
        }

        let manager = LockManager::new().with_timeout(Duration::from_millis(50));
        assert!(fails(&manager).await.is_err());
        assert!(manager.lock(&id("app1")).await.is_ok());
    }
}
