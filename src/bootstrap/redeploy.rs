use super::policy::BootstrapPolicy;
use crate::controller::ApplicationController;
use crate::core::{ApplicationId, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, watch};
use tokio::time::{Instant, sleep};
use tracing::{Instrument, Level, event, info_span};

/// What the bootstrap redeploys after a controller upgrade.
#[async_trait]
pub trait ApplicationRedeployer: Send + Sync + 'static {
    async fn list_applications(&self) -> Result<Vec<ApplicationId>>;

    /// Redeploys every deployment of the application; `false` when there was nothing to do.
    async fn redeploy(&self, id: &ApplicationId) -> Result<bool>;
}

#[async_trait]
impl ApplicationRedeployer for ApplicationController {
    async fn list_applications(&self) -> Result<Vec<ApplicationId>> {
        Ok(self
            .as_list()
            .await?
            .into_iter()
            .map(|application| application.id)
            .collect())
    }

    async fn redeploy(&self, id: &ApplicationId) -> Result<bool> {
        ApplicationController::redeploy(self, id).await
    }
}

/// Redeploys applications in rounds of bounded parallelism until all succeed, the
/// policy's time limit passes, or it is stopped.
pub struct Redeployer {
    target: Arc<dyn ApplicationRedeployer>,
    policy: BootstrapPolicy,
    not_redeployed: Mutex<BTreeSet<ApplicationId>>,
    stop: watch::Sender<bool>,
}

impl Redeployer {
    pub fn new(target: Arc<dyn ApplicationRedeployer>, policy: BootstrapPolicy) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            target,
            policy,
            not_redeployed: Mutex::new(BTreeSet::new()),
            stop,
        }
    }

    /// Makes a running `redeploy_all` return without waiting for its round.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn stopped(&self) {
        let mut stop = self.stop.subscribe();
        let _ = stop.wait_for(|stopped| *stopped).await;
    }

    /// Applications that failed in the latest round.
    pub fn not_redeployed(&self) -> BTreeSet<ApplicationId> {
        self.not_redeployed
            .lock()
            .map(|set| set.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Returns whether every application was redeployed in time. `false` also when stopped.
    pub async fn redeploy_all(&self) -> Result<bool> {
        let deadline = Instant::now() + self.policy.max_duration();
        let remaining: BTreeSet<ApplicationId> =
            self.target.list_applications().await?.into_iter().collect();
        self.set_not_redeployed(&remaining)?;

        let span = info_span!("bootstrap.redeploy", applications = remaining.len());
        self.redeploy_until(remaining, deadline).instrument(span).await
    }

    async fn redeploy_until(
        &self,
        mut remaining: BTreeSet<ApplicationId>,
        deadline: Instant,
    ) -> Result<bool> {
        loop {
            remaining = self.redeploy_round(&remaining).await;
            self.set_not_redeployed(&remaining)?;
            if self.is_stopped() && !remaining.is_empty() {
                event!(
                    Level::WARN,
                    pending = remaining.len(),
                    "redeploy stopped by shutdown"
                );
                return Ok(false);
            }
            if remaining.is_empty() {
                event!(Level::INFO, "all applications redeployed");
                return Ok(true);
            }
            if Instant::now() >= deadline {
                event!(
                    Level::ERROR,
                    failed = remaining.len(),
                    "giving up redeploying applications"
                );
                return Ok(false);
            }
            event!(
                Level::WARN,
                failed = remaining.len(),
                retry_in_ms = self.policy.sleep_when_failing_ms,
                "some applications failed to redeploy, retrying"
            );
            tokio::select! {
                _ = sleep(self.policy.sleep_when_failing()) => {}
                _ = self.stopped() => {}
            }
        }
    }

    /// One pass over `ids`, at most `parallelism` at a time. Returns the ones that failed.
    ///
    /// Once stopped, the round stops waiting and reports every id as not redeployed;
    /// redeploys already submitted run to completion on their own.
    pub async fn redeploy_round(&self, ids: &BTreeSet<ApplicationId>) -> BTreeSet<ApplicationId> {
        if self.is_stopped() {
            return ids.clone();
        }
        let permits = Arc::new(Semaphore::new(self.policy.parallelism.max(1)));
        let mut failed = BTreeSet::new();
        let mut tasks = Vec::with_capacity(ids.len());

        for id in ids {
            let acquired = tokio::select! {
                permit = permits.clone().acquire_owned() => permit,
                _ = self.stopped() => return ids.clone(),
            };
            let permit = match acquired {
                Ok(permit) => permit,
                Err(_) => {
                    failed.insert(id.clone());
                    continue;
                }
            };
            let target = self.target.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                target.redeploy(&task_id).await
            });
            tasks.push((id.clone(), handle));
        }

        let (submitted, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let outcomes = tokio::select! {
            outcomes = join_all(handles) => outcomes,
            _ = self.stopped() => return ids.clone(),
        };
        for (id, outcome) in submitted.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(true)) => event!(Level::DEBUG, application = %id, "redeployed"),
                Ok(Ok(false)) => event!(Level::DEBUG, application = %id, "nothing to redeploy"),
                Ok(Err(err)) => {
                    event!(Level::WARN, application = %id, error = %err, "redeploy failed");
                    failed.insert(id);
                }
                Err(err) => {
                    event!(Level::WARN, application = %id, error = %err, "redeploy task aborted");
                    failed.insert(id);
                }
            }
        }
        failed
    }

    fn set_not_redeployed(&self, ids: &BTreeSet<ApplicationId>) -> Result<()> {
        *self.not_redeployed.lock()? = ids.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ControllerError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Flaky {
        ids: Vec<ApplicationId>,
        failures_left: Mutex<HashMap<ApplicationId, usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Flaky {
        fn new(count: usize, failures: &[(usize, usize)]) -> Self {
            let ids: Vec<_> = (0..count)
                .map(|i| ApplicationId::default_instance("tenant", &format!("app{i}")))
                .collect();
            let failures_left = failures
                .iter()
                .map(|&(index, times)| (ids[index].clone(), times))
                .collect();
            Self {
                ids,
                failures_left: Mutex::new(failures_left),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ApplicationRedeployer for Flaky {
        async fn list_applications(&self) -> Result<Vec<ApplicationId>> {
            Ok(self.ids.clone())
        }

        async fn redeploy(&self, id: &ApplicationId) -> Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures_left.lock().unwrap();
            match failures.get_mut(id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(ControllerError::Storage(format!("{id} is broken")))
                }
                _ => Ok(true),
            }
        }
    }

    fn policy() -> BootstrapPolicy {
        BootstrapPolicy::default()
            .with_parallelism(3)
            .with_max_duration(Duration::from_millis(500))
            .with_sleep_when_failing(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn round_respects_parallelism() {
        let target = Arc::new(Flaky::new(10, &[]));
        let redeployer = Redeployer::new(target.clone(), policy());
        assert!(redeployer.redeploy_all().await.unwrap());
        assert!(target.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert!(redeployer.not_redeployed().is_empty());
    }

    #[tokio::test]
    async fn retries_until_transient_failures_clear() {
        let target = Arc::new(Flaky::new(4, &[(1, 2)]));
        let redeployer = Redeployer::new(target, policy());
        assert!(redeployer.redeploy_all().await.unwrap());
        assert!(redeployer.not_redeployed().is_empty());
    }

    #[tokio::test]
    async fn reports_what_never_succeeded() {
        let target = Arc::new(Flaky::new(4, &[(2, usize::MAX)]));
        let redeployer = Redeployer::new(target.clone(), policy());
        assert!(!redeployer.redeploy_all().await.unwrap());
        assert_eq!(
            redeployer.not_redeployed(),
            BTreeSet::from([target.ids[2].clone()])
        );
    }

    #[tokio::test]
    async fn stop_ends_a_failing_redeploy_early() {
        let target = Arc::new(Flaky::new(2, &[(0, usize::MAX)]));
        let redeployer = Arc::new(Redeployer::new(
            target,
            policy().with_max_duration(Duration::from_secs(30)),
        ));

        let running = tokio::spawn({
            let redeployer = redeployer.clone();
            async move { redeployer.redeploy_all().await }
        });
        sleep(Duration::from_millis(50)).await;
        redeployer.stop();

        let redeployed = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!redeployed);
        assert!(redeployer.is_stopped());
        assert!(!redeployer.not_redeployed().is_empty());
    }
}
