//! Scheduler module for running probes on a per-target timer.

mod registry;

pub use registry::*;

use crate::db::{DbError, Store, Target};
use crate::notify::{Event, Notifier};
use crate::probe::{ProbeConfig, ProbeError, Prober};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    store: Arc<Store>,
    notifier: Notifier,
    prober: Prober,
    timers: Arc<TimerRegistry>,
}

impl Scheduler {
    /// Create a new scheduler over the given store.
    pub fn new(store: Arc<Store>, notifier: Notifier) -> Result<Self, ProbeError> {
        Ok(Self {
            store,
            notifier,
            prober: Prober::new()?,
            timers: Arc::new(TimerRegistry::new()),
        })
    }

    /// Schedule every persisted target.
    pub async fn start(&self) -> Result<usize, DbError> {
        let targets = self.store.list_targets()?;

        tracing::info!("Starting scheduler with {} targets", targets.len());

        for target in &targets {
            self.schedule(target).await;
        }

        Ok(targets.len())
    }

    /// Start probing a target, or re-arm it if it is already scheduled.
    ///
    /// The first probe cycle runs immediately; later cycles follow
    /// `interval_ms`. Any previous timer for the same id is cancelled.
    pub async fn schedule(&self, target: &Target) {
        let config = ProbeConfig::new(&target.address);
        let period = Duration::from_millis(target.interval_ms.max(1));

        let cycle = Arc::new(ProbeCycle {
            target_id: target.id.clone(),
            config,
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            prober: self.prober.clone(),
            timers: self.timers.clone(),
        });

        let handle = tokio::spawn(run_probe_loop(cycle, period));

        if self.timers.replace(target.id.clone(), handle).await {
            tracing::info!(
                "Scheduler: Re-armed target {} ({}) every {:?}",
                target.name,
                target.address,
                period
            );
        } else {
            tracing::info!(
                "Scheduler: Adding target {} ({}) every {:?}",
                target.name,
                target.address,
                period
            );
        }
    }

    /// Stop probing a target. Probes already in flight still complete.
    pub async fn unschedule(&self, id: &str) -> bool {
        let removed = self.timers.cancel(id).await;
        if removed {
            tracing::info!("Scheduler: Removed target {}", id);
        }
        removed
    }

    /// Cancel every timer.
    pub async fn stop_all(&self) {
        let count = self.timers.cancel_all().await;
        tracing::info!("Scheduler: Stopped {} targets", count);
    }

    #[cfg(test)]
    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.timers.contains(id).await
    }

    pub async fn scheduled_count(&self) -> usize {
        self.timers.len().await
    }
}

/// Everything one probe cycle needs, shared by all ticks of a target.
struct ProbeCycle {
    target_id: String,
    config: ProbeConfig,
    store: Arc<Store>,
    notifier: Notifier,
    prober: Prober,
    timers: Arc<TimerRegistry>,
}

impl ProbeCycle {
    /// Probe, classify, record, notify.
    async fn run(&self) {
        let result = self.prober.run(&self.config).await.into_result();

        match self.store.record_result(&self.target_id, &result) {
            Ok(Some(target)) => {
                tracing::debug!(
                    "Probe for {}: {} in {}ms",
                    target.name,
                    result.status,
                    result.latency_ms
                );
                self.notifier.emit(Event::HealthUpdate(target));
            }
            Ok(None) => {
                // Deleted while we were probing. Ids are never reused, so any
                // timer still registered for it is stale.
                tracing::debug!("Dropping result for deleted target {}", self.target_id);
                self.timers.cancel(&self.target_id).await;
            }
            Err(e) => {
                tracing::error!("Failed to record result for {}: {}", self.target_id, e);
            }
        }
    }
}

/// Run the timer loop for a single target.
///
/// Each tick dispatches an independent task, so slow probes never delay the
/// timer and cycles for the same target may overlap.
async fn run_probe_loop(cycle: Arc<ProbeCycle>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let cycle = cycle.clone();
        tokio::spawn(async move {
            cycle.run().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Status, TargetInput, TargetPatch};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    fn setup() -> (Arc<Store>, Notifier, Scheduler) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let notifier = Notifier::default();
        let scheduler = Scheduler::new(store.clone(), notifier.clone()).unwrap();
        (store, notifier, scheduler)
    }

    fn create(store: &Store, address: &str, interval_ms: u64) -> Target {
        store
            .create_target(TargetInput {
                name: "test".to_string(),
                address: address.to_string(),
                interval_ms: Some(interval_ms),
            })
            .unwrap()
    }

    async fn next_update(rx: &mut Receiver<Event>) -> Target {
        match rx.recv().await.unwrap() {
            Event::HealthUpdate(target) => target,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    fn drain(rx: &mut Receiver<Event>) -> usize {
        let mut count = 0;
        loop {
            match rx.try_recv() {
                Ok(Event::HealthUpdate(_)) => count += 1,
                Ok(other) => panic!("unexpected event: {:?}", other),
                Err(TryRecvError::Empty) => return count,
                Err(e) => panic!("receiver error: {:?}", e),
            }
        }
    }

    #[tokio::test]
    async fn test_first_probe_runs_immediately() {
        let (store, notifier, scheduler) = setup();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let target = create(&store, &addr.to_string(), 60_000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;

        let updated = tokio::time::timeout(Duration::from_secs(3), next_update(&mut rx))
            .await
            .expect("no probe within 3s");

        assert_eq!(updated.id, target.id);
        assert_eq!(updated.history.len(), 1);
        let status = updated.current_status.unwrap();
        assert_eq!(status.status, Status::Healthy);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target_records_down() {
        let (store, notifier, scheduler) = setup();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let target = create(&store, &addr.to_string(), 60_000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;

        let updated = tokio::time::timeout(Duration::from_secs(6), next_update(&mut rx))
            .await
            .expect("no probe within 6s");
        let status = updated.current_status.unwrap();
        assert_eq!(status.status, Status::Down);
        assert!(status.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let (store, notifier, scheduler) = setup();
        let target = create(&store, "not a url", 1000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;

        // Immediate cycle plus ticks at 1s, 2s, 3s.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(drain(&mut rx), 4);

        let history = store.history(&target.id).unwrap().unwrap();
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|r| r.status == Status::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedule_stops_probes() {
        let (store, notifier, scheduler) = setup();
        let target = create(&store, "not a url", 1000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;
        next_update(&mut rx).await;

        assert!(scheduler.unschedule(&target.id).await);
        assert!(!scheduler.is_scheduled(&target.id).await);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(drain(&mut rx), 0);
        assert!(!scheduler.unschedule(&target.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_applies_new_interval() {
        let (store, notifier, scheduler) = setup();
        let target = create(&store, "not a url", 10_000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;
        next_update(&mut rx).await;

        let patch = TargetPatch {
            interval_ms: Some(2000),
            ..Default::default()
        };
        let updated = store.update_target(&target.id, patch).unwrap().unwrap();
        scheduler.schedule(&updated).await;
        assert_eq!(scheduler.scheduled_count().await, 1);

        // Immediate cycle plus ticks at 2s, 4s, 6s; the old 10s timer is gone.
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(drain(&mut rx), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_target_is_dropped_and_timer_cancelled() {
        let (store, notifier, scheduler) = setup();
        let target = create(&store, "not a url", 1000);

        let mut rx = notifier.subscribe();
        scheduler.schedule(&target).await;
        next_update(&mut rx).await;

        // Deleted behind the scheduler's back: the next cycle finds nothing.
        assert!(store.delete_target(&target.id).unwrap());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(drain(&mut rx), 0);
        assert!(!scheduler.is_scheduled(&target.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_schedules_persisted_targets() {
        let (store, _notifier, scheduler) = setup();
        create(&store, "not a url", 1000);
        create(&store, "also not a url", 1000);

        assert_eq!(scheduler.start().await.unwrap(), 2);
        assert_eq!(scheduler.scheduled_count().await, 2);

        scheduler.stop_all().await;
        assert_eq!(scheduler.scheduled_count().await, 0);
    }
}
