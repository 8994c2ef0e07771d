//! Watchdog repair of stuck and missed jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainkeeper_coordination::{CoordinationStore, MemoryStore};
use chainkeeper_scheduler::{
    Clock, HandlerRegistry, JobContext, JobDefinition, JobError, JobHandler, JobRegistry,
    JobRuntimeState, ManualClock, RunCoordinator, RunStatus, ScheduleKind, Scheduler, TokioClock,
    Watchdog,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const NOW: i64 = 1_700_000_000_000;

#[derive(Default)]
struct Counter(AtomicUsize);

#[async_trait]
impl JobHandler for Counter {
    async fn run(&self, _params: &[Value], _ctx: JobContext) -> Result<(), JobError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn sync_job() -> JobDefinition {
    // The long initial delay keeps the timer out of the way.
    JobDefinition::new("sync", "count", ScheduleKind::FixedDelay { interval_ms: 1000 })
        .with_timeout_ms(5000)
        .with_initial_delay_ms(3_600_000)
}

fn build(store: Arc<dyn CoordinationStore>, clock: Arc<dyn Clock>) -> Arc<Scheduler> {
    let mut handlers = HandlerRegistry::new();
    handlers.register("count", Arc::new(Counter::default()));
    let coordinator = Arc::new(RunCoordinator::new(store, clock.clone(), "node-b", 600));
    Scheduler::new(
        JobRegistry::from_definitions(vec![sync_job()]).unwrap(),
        Arc::new(handlers),
        coordinator,
        clock,
    )
}

fn crashed_state(last_start_ms: i64) -> JobRuntimeState {
    JobRuntimeState {
        last_start_ms,
        status: RunStatus::Running,
        run_id: Some("sync-node-a-dead".to_string()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_stuck_job_reset_after_timeout() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let scheduler = build(store.clone(), clock.clone());
    scheduler.start_all().await;

    // node-a crashed mid-run, leaving RUNNING state and its lock behind.
    let states = scheduler.coordinator().states();
    states.save("sync", &crashed_state(NOW)).await.unwrap();
    store.set_if_absent("lock:cron:sync", "node-a", 600).await.unwrap();

    let watchdog = Watchdog::new(scheduler.clone(), 5000, 10_000);
    let old_timer = scheduler.timer("sync").unwrap();

    clock.advance(4999);
    assert!(watchdog.sweep().await.is_empty());

    clock.advance(1);
    assert_eq!(watchdog.sweep().await, vec!["sync".to_string()]);

    let state = states.load("sync").await.unwrap();
    assert_eq!(state.status, RunStatus::Init);
    assert!(store.get("lock:cron:sync").await.unwrap().is_none());
    assert!(!old_timer.is_active());
    assert!(scheduler.timer("sync").unwrap().is_active());

    // The job runs again and completes normally.
    assert!(scheduler.execute("sync").await);
    assert_eq!(states.load("sync").await.unwrap().status, RunStatus::Ended);
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_missed_job_reset_after_grace_period() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let scheduler = build(store, clock.clone());
    scheduler.start_all().await;

    let overdue = JobRuntimeState {
        status: RunStatus::Ended,
        next_time_ms: Some(NOW - 10_001),
        ..Default::default()
    };
    scheduler
        .coordinator()
        .states()
        .save("sync", &overdue)
        .await
        .unwrap();

    let watchdog = Watchdog::new(scheduler.clone(), 5000, 10_000);
    assert_eq!(watchdog.sweep().await, vec!["sync".to_string()]);
    // A second sweep finds nothing to do.
    assert!(watchdog.sweep().await.is_empty());
    scheduler.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_spawned_watchdog_recovers_within_one_period() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(NOW));
    let scheduler = build(store, clock);
    scheduler.start_all().await;

    let states = scheduler.coordinator().states().clone();
    states.save("sync", &crashed_state(NOW - 6000)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = Arc::new(Watchdog::new(scheduler.clone(), 5000, 10_000)).spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(5001)).await;
    assert_eq!(states.load("sync").await.unwrap().status, RunStatus::Init);

    cancel.cancel();
    handle.await.unwrap();
    scheduler.shutdown();
}
