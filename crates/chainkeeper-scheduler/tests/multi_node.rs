//! Several simulated nodes sharing one coordination store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chainkeeper_coordination::{CoordinationStore, MemoryStore};
use chainkeeper_scheduler::{
    Clock, HandlerRegistry, JobContext, JobDefinition, JobError, JobHandler, JobRegistry,
    ManualClock, RunCoordinator, RunStatus, ScheduleKind, Scheduler, StartOutcome, TokioClock,
};
use serde_json::Value;

struct Counter {
    runs: AtomicUsize,
    body_ms: u64,
}

#[async_trait]
impl JobHandler for Counter {
    async fn run(&self, _params: &[Value], _ctx: JobContext) -> Result<(), JobError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.body_ms)).await;
        Ok(())
    }
}

fn settle_job() -> JobDefinition {
    JobDefinition::new("settle", "count", ScheduleKind::FixedRate { interval_ms: 1000 })
        .with_timeout_ms(30_000)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_single_winner() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));
    let def = Arc::new(settle_job());

    let attempts: Vec<_> = (0..8)
        .map(|i| {
            let coordinator =
                RunCoordinator::new(store.clone(), clock.clone(), format!("node-{}", i), 600);
            let def = def.clone();
            tokio::spawn(async move { coordinator.try_start(&def).await })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        let outcome = attempt.await.unwrap().unwrap();
        match outcome {
            StartOutcome::Started(_) => winners += 1,
            StartOutcome::AlreadyRunning | StartOutcome::LockBusy => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_nodes_share_ticks_without_duplicates() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(Counter {
        runs: AtomicUsize::new(0),
        body_ms: 100,
    });

    let mut nodes = Vec::new();
    for node in ["node-a", "node-b", "node-c"] {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(1_000_000));
        let mut handlers = HandlerRegistry::new();
        handlers.register("count", counter.clone());
        let coordinator = Arc::new(RunCoordinator::new(store.clone(), clock.clone(), node, 600));
        let scheduler = Scheduler::new(
            JobRegistry::from_definitions(vec![settle_job()]).unwrap(),
            Arc::new(handlers),
            coordinator,
            clock,
        );
        scheduler.start_all().await;
        nodes.push(scheduler);
    }

    // Ticks at 0, 1000, 2000, 3000 and 4000.
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(counter.runs.load(Ordering::SeqCst), 5);

    let state = nodes[0].coordinator().states().load("settle").await.unwrap();
    assert_eq!(state.status, RunStatus::Ended);
    for node in &nodes {
        node.shutdown();
    }
}
