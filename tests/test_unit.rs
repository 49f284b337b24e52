//! Lifecycle tests for supervised units
//!
//! Covers the accomplish signal, exactly-once finalization, scope
//! propagation of cancellation and crashes, and execute/spawn misuse.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mas_dispatch::{CrashPolicy, DispatchError, Exit, Unit, UnitContext, UnitHandle, UnitState};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

enum Behavior {
    Complete,
    Sleep(Duration),
    Fail,
    Panic,
    Spawn(Vec<Probe>),
}

#[derive(Clone, Default)]
struct Counters {
    finals: Arc<AtomicUsize>,
    crashes: Arc<AtomicUsize>,
    exits: Arc<Mutex<Vec<(String, Exit)>>>,
}

impl Counters {
    fn finals(&self) -> usize {
        self.finals.load(Ordering::SeqCst)
    }

    fn crashes(&self) -> usize {
        self.crashes.load(Ordering::SeqCst)
    }

    fn exit_of(&self, name: &str) -> Option<Exit> {
        self.exits
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, exit)| *exit)
    }
}

struct Probe {
    name: String,
    behavior: Option<Behavior>,
    failing_finisher: bool,
    counters: Counters,
}

impl Probe {
    fn new(name: &str, behavior: Behavior, counters: &Counters) -> Self {
        Self {
            name: name.to_string(),
            behavior: Some(behavior),
            failing_finisher: false,
            counters: counters.clone(),
        }
    }
}

#[async_trait]
impl Unit for Probe {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn main_task(&mut self, ctx: &UnitContext) -> anyhow::Result<()> {
        match self.behavior.take() {
            Some(Behavior::Complete) | None => Ok(()),
            Some(Behavior::Sleep(d)) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Some(Behavior::Fail) => anyhow::bail!("{} failed", self.name),
            Some(Behavior::Panic) => panic!("{} panicked", self.name),
            Some(Behavior::Spawn(children)) => {
                for child in children {
                    ctx.spawn(child)?;
                }
                Ok(())
            }
        }
    }

    async fn final_task(&mut self, exit: Exit) -> anyhow::Result<()> {
        self.counters.finals.fetch_add(1, Ordering::SeqCst);
        self.counters.exits.lock().push((self.name.clone(), exit));
        if self.failing_finisher {
            anyhow::bail!("finisher of {} failed", self.name);
        }
        Ok(())
    }

    async fn on_crash(&mut self, _error: &anyhow::Error) {
        self.counters.crashes.fetch_add(1, Ordering::SeqCst);
    }
}

async fn run_to_end(handle: &UnitHandle) {
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("unit did not finish in time");
}

#[tokio::test]
async fn test_accomplish_is_idempotent() {
    let counters = Counters::default();
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Sleep(Duration::from_millis(20)), &counters),
        CrashPolicy::CancelScope,
    );

    let mut waiters = Vec::new();
    for _ in 0..5 {
        let handle = handle.clone();
        let counters = counters.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait().await;
            counters.finals()
        }));
    }
    handle.execute().unwrap();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), 1);
    }
    // Late observers return immediately
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_millis(50), handle.wait())
            .await
            .unwrap();
    }
    assert!(handle.accomplish().is_set());
    assert_eq!(handle.state(), UnitState::Done);
    assert_eq!(counters.finals(), 1);
}

#[tokio::test]
async fn test_finalizes_once_on_completion() {
    let counters = Counters::default();
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Complete, &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    run_to_end(&handle).await;
    assert_eq!(counters.finals(), 1);
    assert_eq!(counters.exit_of("root"), Some(Exit::Completed));
    assert!(!handle.cancel());
}

#[tokio::test]
async fn test_finalizes_once_on_cancellation() {
    let counters = Counters::default();
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Sleep(Duration::from_secs(60)), &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(handle.cancel());
    assert!(!handle.cancel());
    run_to_end(&handle).await;

    assert_eq!(counters.finals(), 1);
    assert_eq!(counters.exit_of("root"), Some(Exit::Cancelled));
}

#[tokio::test]
async fn test_finalizes_once_on_crash() {
    for behavior in [Behavior::Fail, Behavior::Panic] {
        let counters = Counters::default();
        let handle = UnitHandle::new(
            Probe::new("root", behavior, &counters),
            CrashPolicy::CancelScope,
        );
        handle.execute().unwrap();
        run_to_end(&handle).await;

        assert_eq!(counters.finals(), 1);
        assert_eq!(counters.crashes(), 1);
        assert_eq!(counters.exit_of("root"), Some(Exit::Crashed));
        assert_eq!(handle.crash_reports().len(), 1);
    }
}

#[tokio::test]
async fn test_finisher_failure_is_reported_not_raised() {
    let counters = Counters::default();
    let mut probe = Probe::new("root", Behavior::Complete, &counters);
    probe.failing_finisher = true;
    let handle = UnitHandle::new(probe, CrashPolicy::CancelScope);
    handle.execute().unwrap();
    run_to_end(&handle).await;

    assert_eq!(counters.finals(), 1);
    assert_eq!(counters.crashes(), 1);
    assert!(handle.crash_reports().is_empty());
    assert_eq!(handle.state(), UnitState::Done);
}

#[tokio::test]
async fn test_execute_twice_fails() {
    let counters = Counters::default();
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Complete, &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    assert!(matches!(
        handle.execute(),
        Err(DispatchError::AlreadyStarted { .. })
    ));
    run_to_end(&handle).await;
    assert_eq!(counters.finals(), 1);
}

struct SpawnAndKeep {
    child: Option<Probe>,
    spawned: Arc<Mutex<Option<UnitHandle>>>,
}

#[async_trait]
impl Unit for SpawnAndKeep {
    fn name(&self) -> String {
        "keeper".to_string()
    }

    async fn main_task(&mut self, ctx: &UnitContext) -> anyhow::Result<()> {
        if let Some(child) = self.child.take() {
            *self.spawned.lock() = Some(ctx.spawn(child)?);
        }
        Ok(())
    }

    async fn final_task(&mut self, _exit: Exit) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_crash(&mut self, _error: &anyhow::Error) {}
}

#[tokio::test]
async fn test_spawned_child_is_not_a_root() {
    let counters = Counters::default();
    let spawned = Arc::new(Mutex::new(None));
    let handle = UnitHandle::new(
        SpawnAndKeep {
            child: Some(Probe::new("child", Behavior::Complete, &counters)),
            spawned: spawned.clone(),
        },
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    run_to_end(&handle).await;

    let child = spawned.lock().clone().expect("child handle");
    assert!(!child.is_root());
    assert!(matches!(child.execute(), Err(DispatchError::NotRoot { .. })));
    assert!(child.accomplish().is_set());
}

#[tokio::test]
async fn test_root_finalizes_after_children() {
    let counters = Counters::default();
    let children = vec![
        Probe::new("slow", Behavior::Sleep(Duration::from_millis(40)), &counters),
        Probe::new("fast", Behavior::Complete, &counters),
    ];
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Spawn(children), &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    run_to_end(&handle).await;

    let order: Vec<String> = counters.exits.lock().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(order, vec!["fast", "slow", "root"]);
    assert_eq!(handle.scope().active_units(), 0);
}

#[tokio::test]
async fn test_cancel_propagates_to_children() {
    let counters = Counters::default();
    let children = vec![
        Probe::new("a", Behavior::Sleep(Duration::from_secs(60)), &counters),
        Probe::new("b", Behavior::Sleep(Duration::from_secs(60)), &counters),
    ];
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Spawn(children), &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handle.cancel());
    run_to_end(&handle).await;

    assert_eq!(counters.finals(), 3);
    assert_eq!(counters.exit_of("a"), Some(Exit::Cancelled));
    assert_eq!(counters.exit_of("b"), Some(Exit::Cancelled));
    assert_eq!(counters.exit_of("root"), Some(Exit::Cancelled));
}

#[tokio::test]
async fn test_child_crash_cancels_scope() {
    let counters = Counters::default();
    let children = vec![
        Probe::new("bad", Behavior::Fail, &counters),
        Probe::new("sibling", Behavior::Sleep(Duration::from_secs(60)), &counters),
    ];
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Spawn(children), &counters),
        CrashPolicy::CancelScope,
    );
    handle.execute().unwrap();
    run_to_end(&handle).await;

    assert_eq!(counters.exit_of("bad"), Some(Exit::Crashed));
    assert_eq!(counters.exit_of("sibling"), Some(Exit::Cancelled));
    assert_eq!(counters.exit_of("root"), Some(Exit::Cancelled));
    let reports = handle.crash_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].unit, "bad");
}

#[tokio::test]
async fn test_isolated_crash_spares_siblings() {
    let counters = Counters::default();
    let children = vec![
        Probe::new("bad", Behavior::Fail, &counters),
        Probe::new("sibling", Behavior::Sleep(Duration::from_millis(30)), &counters),
    ];
    let handle = UnitHandle::new(
        Probe::new("root", Behavior::Spawn(children), &counters),
        CrashPolicy::Isolate,
    );
    handle.execute().unwrap();
    run_to_end(&handle).await;

    assert_eq!(counters.exit_of("bad"), Some(Exit::Crashed));
    assert_eq!(counters.exit_of("sibling"), Some(Exit::Completed));
    assert_eq!(counters.exit_of("root"), Some(Exit::Completed));
    assert_eq!(counters.finals(), 3);
}
