use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use graphwatch::{
    AccessContext, AccessLevels, ActionFinishedWait, ChangeKind, ConditionWait, ElementId, ElementStore, EventSystem,
    EventSystemConfig, InMemoryElementStore, ACTION_FINISHED_KIND,
};

fn single_worker_system(elements: &[ElementId]) -> Arc<EventSystem> {
    let store = Arc::new(InMemoryElementStore::new());
    for &e in elements {
        store.insert(e, AccessLevels::FULL).unwrap();
    }
    let cfg = EventSystemConfig {
        delivery_workers: 1,
        ..EventSystemConfig::default()
    };
    Arc::new(EventSystem::initialize(cfg, store as Arc<dyn ElementStore>).unwrap())
}

#[test]
fn condition_resolves_on_third_delivery_only() {
    let e = ElementId::new(1);
    let system = single_worker_system(&[e]);
    let calls = Arc::new(AtomicUsize::new(0));

    let wait = {
        let calls = Arc::clone(&calls);
        ConditionWait::new(&system, &AccessContext::full(), e, ChangeKind::AddOutputEdge, move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst) + 1 == 3
        })
        .unwrap()
    };

    for i in 0..2u64 {
        system.emit(e, AccessLevels::FULL, ChangeKind::AddOutputEdge, ElementId::new(10 + i), e);
    }
    assert!(!wait.wait_for(Duration::from_millis(100)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    system.emit(e, AccessLevels::FULL, ChangeKind::AddOutputEdge, ElementId::new(12), e);
    assert!(wait.wait_for(Duration::from_secs(2)));
    assert!(wait.is_resolved());

    system.shutdown();
    let stats = system.stats();
    assert_eq!(stats.ignored, 2);
    assert_eq!(stats.delivered, 1);
    wait.destroy().unwrap();
    assert_eq!(system.subscription_count(), 0);
}

#[test]
fn condition_that_never_holds_never_resolves() {
    let e = ElementId::new(1);
    let system = single_worker_system(&[e]);
    let wait = ConditionWait::new(&system, &AccessContext::full(), e, ChangeKind::ContentChanged, |_, _, _| false)
        .unwrap();

    for _ in 0..10 {
        system.emit(e, AccessLevels::FULL, ChangeKind::ContentChanged, e, e);
    }
    assert!(!wait.wait_for(Duration::from_millis(150)));
    system.shutdown();
    assert_eq!(system.stats().ignored, 10);
    assert!(!wait.is_resolved());
}

#[test]
fn predicate_sees_watched_edge_and_other() {
    let e = ElementId::new(1);
    let target = ElementId::new(77);
    let system = single_worker_system(&[e]);
    let wait = ConditionWait::new(
        &system,
        &AccessContext::full(),
        e,
        ChangeKind::AddOutputEdge,
        move |watched, edge, other| watched == ElementId::new(1) && !edge.is_empty() && other == target,
    )
    .unwrap();

    system.emit(e, AccessLevels::FULL, ChangeKind::AddOutputEdge, ElementId::new(5), ElementId::new(6));
    system.emit(e, AccessLevels::FULL, ChangeKind::AddOutputEdge, ElementId::new(5), target);
    assert!(wait.wait_for(Duration::from_secs(2)));
}

#[test]
fn timed_out_wait_keeps_subscription_until_destroyed() {
    let e = ElementId::new(1);
    let system = single_worker_system(&[e]);
    let wait = ConditionWait::new(&system, &AccessContext::full(), e, ChangeKind::RemoveElement, |_, _, _| true)
        .unwrap();

    let started = Instant::now();
    assert!(!wait.wait_for(Duration::from_millis(100)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1));

    assert_eq!(system.subscription_count(), 1);
    wait.destroy().unwrap();
    assert_eq!(system.subscription_count(), 0);
}

#[test]
fn action_finished_wait_resolves_from_start_delegate() {
    let action = ElementId::new(42);
    let system = single_worker_system(&[action]);

    let mut wait = ActionFinishedWait::new(&system, &AccessContext::full(), action).unwrap();
    assert_eq!(wait.action(), action);
    {
        let system = Arc::clone(&system);
        wait.set_on_wait_start(move || {
            system.emit(action, AccessLevels::FULL, ACTION_FINISHED_KIND, ElementId::new(1), ElementId::new(2));
        });
    }

    assert!(wait.wait());
    assert!(wait.is_resolved());
    wait.destroy().unwrap();
}

#[test]
fn action_finished_wait_resolved_from_another_thread() {
    let action = ElementId::new(42);
    let system = single_worker_system(&[action]);
    let wait = ActionFinishedWait::new(&system, &AccessContext::full(), action).unwrap();

    let finisher = {
        let system = Arc::clone(&system);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            // Unrelated change kinds do not finish the action.
            system.emit(action, AccessLevels::FULL, ChangeKind::ContentChanged, action, action);
            system.emit(action, AccessLevels::FULL, ACTION_FINISHED_KIND, ElementId::new(9), ElementId::new(8));
        })
    };

    assert!(wait.wait_for(Duration::from_secs(2)));
    finisher.join().unwrap();
}

#[test]
fn condition_wait_requires_read_access() {
    let e = ElementId::new(1);
    let store = Arc::new(InMemoryElementStore::new());
    store.insert(e, AccessLevels::new(8, 8)).unwrap();
    let system = EventSystem::initialize(EventSystemConfig::default(), store as Arc<dyn ElementStore>).unwrap();

    let err = ConditionWait::new(
        &system,
        &AccessContext::new(AccessLevels::new(2, 2)),
        e,
        ChangeKind::AddInputEdge,
        |_, _, _| true,
    )
    .unwrap_err();
    assert!(err.is_access_denied());
}
