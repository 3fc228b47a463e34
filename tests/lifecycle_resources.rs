//! Task lifecycle and resource accounting.
//!
//! # Coverage
//! - Stale handles after deletion and slot reuse
//! - Task slot exhaustion leaves no partial state
//! - Thunk pool growth, LIFO reuse, and validation
//! - Termination handlers that call back into the scheduler

#[macro_use]
mod common;

use common::*;
use legacy_sched::error::{Error, ErrorKind, ThunkFault};
use legacy_sched::types::{LegacyContext, ModuleRef, QueueId, TaskHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn triple(context: u64, arg: u32) -> u32 {
    u32::try_from(context).unwrap_or(0) + 3 * arg
}

#[test]
fn stale_handle_is_not_found_everywhere() {
    init_test("stale_handle_is_not_found_everywhere");
    let s = test_builder().max_tasks(1).build(legacy_sched::ParkingBridge::new());
    let old = s
        .create_task(ModuleRef(1), 0, LegacyContext::default())
        .unwrap();
    s.kill_task(old).unwrap();
    let fresh = s
        .create_task(ModuleRef(2), 0, LegacyContext::default())
        .unwrap();
    assert_ne!(old, fresh);

    let not_found = |err: Error| err.kind() == ErrorKind::NotFound;
    assert!(not_found(s.start_task(old).unwrap_err()));
    assert!(not_found(s.post_event(old).unwrap_err()));
    assert!(not_found(s.wait_event(old).unwrap_err()));
    assert!(not_found(s.yield_now(old).unwrap_err()));
    assert!(not_found(s.directed_yield(fresh, old).unwrap_err()));
    assert!(not_found(s.set_priority(old, 1).unwrap_err()));
    assert!(not_found(s.get_next(old).unwrap_err()));
    assert!(not_found(s.task_info(old).unwrap_err()));
    assert!(not_found(s.alloc_thunk(old).unwrap_err()));
    assert!(not_found(s.kill_task(old).unwrap_err()));
    assert!(!s.is_task(old));
    assert!(s.is_task(fresh));
    test_complete!("stale_handle_is_not_found_everywhere");
}

#[test]
fn slot_exhaustion_is_out_of_resources() {
    init_test("slot_exhaustion_is_out_of_resources");
    let s = test_builder().max_tasks(2).build(legacy_sched::ParkingBridge::new());
    let a = spawn_started(&s, 0);
    let _b = spawn_started(&s, 0);

    let err = s
        .create_task(ModuleRef(1), 0, LegacyContext::default())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::OutOfResources {
            resource: "task slots",
            limit: 2,
            ..
        }
    ));
    assert!(err.recoverability().should_retry());
    assert_eq!(s.task_count(), 2);
    assert_eq!(s.ready_tasks().len(), 2);

    s.kill_task(a).unwrap();
    assert!(s
        .create_task(ModuleRef(1), 0, LegacyContext::default())
        .is_ok());
    test_complete!("slot_exhaustion_is_out_of_resources");
}

#[test]
fn pending_kill_still_occupies_its_slot() {
    init_test("pending_kill_still_occupies_its_slot");
    let s = test_builder().max_tasks(2).build(legacy_sched::ParkingBridge::new());
    let running = spawn_started(&s, 0);
    let _other = spawn_started(&s, 0);
    s.post_event(running).unwrap();
    s.reschedule();
    s.kill_task(running).unwrap();
    assert_eq!(
        s.create_task(ModuleRef(1), 0, LegacyContext::default())
            .unwrap_err()
            .kind(),
        ErrorKind::OutOfResources
    );
    test_complete!("pending_kill_still_occupies_its_slot");
}

#[test]
fn thunk_pool_grows_and_reuses_lifo() {
    init_test("thunk_pool_grows_and_reuses_lifo");
    let s = test_builder()
        .thunks_per_block(2)
        .max_thunk_blocks(2)
        .build(legacy_sched::ParkingBridge::new());
    let h = spawn_started(&s, 0);

    let thunks: Vec<_> = (0..4).map(|_| s.alloc_thunk(h).unwrap()).collect();
    assert_eq!(s.task_info(h).unwrap().thunks.blocks, 2);
    assert_eq!(
        s.alloc_thunk(h).unwrap_err().kind(),
        ErrorKind::OutOfResources
    );

    s.free_thunk(h, thunks[1]).unwrap();
    s.free_thunk(h, thunks[3]).unwrap();
    assert_eq!(s.alloc_thunk(h).unwrap(), thunks[3]);
    assert_eq!(s.alloc_thunk(h).unwrap(), thunks[1]);
    assert_eq!(s.task_info(h).unwrap().thunks.in_use, 4);
    test_complete!("thunk_pool_grows_and_reuses_lifo");
}

#[test]
fn thunk_misuse_is_reported() {
    init_test("thunk_misuse_is_reported");
    let s = test_scheduler();
    let a = spawn_started(&s, 0);
    let b = spawn_started(&s, 0);
    let thunk = s.alloc_thunk(a).unwrap();

    assert!(matches!(
        s.call_thunk(a, thunk, 1),
        Err(Error::InvalidThunk {
            fault: ThunkFault::Unbound,
            ..
        })
    ));
    s.bind_thunk(a, thunk, triple, 100).unwrap();
    assert_eq!(s.call_thunk(a, thunk, 2).unwrap(), 106);
    assert!(matches!(
        s.call_thunk(b, thunk, 2),
        Err(Error::InvalidThunk {
            fault: ThunkFault::ForeignOwner,
            ..
        })
    ));

    s.free_thunk(a, thunk).unwrap();
    assert!(matches!(
        s.free_thunk(a, thunk),
        Err(Error::InvalidThunk {
            fault: ThunkFault::AlreadyFree,
            ..
        })
    ));
    test_complete!("thunk_misuse_is_reported");
}

#[test]
fn termination_handler_can_release_thunks_of_running_task() {
    init_test("termination_handler_can_release_thunks_of_running_task");
    let s = Arc::new(test_scheduler());
    let running = spawn_started(&s, 0);
    let _other = spawn_started(&s, 0);
    let thunk = s.alloc_thunk(running).unwrap();
    s.post_event(running).unwrap();
    s.reschedule();

    let inner = Arc::clone(&s);
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    s.set_termination_handler(running, move |dying| {
        inner.free_thunk(dying, thunk).unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    s.kill_task(running).unwrap();

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(s.task_info(running).unwrap().thunks.in_use, 0);
    assert!(!s.task_info(running).unwrap().has_termination_handler);
    test_complete!("termination_handler_can_release_thunks_of_running_task");
}

#[test]
fn handler_may_kill_another_task() {
    init_test("handler_may_kill_another_task");
    let s = Arc::new(test_scheduler());
    let first = spawn_started(&s, 0);
    let second = spawn_started(&s, 0);
    let order = Arc::new(Mutex::new(Vec::<TaskHandle>::new()));

    for (h, cascade) in [(first, Some(second)), (second, None)] {
        let inner = Arc::clone(&s);
        let log = Arc::clone(&order);
        s.set_termination_handler(h, move |dying| {
            log.lock().unwrap().push(dying);
            if let Some(next) = cascade {
                inner.kill_task(next).unwrap();
            }
        })
        .unwrap();
    }

    s.kill_task(first).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![first, second]);
    assert_eq!(s.task_count(), 0);
    assert!(!s.is_resident(first));
    assert!(!s.is_resident(second));
    assert!(s.check_invariants().is_ok());
    test_complete!("handler_may_kill_another_task");
}

#[test]
fn queue_affinity_routes_to_live_tasks_only() {
    init_test("queue_affinity_routes_to_live_tasks_only");
    let s = test_scheduler();
    let h = spawn_started(&s, 0);
    s.set_queue_affinity(h, Some(QueueId(0x42))).unwrap();
    assert_eq!(s.find_by_queue(QueueId(0x42)), Some(h));
    assert_eq!(s.task_info(h).unwrap().queue_affinity, Some(QueueId(0x42)));
    s.kill_task(h).unwrap();
    assert_eq!(s.find_by_queue(QueueId(0x42)), None);
    test_complete!("queue_affinity_routes_to_live_tasks_only");
}

#[test]
fn unstarted_tasks_do_not_count() {
    init_test("unstarted_tasks_do_not_count");
    let s = test_scheduler();
    let idle = s
        .create_task(ModuleRef(1), 0, LegacyContext::default())
        .unwrap();
    assert_eq!(s.task_count(), 0);
    s.kill_task(idle).unwrap();
    assert_eq!(s.task_count(), 0);
    assert!(s.check_invariants().is_ok());
    test_complete!("unstarted_tasks_do_not_count");
}
