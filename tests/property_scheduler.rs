//! Property-based tests for the scheduler.
//!
//! # Ready list
//! - Enumeration is non-increasing in priority
//! - Equal priorities keep link order
//!
//! # Random operation sequences
//! - Structural invariants hold after every operation
//! - A pinned scheduler only ever dispatches the pinned task
//! - `task_count` matches a simple model
//! - Event counters never underflow

#[macro_use]
mod common;

use common::*;
use legacy_sched::error::ErrorKind;
use legacy_sched::runtime::{Dispatch, ParkingBridge, Scheduler};
use legacy_sched::types::{LegacyContext, ModuleRef, TaskHandle, PRIORITY_MAX, PRIORITY_MIN};
use legacy_sched::Thunk;
use proptest::prelude::*;
use std::collections::HashMap;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_priority() -> impl Strategy<Value = i32> {
    i32::from(PRIORITY_MIN) - 4..=i32::from(PRIORITY_MAX) + 4
}

#[derive(Debug, Clone)]
enum Op {
    Create(i32),
    Start(usize),
    Kill(usize),
    Post(usize),
    Wait(usize),
    Yield(usize),
    DirectedYield(usize, usize),
    SetPriority(usize, i32),
    Reschedule,
    Pin(bool),
    AllocThunk(usize),
    FreeThunk(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_priority().prop_map(Op::Create),
        3 => any::<usize>().prop_map(Op::Start),
        1 => any::<usize>().prop_map(Op::Kill),
        4 => any::<usize>().prop_map(Op::Post),
        2 => any::<usize>().prop_map(Op::Wait),
        2 => any::<usize>().prop_map(Op::Yield),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::DirectedYield(a, b)),
        1 => (any::<usize>(), -8i32..=8).prop_map(|(a, d)| Op::SetPriority(a, d)),
        4 => Just(Op::Reschedule),
        1 => any::<bool>().prop_map(Op::Pin),
        1 => any::<usize>().prop_map(Op::AllocThunk),
        1 => any::<usize>().prop_map(Op::FreeThunk),
    ]
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    s: Scheduler<ParkingBridge>,
    handles: Vec<TaskHandle>,
    thunks: HashMap<TaskHandle, Vec<Thunk>>,
    started: usize,
}

impl Harness {
    fn new() -> Self {
        Self {
            s: test_builder()
                .max_tasks(12)
                .thunks_per_block(2)
                .max_thunk_blocks(2)
                .build(ParkingBridge::new()),
            handles: Vec::new(),
            thunks: HashMap::new(),
            started: 0,
        }
    }

    fn pick(&self, i: usize) -> Option<TaskHandle> {
        if self.handles.is_empty() {
            None
        } else {
            Some(self.handles[i % self.handles.len()])
        }
    }

    /// Runs `f` with a software event queued so dispatch never blocks.
    fn nonblocking<R>(&self, f: impl FnOnce(&Scheduler<ParkingBridge>) -> R) -> R {
        self.s.bridge().queue_software_event();
        let out = f(&self.s);
        self.s.bridge().take_software_event();
        out
    }

    fn apply(&mut self, op: &Op) -> Result<(), TestCaseError> {
        let acceptable = |kind: ErrorKind| {
            matches!(
                kind,
                ErrorKind::NotFound | ErrorKind::OutOfResources | ErrorKind::InvalidThunk
            )
        };
        match *op {
            Op::Create(priority) => {
                match self
                    .s
                    .create_task(ModuleRef(1), priority, LegacyContext::default())
                {
                    Ok(h) => self.handles.push(h),
                    Err(e) => prop_assert_eq!(e.kind(), ErrorKind::OutOfResources),
                }
            }
            Op::Start(i) => {
                if let Some(h) = self.pick(i) {
                    let fresh = self.s.task_info(h).is_ok_and(|info| info.alive && !info.started);
                    if let Err(e) = self.s.start_task(h) {
                        prop_assert!(acceptable(e.kind()));
                    } else if fresh {
                        self.started += 1;
                    }
                }
            }
            Op::Kill(i) => {
                if let Some(h) = self.pick(i) {
                    let counted = self.s.task_info(h).is_ok_and(|info| info.alive && info.started);
                    if let Err(e) = self.s.kill_task(h) {
                        prop_assert!(acceptable(e.kind()));
                    } else if counted {
                        self.started -= 1;
                    }
                    if !self.s.is_resident(h) {
                        self.thunks.remove(&h);
                    }
                }
            }
            Op::Post(i) => {
                if let Some(h) = self.pick(i) {
                    let before = self.s.task_info(h).map(|info| info.pending_events);
                    match self.s.post_event(h) {
                        Ok(()) => {
                            let after = self.s.task_info(h).unwrap().pending_events;
                            prop_assert_eq!(after, before.unwrap() + 1);
                        }
                        Err(e) => prop_assert_eq!(e.kind(), ErrorKind::NotFound),
                    }
                }
            }
            Op::Wait(i) => {
                if let Some(h) = self.pick(i) {
                    if let Err(e) = self.nonblocking(|s| s.wait_event(h)) {
                        prop_assert_eq!(e.kind(), ErrorKind::NotFound);
                    }
                }
            }
            Op::Yield(i) => {
                if let Some(h) = self.pick(i) {
                    let before = self.s.task_info(h).map(|info| info.pending_events);
                    match self.nonblocking(|s| s.yield_now(h)) {
                        Ok(()) => {
                            if let Ok(info) = self.s.task_info(h) {
                                prop_assert_eq!(info.pending_events, before.unwrap());
                            }
                        }
                        Err(e) => prop_assert_eq!(e.kind(), ErrorKind::NotFound),
                    }
                }
            }
            Op::DirectedYield(a, b) => {
                if let (Some(h), Some(target)) = (self.pick(a), self.pick(b)) {
                    if let Err(e) = self.nonblocking(|s| s.directed_yield(h, target)) {
                        prop_assert_eq!(e.kind(), ErrorKind::NotFound);
                    }
                }
            }
            Op::SetPriority(i, delta) => {
                if let Some(h) = self.pick(i) {
                    match self.s.set_priority(h, delta) {
                        Ok(p) => prop_assert!((PRIORITY_MIN..=PRIORITY_MAX).contains(&p)),
                        Err(e) => prop_assert_eq!(e.kind(), ErrorKind::NotFound),
                    }
                }
            }
            Op::Reschedule => {
                let pin = self.s.locked_task();
                let outcome = self.nonblocking(Scheduler::reschedule);
                if let (Some(pin), Some(ran)) = (pin, outcome.task()) {
                    prop_assert_eq!(pin, ran, "dispatched past the pin");
                }
                if outcome == Dispatch::Drained {
                    prop_assert_eq!(self.started, 0);
                    prop_assert_eq!(self.s.current(), None);
                }
            }
            Op::Pin(lock) => {
                self.s.lock_current(lock);
            }
            Op::AllocThunk(i) => {
                if let Some(h) = self.pick(i) {
                    match self.s.alloc_thunk(h) {
                        Ok(t) => self.thunks.entry(h).or_default().push(t),
                        Err(e) => prop_assert!(acceptable(e.kind())),
                    }
                }
            }
            Op::FreeThunk(i) => {
                if let Some(h) = self.pick(i) {
                    if !self.s.is_resident(h) {
                        self.thunks.remove(&h);
                    } else if let Some(t) = self.thunks.get_mut(&h).and_then(Vec::pop) {
                        self.s.free_thunk(h, t).unwrap();
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Ready enumeration is sorted by priority, stable within a band.
    #[test]
    fn ready_list_is_priority_sorted(priorities in prop::collection::vec(arb_priority(), 1..24)) {
        init_test_logging();
        let s = test_scheduler();
        let handles: Vec<_> = priorities.iter().map(|&p| spawn_started(&s, p)).collect();
        let order = s.ready_tasks();
        prop_assert_eq!(order.len(), handles.len());

        let position = |h: TaskHandle| handles.iter().position(|&x| x == h).unwrap();
        for pair in order.windows(2) {
            let a = s.task_info(pair[0]).unwrap();
            let b = s.task_info(pair[1]).unwrap();
            prop_assert!(a.priority >= b.priority);
            if a.priority == b.priority {
                prop_assert!(position(pair[0]) < position(pair[1]));
            }
        }
    }

    /// Structural invariants survive arbitrary operation sequences.
    #[test]
    fn invariants_hold_for_random_sequences(ops in prop::collection::vec(arb_op(), 1..80)) {
        init_test_logging();
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op)?;
            if let Err(violation) = harness.s.check_invariants() {
                return Err(TestCaseError::fail(format!("after {op:?}: {violation}")));
            }
            prop_assert_eq!(harness.s.task_count(), harness.started);
        }
    }
}
