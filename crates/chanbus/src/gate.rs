//! # Delivery Gate
//!
//! Every subscription delivers through a gate. Closing the gate waits until no
//! delivery is in flight and turns away any that start afterwards, so once
//! `close` returns, no handler of that group is running or will run.
//!
//! A handler that tears down its own group (closes the gate it is running
//! under) does not wait for itself; the deliveries it is nested in are
//! discounted.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

thread_local! {
    /// Gates the current thread is delivering through, innermost last.
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
struct State {
    closed: bool,
    in_flight: usize,
}

#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<State>,
    drained: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Handler panics are caught outside the lock, poisoning is not expected.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Admits one delivery, or `None` once the gate is closed.
    pub(crate) fn enter(&self) -> Option<GateGuard<'_>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.in_flight += 1;
        drop(state);
        ENTERED.with(|e| e.borrow_mut().push(self.addr()));
        Some(GateGuard { gate: self })
    }

    /// Closes the gate and blocks until in-flight deliveries finish.
    pub fn close(&self) {
        let own = ENTERED.with(|e| e.borrow().iter().filter(|&&a| a == self.addr()).count());
        let mut state = self.lock();
        state.closed = true;
        while state.in_flight > own {
            state = self.drained.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }
}

pub(crate) struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let addr = self.gate.addr();
        ENTERED.with(|e| {
            let mut entered = e.borrow_mut();
            if let Some(pos) = entered.iter().rposition(|&a| a == addr) {
                entered.remove(pos);
            }
        });
        let mut state = self.gate.lock();
        state.in_flight -= 1;
        // A closer inside its own delivery waits for a nonzero count.
        if state.closed {
            self.gate.drained.notify_all();
        }
    }
}
