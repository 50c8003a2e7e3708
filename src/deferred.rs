//! Work deferred until the full data set is loaded.
//!
//! The completion flag and the task queue live in one critical section so a
//! caller can never see the flag set while its task is stranded in the queue.
//! The section is re-entrant: a task may itself call
//! [`LoadGate::run_after_load_over`], in which case it runs inline. The drain
//! itself is not: a nested [`LoadGate::execute_after_load_over_tasks`] from
//! inside a running task returns at once and the outer drain continues.

use std::cell::RefCell;
use std::collections::VecDeque;

use parking_lot::ReentrantMutex;

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct GateState {
    full_load_sent: bool,
    draining: bool,
    queue: VecDeque<Task>,
}

/// Completion flag plus the FIFO of tasks waiting for it.
#[derive(Default)]
pub struct LoadGate {
    state: ReentrantMutex<RefCell<GateState>>,
}

impl LoadGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_full_load_sent(&self) -> bool {
        self.state.lock().borrow().full_load_sent
    }

    /// Set the flag. Returns `true` only for the call that flipped it, so
    /// completion is announced once per generation.
    pub fn mark_sent(&self) -> bool {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.full_load_sent {
            return false;
        }
        state.full_load_sent = true;
        true
    }

    /// Clear the flag at the start of a reload cycle. Queued tasks stay
    /// queued for the next completion.
    pub fn reset(&self) {
        self.state.lock().borrow_mut().full_load_sent = false;
    }

    /// Run `task` now if the data set is ready, otherwise queue it.
    pub fn run_after_load_over<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.state.lock();
        let ready = guard.borrow().full_load_sent;
        if ready {
            task();
        } else {
            guard.borrow_mut().queue.push_back(Box::new(task));
        }
    }

    /// Drain the queue in FIFO order. Calling this before completion is a
    /// usage error and leaves the queue untouched.
    pub fn execute_after_load_over_tasks(&self) {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            if !state.full_load_sent {
                tracing::error!("execute_after_load_over_tasks called before full load");
                return;
            }
            if state.draining {
                tracing::debug!("deferred tasks already draining");
                return;
            }
            state.draining = true;
        }

        let mut ran = 0usize;
        loop {
            let next = guard.borrow_mut().queue.pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        guard.borrow_mut().draining = false;
        if ran > 0 {
            tracing::debug!(tasks = ran, "ran deferred tasks");
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().borrow().queue.len()
    }
}
