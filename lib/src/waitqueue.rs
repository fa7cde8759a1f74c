//! Wait queue primitive for blocking and waking tasks.
//!
//! Provides a fixed-capacity queue of blocked tasks that can be woken
//! individually (`wake_one`) or all at once (`wake_all`). Integrates with
//! the host scheduler through the registered runtime services; the
//! subsystem has no scheduler of its own.
//!
//! # Design
//!
//! - Fixed-capacity array of opaque task handles
//! - Protected by `IrqMutex` for interrupt-safe access
//! - Sleeping goes through `block_current_task()` / `unblock_task()`;
//!   the host's pending-wakeup handling closes the enqueue-to-block window
//! - Timed waits compute a deadline from the monotonic clock and re-check
//!   it on every wakeup, so a host whose `block_current_task` returns
//!   spuriously (or a suite fake that returns immediately) still converges
//!
//! # Usage
//!
//! ```rust,ignore
//! static WQ: WaitQueue = WaitQueue::new();
//!
//! // Waiting side:
//! WQ.wait_event(|| has_work());
//!
//! // Waking side:
//! WQ.wake_one();
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crate::clock;
use crate::runtime::{self, TaskHandle};
use crate::spinlock::IrqMutex;

/// Maximum number of tasks that can wait on a single `WaitQueue`.
const WAITQUEUE_CAPACITY: usize = 32;

const NULL_HANDLE: TaskHandle = core::ptr::null_mut();

struct WaitQueueInner {
    /// Waiting task handles. Null entries are empty slots.
    waiters: [TaskHandle; WAITQUEUE_CAPACITY],
    count: usize,
}

impl WaitQueueInner {
    const fn new() -> Self {
        Self {
            waiters: [NULL_HANDLE; WAITQUEUE_CAPACITY],
            count: 0,
        }
    }

    /// Add `task` to the queue. A task already queued stays queued exactly
    /// once. Returns `false` only when the queue is full.
    fn enqueue(&mut self, task: TaskHandle) -> bool {
        if task.is_null() {
            return false;
        }
        let mut free: Option<usize> = None;
        for (i, slot) in self.waiters.iter().enumerate() {
            if *slot == task {
                return true;
            }
            if slot.is_null() && free.is_none() {
                free = Some(i);
            }
        }
        match free {
            Some(i) => {
                self.waiters[i] = task;
                self.count += 1;
                true
            }
            None => false,
        }
    }

    fn dequeue_one(&mut self) -> Option<TaskHandle> {
        for slot in self.waiters.iter_mut() {
            if !slot.is_null() {
                let task = *slot;
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return Some(task);
            }
        }
        None
    }

    fn remove_task(&mut self, task: TaskHandle) -> bool {
        for slot in self.waiters.iter_mut() {
            if *slot == task {
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return true;
            }
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// SAFETY: `TaskHandle` is an opaque pointer managed by the host scheduler.
// Access is synchronized through the `IrqMutex`.
unsafe impl Send for WaitQueueInner {}

/// A wait queue for blocking and waking tasks.
///
/// Tasks call [`wait_event`](Self::wait_event) to sleep until a condition
/// holds; producers call [`wake_one`](Self::wake_one) or
/// [`wake_all`](Self::wake_all) when the condition changes.
pub struct WaitQueue {
    inner: IrqMutex<WaitQueueInner>,
    /// Monotonic counter incremented on each wake, for debugging.
    generation: AtomicU32,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(WaitQueueInner::new()),
            generation: AtomicU32::new(0),
        }
    }

    /// Block the current task until `condition()` returns `true`.
    ///
    /// Returns `false` if the wait could not be set up (runtime not
    /// registered, no task context, or queue full); the condition may or
    /// may not hold in that case.
    pub fn wait_event<F: Fn() -> bool>(&self, condition: F) -> bool {
        loop {
            if condition() {
                return true;
            }

            if !runtime::is_runtime_initialized() {
                return false;
            }

            let task = runtime::current_task();
            if task.is_null() {
                return false;
            }

            {
                let mut inner = self.inner.lock();
                // Re-check under the lock to close the race window.
                if condition() {
                    return true;
                }
                if !inner.enqueue(task) {
                    return false;
                }
            }
            // Lock dropped; a wake between here and the block is covered by
            // the host's pending-wakeup flag.

            runtime::block_current_task();
        }
    }

    /// Block the current task until `condition()` returns `true` or
    /// `timeout_ms` milliseconds pass on the monotonic clock.
    ///
    /// Returns `true` if the condition was met, `false` on timeout or
    /// setup failure. On every exit path the caller's queue slot is clear.
    pub fn wait_event_timeout<F: Fn() -> bool>(&self, condition: F, timeout_ms: u64) -> bool {
        if condition() {
            return true;
        }

        if !runtime::is_runtime_initialized() {
            return false;
        }

        let deadline = clock::deadline_ms(timeout_ms);

        loop {
            if condition() {
                self.forget_current();
                return true;
            }

            let task = runtime::current_task();
            if task.is_null() {
                return false;
            }

            if clock::expired(deadline) {
                let mut inner = self.inner.lock();
                inner.remove_task(task);
                return false;
            }

            {
                let mut inner = self.inner.lock();
                if condition() {
                    inner.remove_task(task);
                    return true;
                }
                if !inner.enqueue(task) {
                    return false;
                }
            }

            runtime::block_current_task();
        }
    }

    /// Drop the calling task's queue slot if it still holds one.
    fn forget_current(&self) {
        let task = runtime::current_task();
        if !task.is_null() {
            self.inner.lock().remove_task(task);
        }
    }

    /// Wake one waiting task. `true` if a task was woken.
    pub fn wake_one(&self) -> bool {
        let task = {
            let mut inner = self.inner.lock();
            inner.dequeue_one()
        };

        if let Some(task) = task {
            self.generation.fetch_add(1, Ordering::Relaxed);
            let _ = runtime::unblock_task(task);
            true
        } else {
            false
        }
    }

    /// Wake all waiting tasks, returning how many.
    pub fn wake_all(&self) -> usize {
        // Collect under the lock, unblock outside it: the scheduler does
        // real work in unblock_task and must not run under our spinlock.
        let mut tasks = [NULL_HANDLE; WAITQUEUE_CAPACITY];
        let mut count = 0;
        {
            let mut inner = self.inner.lock();
            while let Some(task) = inner.dequeue_one() {
                tasks[count] = task;
                count += 1;
            }
        }

        if count > 0 {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }

        for task in &tasks[..count] {
            let _ = runtime::unblock_task(*task);
        }
        count
    }

    pub fn has_waiters(&self) -> bool {
        !self.inner.lock().is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().count
    }

    /// Wake generation counter (debugging / suites).
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
