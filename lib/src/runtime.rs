//! Host-kernel runtime services.
//!
//! The embedding kernel registers this table once during boot, before
//! any controller is installed. The subsystem needs five things from its
//! host: a monotonic clock, the ability to block and unblock tasks, kernel
//! thread creation for the background loops, and interrupt-flag
//! save/restore for the spinlocks.
//!
//! The table is deliberately small; everything else the subsystem does is
//! its own business.

use core::ffi::c_void;

/// Opaque handle to a schedulable task, owned by the host scheduler.
pub type TaskHandle = *mut c_void;

/// Entry point for a spawned kernel thread. The argument is whatever the
/// spawner passed; the subsystem only ever passes small integers cast
/// through the pointer.
pub type ThreadEntry = fn(*mut c_void);

/// Returned by `thread_spawn` when the host could not create the thread.
pub const INVALID_THREAD_ID: u32 = 0;

crate::define_service! {
    runtime => RuntimeServices {
        /// Monotonic nanoseconds since boot. Never goes backwards.
        clock_monotonic_ns() -> u64;
        /// Handle of the calling task, or null outside task context.
        current_task() -> TaskHandle;
        /// Put the calling task to sleep until `unblock_task`. The host's
        /// pending-wakeup handling must cover the enqueue-then-block window.
        block_current_task();
        /// Wake a task previously blocked. Negative on invalid handle.
        unblock_task(task: TaskHandle) -> i32;
        /// Create a kernel thread running `entry(arg)`.
        thread_spawn(name: &'static str, entry: ThreadEntry, arg: *mut c_void) -> u32;
        /// Yield the calling thread's timeslice.
        thread_yield();
        /// Disable interrupts on this CPU, returning the previous flags.
        irq_save() -> u64;
        /// Restore interrupt flags from `irq_save`.
        irq_restore(flags: u64);
    }
}
