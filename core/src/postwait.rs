//! Post-wait: a synchronous call layered over the asynchronous transport.
//!
//! A caller builds a message, and `post_and_wait` stamps it with a waiter
//! token, posts it, and blocks until the reply dispatch path completes the
//! matching record or the timeout fires. Tokens are 15-bit, assigned from a
//! wrapping counter, and unique among *currently outstanding* waiters only.
//!
//! A reply that arrives after its waiter timed out finds no record; that is
//! an expected race in an asynchronous system and is logged at debug level,
//! never escalated.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use i2o_abi::{I2oError, TransactionContext};
use i2o_lib::{IrqMutex, WaitQueue, klog_debug};

use crate::controller::Controller;
use crate::exec;
use crate::transport;

/// Tokens wrap within 15 bits; bit 15 of the context's token field stays
/// clear so the full word keeps its post-wait marker shape.
const TOKEN_MASK: u16 = 0x7FFF;

/// Outcome stored by the completion path.
type WaitStatus = Result<(), I2oError>;

struct Waiter {
    token: u16,
    /// Written exactly once, by the first completion to find this record.
    status: Option<WaitStatus>,
}

struct WaitList {
    next_token: u16,
    waiters: Vec<Waiter>,
}

impl WaitList {
    const fn new() -> Self {
        Self {
            next_token: 1,
            waiters: Vec::new(),
        }
    }

    /// Next token not currently in use. The outstanding set is tiny
    /// compared to the 32k token space, so the skip loop is short.
    fn allocate_token(&mut self) -> u16 {
        loop {
            let token = self.next_token;
            self.next_token = (self.next_token.wrapping_add(1)) & TOKEN_MASK;
            if self.next_token == 0 {
                self.next_token = 1;
            }
            if token != 0 && !self.waiters.iter().any(|w| w.token == token) {
                return token;
            }
        }
    }
}

static WAIT_LIST: IrqMutex<WaitList> = IrqMutex::new(WaitList::new());
/// One queue shared by all waiters; each sleeper re-checks its own record.
static WAIT_WQ: WaitQueue = WaitQueue::new();

/// Post `msg` and block until the IOP answers or `timeout_ms` passes.
///
/// Word 2 of the message is overwritten with the post-wait context. The
/// result distinguishes three cases the way callers need: `Ok` for a clean
/// reply, `Reply { .. }` when the IOP answered with an error, and `Timeout`
/// when it did not answer at all.
pub fn post_and_wait(ctrl: &Controller, msg: &mut [u32], timeout_ms: u64) -> Result<(), I2oError> {
    let exec_ctx = exec::exec_context()?;

    let token = {
        let mut list = WAIT_LIST.lock();
        let token = list.allocate_token();
        list.waiters.push(Waiter {
            token,
            status: None,
        });
        token
    };

    msg[2] = TransactionContext::PostWait {
        handler: exec_ctx,
        token,
    }
    .encode();

    if let Err(e) = transport::post_message(ctrl, msg) {
        // Never posted; nobody can complete us. Unlink and bail.
        remove_waiter(token);
        return Err(e);
    }

    let _ = WAIT_WQ.wait_event_timeout(|| waiter_done(token), timeout_ms);

    // Remove by scan: interleaved calls mean the record can sit anywhere.
    let status = remove_waiter(token);

    match status {
        Some(result) => result,
        None => {
            ctrl.stats.post_wait_timeouts.fetch_add(1, Ordering::Relaxed);
            klog_debug!(
                "{}: post-wait token {:#06x} timed out after {} ms",
                ctrl.name(),
                token,
                timeout_ms
            );
            Err(I2oError::Timeout)
        }
    }
}

fn waiter_done(token: u16) -> bool {
    WAIT_LIST
        .lock()
        .waiters
        .iter()
        .any(|w| w.token == token && w.status.is_some())
}

/// Unlink the record, returning its status (if any was stored).
fn remove_waiter(token: u16) -> Option<WaitStatus> {
    let mut list = WAIT_LIST.lock();
    let idx = list.waiters.iter().position(|w| w.token == token)?;
    list.waiters.swap_remove(idx).status
}

/// Complete the waiter carrying `token`. Reply dispatch path; non-blocking.
///
/// A missing record means the waiter already timed out and freed itself;
/// the late reply is discarded by construction. A record that already has a
/// status keeps it: completion is at-most-once.
pub(crate) fn complete(ctrl: &Controller, token: u16, result: WaitStatus) {
    let found = {
        let mut list = WAIT_LIST.lock();
        match list.waiters.iter_mut().find(|w| w.token == token) {
            Some(w) => {
                if w.status.is_none() {
                    w.status = Some(result);
                }
                true
            }
            None => false,
        }
    };

    if found {
        WAIT_WQ.wake_all();
    } else {
        klog_debug!(
            "{}: late reply for post-wait token {:#06x}, discarded",
            ctrl.name(),
            token
        );
    }
}

/// Number of outstanding waiters (suite support).
pub fn outstanding_waiters() -> usize {
    WAIT_LIST.lock().waiters.len()
}

/// Allocate `n` live waiter records and return their tokens, without
/// posting anything (suite support: token uniqueness and completion
/// semantics are properties of the list, not the wire).
#[cfg(feature = "itests")]
pub fn grab_tokens(n: usize) -> Vec<u16> {
    let mut list = WAIT_LIST.lock();
    (0..n)
        .map(|_| {
            let token = list.allocate_token();
            list.waiters.push(Waiter {
                token,
                status: None,
            });
            token
        })
        .collect()
}

/// Unlink suite-grabbed waiters, returning each one's stored status.
#[cfg(feature = "itests")]
pub fn drop_tokens(tokens: &[u16]) -> Vec<Option<Result<(), I2oError>>> {
    tokens.iter().map(|t| remove_waiter(*t)).collect()
}

/// Drop every outstanding waiter (suite support).
#[cfg(feature = "itests")]
pub fn clear_waiters() {
    WAIT_LIST.lock().waiters.clear();
}
