//! Message queue transport: moving frame addresses through the two FIFOs.
//!
//! The inbound FIFO hands out free request frames and accepts filled ones;
//! the outbound FIFO hands out ready replies and accepts consumed ones.
//! Both are single registers behind [`BusOps`](crate::controller::BusOps);
//! everything here is a thin protocol layer over those four accessors.
//!
//! `run_queue` is the reply dispatch path. It runs in interrupt context and
//! must not block: it decodes each reply's transaction context and either
//! completes a post-wait record or hands the frame to the addressed handler,
//! then returns the frame to the IOP's free pool.

use core::sync::atomic::Ordering;

use i2o_abi::{EMPTY_QUEUE, I2oError, MSG_FRAME_WORDS, TransactionContext};
use i2o_lib::{clock, klog_debug, klog_warn};

use crate::controller::Controller;
use crate::exec;
use crate::handlers;
use crate::postwait;

/// Bound on waiting for a free inbound frame. The IOP recycles request
/// frames in microseconds; a pool dry for this long is wedged.
pub(crate) const INBOUND_SLOT_TIMEOUT_MS: u64 = 30;

/// Poll the inbound FIFO for a free request frame until `timeout_ms` passes.
///
/// The FIFO read is destructive: a returned address is ours. A sentinel
/// read means "no free frame", not an error; callers see `Timeout` only
/// after the full bound.
pub fn acquire_inbound_slot(ctrl: &Controller, timeout_ms: u64) -> Result<u32, I2oError> {
    let deadline = clock::deadline_ms(timeout_ms);
    loop {
        let frame = ctrl.bus.read_inbound();
        if frame != EMPTY_QUEUE {
            return Ok(frame);
        }
        if clock::expired(deadline) {
            klog_warn!("{}: no inbound frame within {} ms", ctrl.name(), timeout_ms);
            return Err(I2oError::Timeout);
        }
        core::hint::spin_loop();
    }
}

/// Pop one ready reply frame, or `None` if the outbound queue is empty.
///
/// The first empty read is re-tried once: the outbound FIFO latch can
/// report empty one read too early (hardware erratum), so one spurious
/// empty is not authoritative.
pub fn poll_outbound(ctrl: &Controller) -> Option<u32> {
    let frame = ctrl.bus.read_outbound();
    if frame != EMPTY_QUEUE {
        return Some(frame);
    }
    let frame = ctrl.bus.read_outbound();
    if frame != EMPTY_QUEUE { Some(frame) } else { None }
}

/// Return a consumed reply frame to the IOP's outbound free pool.
#[inline]
pub fn release_outbound_slot(ctrl: &Controller, frame: u32) {
    ctrl.bus.write_outbound(frame);
}

/// Post a fully built message: acquire a frame, copy the words in, fire.
///
/// The IOP owns the frame once posted; there is no completion signal here.
/// Callers wanting the reply go through
/// [`post_and_wait`](crate::postwait::post_and_wait) instead.
pub fn post_message(ctrl: &Controller, msg: &[u32]) -> Result<(), I2oError> {
    if msg.len() > ctrl.inbound_frame_words() {
        klog_warn!(
            "{}: message of {} words exceeds {}-word frames",
            ctrl.name(),
            msg.len(),
            ctrl.inbound_frame_words()
        );
        return Err(I2oError::NoSpace);
    }
    let frame = acquire_inbound_slot(ctrl, INBOUND_SLOT_TIMEOUT_MS)?;
    ctrl.bus.write_frame(frame, msg);
    ctrl.bus.write_inbound(frame);
    ctrl.stats.posts.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Drain every currently ready reply and dispatch each one.
///
/// Invoked from the bus layer's interrupt handler or poll loop. Replies are
/// dispatched in FIFO order within this controller. Non-blocking.
pub fn run_queue(ctrl: &Controller) {
    let mut msg = [0u32; MSG_FRAME_WORDS];
    while let Some(frame) = poll_outbound(ctrl) {
        ctrl.bus.read_frame(frame, &mut msg);
        ctrl.stats.replies.fetch_add(1, Ordering::Relaxed);
        dispatch_reply(ctrl, &msg);
        release_outbound_slot(ctrl, frame);
    }
}

/// Route one reply by its transaction context.
fn dispatch_reply(ctrl: &Controller, msg: &[u32]) {
    if i2o_abi::reply_failed(msg[0]) {
        exec::report_reply_failure(ctrl, msg);
    }

    match TransactionContext::decode(msg[2]) {
        Some(TransactionContext::PostWait { token, .. }) => {
            postwait::complete(ctrl, token, exec::reply_result(msg));
        }
        Some(TransactionContext::FireAndForget { handler }) => {
            handlers::dispatch(handler, ctrl, msg);
        }
        None => {
            // Reply for nothing we could have sent: IOP garbage or a stale
            // frame. Protocol error, not fatal.
            klog_debug!(
                "{}: reply with undecodable context {:#010x}, dropped",
                ctrl.name(),
                msg[2]
            );
        }
    }
}
