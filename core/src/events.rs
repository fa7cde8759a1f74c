//! Asynchronous event capture and the system event thread.
//!
//! The IOP reports Executive events as unsolicited replies to an armed
//! `UtilEventRegister`. The dispatch path may not do real work, so it only
//! copies the reply into a bounded ring and wakes the event thread; the
//! thread does the actual handling. When the ring is full the oldest entry
//! is overwritten: a storm of events degrades to losing the stalest ones,
//! never to backpressure on the interrupt path.

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, Ordering};

use i2o_abi::{
    EVT_ADAPTER_FAULT, EVT_CONFIGURATION_FLAG, EVT_CONNECTION_FAIL, EVT_GENERAL_WARNING,
    EVT_HARDWARE_FAIL, EVT_MODIFIED_LCT, EVT_NEW_LCT_ENTRY, EVT_POWER_FAIL, EVT_RESET_IMMINENT,
    EVT_RESET_PENDING, EVT_RESOURCE_LIMITS, LctEntry, MSG_FRAME_WORDS,
};
use i2o_lib::{IrqMutex, RingBuffer, WaitQueue, klog_debug, klog_error, klog_info, klog_warn, runtime};

use crate::controller::{Controller, find_controller};
use crate::device;
use crate::handlers;

/// Ring capacity; beyond this, oldest events are dropped.
pub const EVT_QUEUE_LEN: usize = 32;

/// One captured reply plus where it came from.
#[derive(Clone, Copy)]
struct QueuedEvent {
    unit: u8,
    msg: [u32; MSG_FRAME_WORDS],
}

impl QueuedEvent {
    const EMPTY: Self = Self {
        unit: 0,
        msg: [0; MSG_FRAME_WORDS],
    };
}

/// Ring indices live under their own lock; the "is anything pending" signal
/// is the wait queue, deliberately separate so waking never contends with
/// the producer's index update.
static EVENT_RING: IrqMutex<RingBuffer<QueuedEvent, EVT_QUEUE_LEN>> =
    IrqMutex::new(RingBuffer::new_with(QueuedEvent::EMPTY));
static EVENT_WQ: WaitQueue = WaitQueue::new();

static EVENT_TERMINATE: AtomicBool = AtomicBool::new(false);
static EVENT_RUNNING: AtomicBool = AtomicBool::new(false);

/// Capture one event reply. Dispatch context: copy, bump indices, wake.
pub(crate) fn queue_event(ctrl: &Controller, msg: &[u32]) {
    let mut entry = QueuedEvent {
        unit: ctrl.unit(),
        msg: [0; MSG_FRAME_WORDS],
    };
    let n = msg.len().min(MSG_FRAME_WORDS);
    entry.msg[..n].copy_from_slice(&msg[..n]);

    let dropped = EVENT_RING.lock().push_overwrite(entry);
    ctrl.stats.events_queued.fetch_add(1, Ordering::Relaxed);
    if let Some(old) = dropped {
        ctrl.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        klog_warn!("i2o: event queue full, dropped event from iop{}", old.unit);
    }
    EVENT_WQ.wake_one();
}

/// Handle one queued event, if any. Returns `false` when the ring is empty.
///
/// The copy-out happens under the ring lock; the handling does not, so slow
/// per-event work never extends the producer's critical section.
pub fn event_pass() -> bool {
    let entry = EVENT_RING.lock().try_pop();
    let Some(entry) = entry else {
        return false;
    };
    dispatch_event(entry.unit, &entry.msg);
    true
}

/// Decode and act on one event notification by its indicator.
fn dispatch_event(unit: u8, msg: &[u32]) {
    let Some(ctrl) = find_controller(unit) else {
        klog_debug!("i2o: event for departed iop{}, dropped", unit);
        return;
    };
    let indicator = msg[4];

    match indicator {
        EVT_RESOURCE_LIMITS => klog_warn!("{}: IOP reports resource limits", ctrl.name()),
        EVT_CONNECTION_FAIL => klog_warn!("{}: connection failure event", ctrl.name()),
        EVT_ADAPTER_FAULT => klog_error!("{}: adapter fault event", ctrl.name()),
        EVT_POWER_FAIL => klog_error!("{}: power failure event", ctrl.name()),
        EVT_RESET_PENDING => klog_info!("{}: reset pending", ctrl.name()),
        EVT_RESET_IMMINENT => klog_warn!("{}: reset imminent", ctrl.name()),
        EVT_HARDWARE_FAIL => klog_error!("{}: hardware failure event", ctrl.name()),
        EVT_CONFIGURATION_FLAG => klog_info!("{}: configuration change requested", ctrl.name()),
        EVT_GENERAL_WARNING => klog_warn!("{}: general warning event", ctrl.name()),
        EVT_NEW_LCT_ENTRY => on_new_lct_entry(&ctrl, msg),
        EVT_MODIFIED_LCT => on_modified_lct_entry(&ctrl, msg),
        other => klog_info!("{}: unknown event indicator {:#010x}", ctrl.name(), other),
    }
}

/// Event payload carries the new LCT entry starting at word 5: synthesize
/// the device and tell every interested handler.
fn on_new_lct_entry(ctrl: &Controller, msg: &[u32]) {
    let Some(entry) = LctEntry::parse(&msg[5..]) else {
        klog_warn!("{}: truncated new-LCT-entry event", ctrl.name());
        return;
    };
    if device::install_device(ctrl, &entry) {
        handlers::for_each_matching(entry.class, |_ctx, h| {
            h.on_new_device(ctrl, entry.tid);
        });
    }
}

/// Overwrite the cached entry of an existing device in place.
fn on_modified_lct_entry(ctrl: &Controller, msg: &[u32]) {
    let Some(entry) = LctEntry::parse(&msg[5..]) else {
        klog_warn!("{}: truncated modified-LCT event", ctrl.name());
        return;
    };
    let mut devices = ctrl.devices.lock();
    match devices.iter_mut().find(|d| d.tid == entry.tid) {
        Some(dev) => {
            dev.lct_entry = entry;
            dev.flags = entry.device_flags;
            dev.subclass = entry.subclass;
        }
        None => klog_warn!(
            "{}: modified-LCT event for unknown {}",
            ctrl.name(),
            entry.tid
        ),
    }
}

// =============================================================================
// The event thread
// =============================================================================

/// Spawn the system-wide event thread.
pub(crate) fn spawn_event_thread() {
    EVENT_TERMINATE.store(false, Ordering::Release);
    let id = runtime::thread_spawn("i2o_evtd", event_thread, core::ptr::null_mut());
    if id == runtime::INVALID_THREAD_ID {
        klog_warn!("i2o: could not spawn event thread");
    }
}

/// Ask the event thread to exit and wake it so it notices.
pub(crate) fn terminate_event_thread() {
    EVENT_TERMINATE.store(true, Ordering::Release);
    EVENT_WQ.wake_all();
}

/// `true` while the event thread is between its entry and exit; the
/// deleting code observes this during shutdown.
pub fn event_thread_running() -> bool {
    EVENT_RUNNING.load(Ordering::Acquire)
}

/// Entry point of the event thread: drain, park, repeat.
pub fn event_thread(_arg: *mut c_void) {
    EVENT_RUNNING.store(true, Ordering::Release);
    klog_debug!("i2o: event thread up");

    loop {
        EVENT_WQ.wait_event(|| {
            EVENT_TERMINATE.load(Ordering::Acquire) || !EVENT_RING.lock().is_empty()
        });
        if EVENT_TERMINATE.load(Ordering::Acquire) {
            break;
        }
        while event_pass() {}
    }

    klog_debug!("i2o: event thread down");
    EVENT_RUNNING.store(false, Ordering::Release);
}

/// Pending events in the ring (suite support).
pub fn pending_events() -> usize {
    EVENT_RING.lock().len()
}

/// Drop everything in the ring (suite support).
pub fn drain_events() {
    EVENT_RING.lock().reset();
}
