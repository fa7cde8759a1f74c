//! Logical configuration table: fetch, refresh, reconcile.
//!
//! The IOP's LCT is the directory of addressable devices. The core keeps
//! two copies per controller: a *working* table (`dlct`) the renotify
//! protocol refreshes, and the *visible* table (`lct`) consumers read. The
//! visible copy is republished from the working one only at the end of a
//! refresh pass, and its capacity never shrinks, so a concurrent reader
//! never sees a half-written or truncated table.
//!
//! Refreshes are driven by a per-controller thread parked on a binary
//! signal. The IOP raises it by answering an armed `ExecLctNotify`; the
//! bring-up path raises it once to seed the cycle. Reconciliation is a set
//! difference by TID in both directions. TIDs are never reused while the
//! system is up, so a TID missing from the fresh table is a removed device
//! and an unknown TID is a new one.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, Ordering};

use i2o_abi::{
    CMD_LCT_NOTIFY, EVT_MASK_ALL, I2oError, LCT_ENTRY_WORDS, LCT_HEADER_WORDS, LctEntry,
    SGL_OFFSET_6, Tid, TransactionContext, frame_head, frame_route, lct_change_indicator,
    lct_entry_count, lct_table_size,
};
use i2o_lib::{WaitQueue, clock, klog_debug, klog_info, klog_warn, runtime};

use crate::controller::{Controller, DmaRegion, MAX_IOPS, find_controller};
use crate::device;
use crate::exec;
use crate::handlers;
use crate::postwait;
use crate::transport;

/// Bound for the initial synchronous LCT fetch.
const LCT_FETCH_TIMEOUT_MS: u64 = 15_000;
/// Smallest working buffer: room for a header and a handful of entries.
const LCT_MIN_WORDS: usize = LCT_HEADER_WORDS + 8 * LCT_ENTRY_WORDS;

// =============================================================================
// The table itself
// =============================================================================

/// A cached LCT: raw words plus typed accessors.
///
/// The backing buffer only ever grows. `publish_from` replaces the contents
/// by building the new buffer aside and swapping it in, so readers of the
/// old buffer are never shown an intermediate state.
pub struct Lct {
    buf: Vec<u32>,
}

impl Lct {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Table size in words as reported in the header.
    pub fn table_size(&self) -> usize {
        lct_table_size(&self.buf)
    }

    pub fn change_indicator(&self) -> u32 {
        lct_change_indicator(&self.buf)
    }

    /// Current buffer capacity in words. Monotonically non-decreasing.
    pub fn capacity_words(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table_size() <= LCT_HEADER_WORDS
    }

    pub fn entry_count(&self) -> usize {
        lct_entry_count(self.table_size().min(self.buf.len()))
    }

    /// Parse entry `idx`, if the table holds that many.
    pub fn entry(&self, idx: usize) -> Option<LctEntry> {
        if idx >= self.entry_count() {
            return None;
        }
        let off = LCT_HEADER_WORDS + idx * LCT_ENTRY_WORDS;
        LctEntry::parse(&self.buf[off..])
    }

    pub fn contains_tid(&self, tid: Tid) -> bool {
        self.find_entry(tid).is_some()
    }

    pub fn find_entry(&self, tid: Tid) -> Option<LctEntry> {
        (0..self.entry_count()).find_map(|i| self.entry(i).filter(|e| e.tid == tid))
    }

    /// Overwrite contents from raw words, growing (never shrinking) the
    /// buffer.
    pub fn copy_from(&mut self, src: &[u32]) {
        if src.len() > self.buf.len() {
            self.buf.resize(src.len(), 0);
        }
        self.buf[..src.len()].copy_from_slice(src);
    }

    /// Republish from another table: build the new buffer aside, then swap.
    pub fn publish_from(&mut self, src: &Lct) {
        let words = src.buf.len().max(self.buf.len());
        let mut fresh = vec![0u32; words];
        fresh[..src.buf.len()].copy_from_slice(&src.buf);
        self.buf = fresh;
    }

    pub fn raw(&self) -> &[u32] {
        &self.buf
    }
}

impl Default for Lct {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Refresh signals and the per-controller thread
// =============================================================================

/// Parking state for one controller's refresh thread. Static (indexed by
/// unit) so the thread can block without borrowing the controller record:
/// a thread holding a controller reference across its sleep would pin the
/// controller against deletion forever.
struct RefreshSignal {
    wq: WaitQueue,
    raised: AtomicBool,
    terminate: AtomicBool,
    running: AtomicBool,
}

impl RefreshSignal {
    const fn new() -> Self {
        Self {
            wq: WaitQueue::new(),
            raised: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }
}

static REFRESH: [RefreshSignal; MAX_IOPS] = [const { RefreshSignal::new() }; MAX_IOPS];

pub(crate) fn reset_refresh_signal(unit: u8) {
    let sig = &REFRESH[unit as usize];
    sig.raised.store(false, Ordering::Release);
    sig.terminate.store(false, Ordering::Release);
}

/// Wake the controller's refresh thread for one pass.
pub(crate) fn raise_refresh_signal(unit: u8) {
    let sig = &REFRESH[unit as usize];
    sig.raised.store(true, Ordering::Release);
    sig.wq.wake_one();
}

/// Signal the refresh thread to exit and wait (bounded) until it has.
///
/// `false` if the thread was still running when the bound expired; the
/// caller logs and proceeds; a wedged refresh thread must not wedge
/// controller teardown with it.
pub(crate) fn terminate_refresh_thread(unit: u8, timeout_ms: u64) -> bool {
    let sig = &REFRESH[unit as usize];
    if !sig.running.load(Ordering::Acquire) {
        return true;
    }
    sig.terminate.store(true, Ordering::Release);
    sig.wq.wake_all();

    let deadline = clock::deadline_ms(timeout_ms);
    while sig.running.load(Ordering::Acquire) {
        if clock::expired(deadline) {
            return false;
        }
        if runtime::is_runtime_initialized() {
            runtime::thread_yield();
        }
        core::hint::spin_loop();
    }
    true
}

/// Spawn the refresh thread for an online controller.
pub(crate) fn spawn_refresh_thread(ctrl: &Controller) {
    reset_refresh_signal(ctrl.unit());
    let arg = ctrl.unit() as usize as *mut c_void;
    let id = runtime::thread_spawn("i2o_lctd", lct_refresh_thread, arg);
    if id == runtime::INVALID_THREAD_ID {
        klog_warn!("{}: could not spawn LCT refresh thread", ctrl.name());
    }
}

/// Entry point of the per-controller refresh thread.
///
/// Each pass borrows the controller only while working; the park happens
/// with no borrow held so deletion can proceed.
pub fn lct_refresh_thread(arg: *mut c_void) {
    let unit = arg as usize as u8;
    let sig = &REFRESH[unit as usize];
    sig.running.store(true, Ordering::Release);
    klog_debug!("iop{}: LCT refresh thread up", unit);

    loop {
        sig.wq.wait_event(|| {
            sig.raised.load(Ordering::Acquire) || sig.terminate.load(Ordering::Acquire)
        });
        if sig.terminate.load(Ordering::Acquire) {
            break;
        }
        sig.raised.store(false, Ordering::Release);

        match find_controller(unit) {
            Some(ctrl) => lct_refresh_pass(&ctrl),
            None => break,
        }
    }

    klog_debug!("iop{}: LCT refresh thread down", unit);
    sig.running.store(false, Ordering::Release);
}

// =============================================================================
// Fetch and refresh
// =============================================================================

/// Make sure the controller's LCT DMA window can hold `words`, growing it
/// if the IOP now reports a larger table. Never shrinks.
fn ensure_dlct_dma(ctrl: &Controller, words: usize) -> Result<DmaRegion, I2oError> {
    let mut slot = ctrl.dlct_dma.lock();
    if let Some(region) = *slot
        && region.words >= words
    {
        return Ok(region);
    }
    let old = slot.take();
    let Some(addr) = ctrl.bus.alloc_dma(words) else {
        *slot = old;
        return Err(I2oError::NoMemory);
    };
    if let Some(region) = old {
        ctrl.bus.free_dma(region.addr);
    }
    let region = DmaRegion { addr, words };
    *slot = Some(region);
    Ok(region)
}

fn lct_notify_msg(region: DmaRegion, change_indicator: u32) -> [u32; 8] {
    [
        frame_head(8, SGL_OFFSET_6),
        frame_route(CMD_LCT_NOTIFY, Tid::HOST, Tid::IOP),
        0, // transaction context
        0,
        EVT_MASK_ALL, // all device classes
        change_indicator,
        region.addr,
        region.words as u32,
    ]
}

/// Words the working buffer should have, from the status block's hint.
fn expected_lct_words(ctrl: &Controller) -> usize {
    let hint = ctrl
        .status_block
        .lock()
        .map(|sb| (sb.expected_lct_bytes as usize) / 4)
        .unwrap_or(0);
    hint.max(LCT_MIN_WORDS)
}

/// Synchronously fetch the LCT and populate the device registry.
///
/// A change indicator of zero asks the IOP to answer immediately with the
/// current table. If the answer reports a table larger than the window, the
/// window is regrown and the fetch retried once.
pub(crate) fn lct_fetch(ctrl: &Controller) -> Result<(), I2oError> {
    let mut words = expected_lct_words(ctrl);

    for _ in 0..2 {
        let region = ensure_dlct_dma(ctrl, words)?;
        let mut msg = lct_notify_msg(region, 0);
        postwait::post_and_wait(ctrl, &mut msg, LCT_FETCH_TIMEOUT_MS)?;

        let reported = pull_dlct_from_dma(ctrl)?;
        if reported <= region.words {
            sync_devices_with_dlct(ctrl);
            publish_dlct(ctrl);
            klog_info!(
                "{}: LCT with {} entries",
                ctrl.name(),
                ctrl.lct.lock().entry_count()
            );
            return Ok(());
        }
        klog_debug!(
            "{}: LCT needs {} words, window has {}; regrowing",
            ctrl.name(),
            reported,
            region.words
        );
        words = reported;
    }
    Err(I2oError::NoSpace)
}

/// Arm the IOP to answer (and thereby wake the refresh thread) on the next
/// LCT change. Fire-and-forget with the Executive's context.
pub(crate) fn send_lct_notify(ctrl: &Controller) -> Result<(), I2oError> {
    let words = expected_lct_words(ctrl).max(ctrl.dlct.lock().table_size());
    let region = ensure_dlct_dma(ctrl, words)?;
    let indicator = ctrl.dlct.lock().change_indicator();
    let mut msg = lct_notify_msg(region, indicator);
    msg[2] = TransactionContext::FireAndForget {
        handler: exec::exec_context()?,
    }
    .encode();
    transport::post_message(ctrl, &msg)
}

/// Copy the DMA window into the working table. Returns the table size the
/// IOP reported, which may exceed the window (truncated answer).
fn pull_dlct_from_dma(ctrl: &Controller) -> Result<usize, I2oError> {
    let Some(region) = *ctrl.dlct_dma.lock() else {
        return Err(I2oError::NotFound);
    };
    let mut raw = vec![0u32; region.words];
    ctrl.bus.read_dma(region.addr, &mut raw);
    let reported = lct_table_size(&raw);
    let usable = reported.min(region.words);
    ctrl.dlct.lock().copy_from(&raw[..usable.max(LCT_HEADER_WORDS).min(raw.len())]);
    Ok(reported)
}

/// Reconcile the installed device set against the working table: a set
/// symmetric difference by TID.
fn sync_devices_with_dlct(ctrl: &Controller) {
    // Removals first. A veto is a race with a busy owner: log, skip, let a
    // later pass retry.
    for tid in device_tids_not_in_dlct(ctrl) {
        match device::delete_device(ctrl, tid) {
            Ok(()) => {}
            Err(I2oError::Busy) => {
                klog_warn!("{}: {} vanished but owner is busy, kept", ctrl.name(), tid);
            }
            Err(e) => klog_warn!("{}: dropping {} failed: {}", ctrl.name(), tid, e),
        }
    }

    // Then additions.
    let fresh: Vec<LctEntry> = {
        let dlct = ctrl.dlct.lock();
        (0..dlct.entry_count()).filter_map(|i| dlct.entry(i)).collect()
    };
    for entry in fresh {
        if device::install_device(ctrl, &entry) {
            handlers::for_each_matching(entry.class, |_ctx, h| {
                h.on_new_device(ctrl, entry.tid);
            });
        }
    }
}

fn device_tids_not_in_dlct(ctrl: &Controller) -> Vec<Tid> {
    let dlct = ctrl.dlct.lock();
    device::device_tids(ctrl)
        .into_iter()
        .filter(|tid| !dlct.contains_tid(*tid))
        .collect()
}

/// Swap the working table into the visible one.
fn publish_dlct(ctrl: &Controller) {
    let dlct = ctrl.dlct.lock();
    ctrl.lct.lock().publish_from(&dlct);
}

/// One full refresh cycle; the thread body, also driven directly by the
/// suites.
pub fn lct_refresh_pass(ctrl: &Controller) {
    let reported = match pull_dlct_from_dma(ctrl) {
        Ok(r) => r,
        Err(e) => {
            klog_warn!("{}: LCT refresh could not read window: {}", ctrl.name(), e);
            return;
        }
    };

    let window = ctrl.dlct_dma.lock().map(|r| r.words).unwrap_or(0);
    if reported > window {
        // Truncated answer: regrow and re-arm, reconcile next pass.
        if let Err(e) = ensure_dlct_dma(ctrl, reported) {
            klog_warn!("{}: cannot grow LCT window: {}", ctrl.name(), e);
        }
        if let Err(e) = send_lct_notify(ctrl) {
            klog_warn!("{}: LCT renotify failed: {}", ctrl.name(), e);
        }
        return;
    }

    sync_devices_with_dlct(ctrl);

    if let Err(e) = send_lct_notify(ctrl) {
        klog_warn!("{}: LCT renotify failed: {}", ctrl.name(), e);
    }

    publish_dlct(ctrl);
}

/// Exec-OSM reply path for an armed `ExecLctNotify` answer: the IOP wrote a
/// refreshed table into the window; wake the thread to reconcile it.
/// Dispatch context; nothing here may block.
pub(crate) fn on_lct_notify_reply(ctrl: &Controller) {
    raise_refresh_signal(ctrl.unit());
}
