//! Controller records and the process-wide controller registry.
//!
//! One [`Controller`] represents one IOP. The registry is a fixed slot
//! table: the slot index is the unit number and never changes for the
//! controller's lifetime. Lookups hand out [`ControllerGuard`] borrows that
//! bump a per-controller user count; deletion is refused while any guard is
//! live, which gives reader-active-while-writer-waits semantics without a
//! lock on the read paths.
//!
//! # Concurrency
//!
//! The slot table lock is held only for slot manipulation and the
//! user-count transition that rides with it. Everything behind a
//! `ControllerGuard` is protected by the controller's own field locks.

extern crate alloc;

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use i2o_abi::{I2oError, IopState, StatusBlock};
use i2o_lib::{IrqMutex, klog_debug, klog_error, klog_info, klog_warn};

use crate::device;
use crate::lct::{self, Lct};

/// Hard capacity of the controller registry.
pub const MAX_IOPS: usize = 32;

/// How long `delete_controller` waits for the LCT thread to exit.
const LCT_THREAD_JOIN_TIMEOUT_MS: u64 = 2_000;

// =============================================================================
// Bus operations
// =============================================================================

/// Everything the core needs from the bus layer, supplied per controller at
/// install time.
///
/// The FIFO accessors are raw register reads/writes with no synchronization
/// of their own; the transport serializes as needed. The DMA accessors model
/// the shared memory window the IOP can reach: the core allocates request
/// payload buffers through them and passes the returned 32-bit bus
/// addresses inside messages.
pub trait BusOps: Send + Sync {
    /// Pop a free inbound frame address, or [`EMPTY_QUEUE`](i2o_abi::EMPTY_QUEUE).
    fn read_inbound(&self) -> u32;
    /// Hand a filled frame to the IOP. The IOP owns the frame afterwards.
    fn write_inbound(&self, frame: u32);
    /// Pop a ready reply frame address, or `EMPTY_QUEUE`.
    fn read_outbound(&self) -> u32;
    /// Return a consumed reply frame to the IOP's outbound free pool.
    fn write_outbound(&self, frame: u32);

    /// Copy a message frame out of shared memory.
    fn read_frame(&self, addr: u32, out: &mut [u32]);
    /// Copy a message frame into shared memory.
    fn write_frame(&self, addr: u32, words: &[u32]);

    /// Allocate an IOP-reachable buffer, zeroed. `None` on exhaustion.
    fn alloc_dma(&self, words: usize) -> Option<u32>;
    fn free_dma(&self, addr: u32);
    fn read_dma(&self, addr: u32, out: &mut [u32]);
    fn write_dma(&self, addr: u32, words: &[u32]);

    /// Bus address of the inbound FIFO, for the system table row.
    fn inbound_port_address(&self) -> u64;

    /// Release bus-specific resources (mappings, IRQ). Called exactly once,
    /// at the end of a successful delete.
    fn destroy(&self, ctrl: &Controller);
    /// Emergency stop when teardown cannot complete cleanly.
    fn bus_disable(&self, ctrl: &Controller);
}

// =============================================================================
// Per-controller statistics
// =============================================================================

/// Monotonic per-controller counters, updated lock-free from both contexts.
#[derive(Default)]
pub struct ControllerStats {
    pub posts: AtomicU64,
    pub replies: AtomicU64,
    pub events_queued: AtomicU64,
    pub events_dropped: AtomicU64,
    pub post_wait_timeouts: AtomicU64,
}

/// Read-only snapshot of [`ControllerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub posts: u64,
    pub replies: u64,
    pub events_queued: u64,
    pub events_dropped: u64,
    pub post_wait_timeouts: u64,
}

impl ControllerStats {
    const fn new() -> Self {
        Self {
            posts: AtomicU64::new(0),
            replies: AtomicU64::new(0),
            events_queued: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            post_wait_timeouts: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            posts: self.posts.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            post_wait_timeouts: self.post_wait_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "posts: {}, replies: {}, events: {} (+{} dropped), pw timeouts: {}",
            self.posts, self.replies, self.events_queued, self.events_dropped,
            self.post_wait_timeouts
        )
    }
}

// =============================================================================
// Queue geometry
// =============================================================================

/// Message queue parameters negotiated during bring-up.
#[derive(Clone, Copy, Debug)]
pub struct QueueGeometry {
    /// Inbound (request) frame size in bytes, from the status block.
    pub inbound_frame_bytes: u16,
    /// Outbound (reply) frame size in bytes.
    pub outbound_frame_bytes: u16,
    /// Number of reply frames the host posts to the outbound free pool.
    pub outbound_frames: u32,
}

impl QueueGeometry {
    const fn unset() -> Self {
        Self {
            inbound_frame_bytes: i2o_abi::MSG_FRAME_BYTES as u16,
            outbound_frame_bytes: i2o_abi::MSG_FRAME_BYTES as u16,
            outbound_frames: i2o_abi::OUTBOUND_FRAME_COUNT,
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// One IOP and everything the host caches about it.
pub struct Controller {
    unit: u8,
    name: String,
    pub(crate) bus: Box<dyn BusOps>,

    /// Host-tracked lifecycle state, fed from status blocks and transitions
    /// the bring-up machine performs itself.
    state: IrqMutex<IopState>,
    /// Live `ControllerGuard` borrows. Deletion requires zero.
    users: AtomicI32,

    pub(crate) status_block: IrqMutex<Option<StatusBlock>>,
    /// Raw HRT words; the core fetches and logs it, bus code interprets it.
    pub(crate) hrt: IrqMutex<Vec<u32>>,
    /// The LCT consumers see. Capacity is monotonically non-decreasing.
    pub(crate) lct: IrqMutex<Lct>,
    /// Working LCT the renotify path fills; reconciled against `devices`
    /// and then published into `lct`.
    pub(crate) dlct: IrqMutex<Lct>,
    /// DMA buffer the IOP writes refreshed LCTs into.
    pub(crate) dlct_dma: IrqMutex<Option<DmaRegion>>,

    pub(crate) devices: IrqMutex<Vec<device::I2oDevice>>,
    pub(crate) geometry: IrqMutex<QueueGeometry>,
    /// Reply frames handed to the IOP, kept for freeing at delete.
    pub(crate) outbound_pool: IrqMutex<Vec<u32>>,
    /// Set once `UtilEventRegister` has been issued for this controller.
    pub(crate) event_registered: AtomicBool,

    pub stats: ControllerStats,
}

/// An IOP-reachable buffer: bus address plus length in words.
#[derive(Clone, Copy, Debug)]
pub struct DmaRegion {
    pub addr: u32,
    pub words: usize,
}

impl Controller {
    #[inline]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn current_state(&self) -> IopState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: IopState) {
        let mut s = self.state.lock();
        if *s != state {
            klog_debug!("{}: state {} -> {}", self.name, *s, state);
            *s = state;
        }
    }

    /// Frame size for outgoing requests, in words.
    pub(crate) fn inbound_frame_words(&self) -> usize {
        (self.geometry.lock().inbound_frame_bytes as usize) / 4
    }
}

// =============================================================================
// Registry
// =============================================================================

static CONTROLLERS: IrqMutex<[Option<Box<Controller>>; MAX_IOPS]> =
    IrqMutex::new([const { None }; MAX_IOPS]);

/// Borrowed reference to an installed controller.
///
/// Holding a guard pins the controller: `delete_controller` refuses with
/// `Busy` until every guard is dropped. The raw pointer stays valid for the
/// guard's lifetime because the registry only frees a controller when its
/// user count is zero, and the count is incremented under the same lock
/// that checks it.
pub struct ControllerGuard {
    ctrl: *const Controller,
}

// SAFETY: the pointed-to controller outlives the guard (user count pins
// it), and all interior mutability in `Controller` is lock- or
// atomic-protected.
unsafe impl Send for ControllerGuard {}
unsafe impl Sync for ControllerGuard {}

impl Deref for ControllerGuard {
    type Target = Controller;

    #[inline]
    fn deref(&self) -> &Controller {
        // SAFETY: see the guard's invariant above.
        unsafe { &*self.ctrl }
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        let prev = self.users.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

/// Install a discovered controller, assigning the first free unit number.
///
/// The controller comes up in `Absent` state with empty caches; the bring-up
/// machine does the rest.
pub fn install_controller(bus: Box<dyn BusOps>) -> Result<u8, I2oError> {
    let mut table = CONTROLLERS.lock();
    let Some(slot) = table.iter().position(|s| s.is_none()) else {
        klog_error!("i2o: controller registry full ({} units)", MAX_IOPS);
        return Err(I2oError::NoSpace);
    };

    let unit = slot as u8;
    let ctrl = Box::new(Controller {
        unit,
        name: format!("iop{unit}"),
        bus,
        state: IrqMutex::new(IopState::Absent),
        users: AtomicI32::new(0),
        status_block: IrqMutex::new(None),
        hrt: IrqMutex::new(Vec::new()),
        lct: IrqMutex::new(Lct::new()),
        dlct: IrqMutex::new(Lct::new()),
        dlct_dma: IrqMutex::new(None),
        devices: IrqMutex::new(Vec::new()),
        geometry: IrqMutex::new(QueueGeometry::unset()),
        outbound_pool: IrqMutex::new(Vec::new()),
        event_registered: AtomicBool::new(false),
        stats: ControllerStats::new(),
    });

    lct::reset_refresh_signal(unit);
    klog_info!("i2o: installed {}", ctrl.name);
    table[slot] = Some(ctrl);
    Ok(unit)
}

/// Look up a controller, taking a user reference on success.
pub fn find_controller(unit: u8) -> Option<ControllerGuard> {
    let table = CONTROLLERS.lock();
    let slot = table.get(unit as usize)?;
    let ctrl = slot.as_deref()?;
    ctrl.users.fetch_add(1, Ordering::AcqRel);
    Some(ControllerGuard {
        ctrl: ctrl as *const Controller,
    })
}

/// Visit every installed controller in unit order.
///
/// Each visit borrows the controller for the duration of the callback only.
pub fn for_each_controller(mut f: impl FnMut(&Controller)) {
    for unit in 0..MAX_IOPS as u8 {
        if let Some(guard) = find_controller(unit) {
            f(&guard);
        }
    }
}

/// Units of every installed controller, in order.
pub fn installed_units() -> Vec<u8> {
    let table = CONTROLLERS.lock();
    (0..MAX_IOPS)
        .filter(|&i| table[i].is_some())
        .map(|i| i as u8)
        .collect()
}

/// Delete a controller and free everything it owns.
///
/// Refused with `Busy` while user references exist or while a device's
/// owner vetoes its deletion. On the device-veto path the controller is
/// re-installed in its slot after `bus_disable`, matching the "surface
/// `Busy`, never silently ignore" contract.
pub fn delete_controller(unit: u8) -> Result<(), I2oError> {
    // Phase 1: detach from the registry so no new references appear.
    let ctrl = {
        let mut table = CONTROLLERS.lock();
        let Some(slot) = table.get_mut(unit as usize) else {
            return Err(I2oError::NotFound);
        };
        match slot.as_ref() {
            None => return Err(I2oError::NotFound),
            Some(ctrl) if ctrl.users.load(Ordering::Acquire) > 0 => {
                klog_warn!("{}: delete refused, controller in use", ctrl.name());
                return Err(I2oError::Busy);
            }
            Some(_) => {}
        }
        let Some(ctrl) = slot.take() else {
            return Err(I2oError::NotFound);
        };
        ctrl
    };

    // Phase 2: tear down owned devices. A veto aborts the whole delete.
    ctrl.event_registered.store(false, Ordering::Release);
    if let Err(e) = device::delete_all_devices(&ctrl) {
        klog_error!("{}: device refused deletion, disabling bus", ctrl.name());
        ctrl.bus.bus_disable(&ctrl);
        let mut table = CONTROLLERS.lock();
        table[unit as usize] = Some(ctrl);
        return Err(e);
    }

    // Phase 3: stop the LCT refresh task, bounded.
    if !lct::terminate_refresh_thread(unit, LCT_THREAD_JOIN_TIMEOUT_MS) {
        klog_warn!("{}: LCT thread did not exit in time", ctrl.name());
    }

    // Phase 4: hand back bus resources and frames.
    {
        let pool = core::mem::take(&mut *ctrl.outbound_pool.lock());
        for frame in pool {
            ctrl.bus.free_dma(frame);
        }
    }
    if let Some(region) = ctrl.dlct_dma.lock().take() {
        ctrl.bus.free_dma(region.addr);
    }
    ctrl.bus.destroy(&ctrl);

    klog_info!("{}: deleted", ctrl.name());
    drop(ctrl);
    Ok(())
}

/// Delete every installed controller; used by shutdown and the suites.
/// Individual `Busy` failures are logged and skipped.
pub fn delete_all_controllers() {
    for unit in installed_units() {
        if let Err(e) = delete_controller(unit) {
            klog_warn!("i2o: could not delete iop{}: {}", unit, e);
        }
    }
}
