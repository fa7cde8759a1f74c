//! Handler (OSM) registry.
//!
//! An OSM (OS service module) is a class driver that consumes replies and
//! device notifications. Handlers register once at module load and receive
//! a [`HandlerContext`]: their slot index in a fixed table, stamped into
//! every message they send and used to route the reply back.
//!
//! Dispatch never runs a callback under the table lock: the `&'static`
//! reference is copied out first, so handlers are free to re-enter the
//! registry.

use i2o_abi::{ClassMask, HandlerContext, I2oError, Tid};
use i2o_lib::{IrqMutex, klog_debug, klog_info, klog_warn};

use crate::controller::Controller;

/// Hard capacity of the handler table; mirrors [`HandlerContext::LIMIT`].
pub const MAX_OSM_HANDLERS: usize = HandlerContext::LIMIT;

/// A registered consumer of replies and device notifications.
///
/// Only `name`, `classes` and `on_reply` are required. The default
/// `on_device_deleting` returns `false`, which reads as "no deletion
/// callback": a device owned by such a handler refuses deletion.
pub trait OsmHandler: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Which device classes this handler wants new-device notifications for.
    fn classes(&self) -> ClassMask;

    /// A reply addressed to this handler arrived. Interrupt context: must
    /// not block.
    fn on_reply(&self, ctrl: &Controller, msg: &[u32]);

    /// A device of a matching class appeared.
    fn on_new_device(&self, _ctrl: &Controller, _tid: Tid) {}

    /// The device this handler owns is being deleted. Return `true` to
    /// release it and let the deletion proceed.
    fn on_device_deleting(&self, _ctrl: &Controller, _tid: Tid) -> bool {
        false
    }

    /// A watched device was removed (best-effort notification).
    fn on_device_removed(&self, _ctrl: &Controller, _tid: Tid) {}

    /// The system is shutting down; issued before controllers quiesce.
    fn on_reboot(&self) {}
}

static OSM_TABLE: IrqMutex<[Option<&'static dyn OsmHandler>; MAX_OSM_HANDLERS]> =
    IrqMutex::new([None; MAX_OSM_HANDLERS]);

/// Register a handler into the first free slot.
pub fn register_handler(handler: &'static dyn OsmHandler) -> Result<HandlerContext, I2oError> {
    let mut table = OSM_TABLE.lock();
    for (i, slot) in table.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(handler);
            // Slot indices are always valid contexts.
            let Some(ctx) = HandlerContext::new(i) else {
                return Err(I2oError::NoSpace);
            };
            klog_info!("i2o: handler '{}' registered as {}", handler.name(), ctx);
            return Ok(ctx);
        }
    }
    klog_warn!("i2o: handler table full, '{}' rejected", handler.name());
    Err(I2oError::NoSpace)
}

/// Clear a handler's slot. Idempotent: the context is slot-derived, so
/// clearing an empty slot is a no-op.
pub fn unregister_handler(ctx: HandlerContext) {
    let mut table = OSM_TABLE.lock();
    if let Some(h) = table[ctx.index()].take() {
        klog_info!("i2o: handler '{}' unregistered", h.name());
    }
}

/// Handler currently registered at `ctx`, if any.
pub(crate) fn handler_at(ctx: HandlerContext) -> Option<&'static dyn OsmHandler> {
    OSM_TABLE.lock()[ctx.index()]
}

/// Deliver a reply to the handler at `ctx`.
///
/// An empty slot is a protocol error: the handler unregistered with
/// messages in flight, or the IOP echoed garbage. Logged and dropped.
pub(crate) fn dispatch(ctx: HandlerContext, ctrl: &Controller, msg: &[u32]) {
    match handler_at(ctx) {
        Some(h) => h.on_reply(ctrl, msg),
        None => klog_debug!(
            "{}: reply for unregistered {}, dropped",
            ctrl.name(),
            ctx
        ),
    }
}

/// Visit every registered handler whose class mask covers `class`.
pub(crate) fn for_each_matching(
    class: i2o_abi::DeviceClass,
    mut f: impl FnMut(HandlerContext, &'static dyn OsmHandler),
) {
    for i in 0..MAX_OSM_HANDLERS {
        let entry = {
            let table = OSM_TABLE.lock();
            table[i]
        };
        if let Some(h) = entry
            && h.classes().matches(class)
            && let Some(ctx) = HandlerContext::new(i)
        {
            f(ctx, h);
        }
    }
}

/// Tell every registered handler the system is going down.
pub(crate) fn notify_reboot() {
    for i in 0..MAX_OSM_HANDLERS {
        let entry = {
            let table = OSM_TABLE.lock();
            table[i]
        };
        if let Some(h) = entry {
            h.on_reboot();
        }
    }
}

/// Free slots remaining in the table (suite support).
pub fn free_handler_slots() -> usize {
    OSM_TABLE.lock().iter().filter(|s| s.is_none()).count()
}

/// Drop every registration except `keep` (suite support).
pub fn retain_only(keep: HandlerContext) {
    let mut table = OSM_TABLE.lock();
    for (i, slot) in table.iter_mut().enumerate() {
        if i != keep.index() {
            *slot = None;
        }
    }
}
