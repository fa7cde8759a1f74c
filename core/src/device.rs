//! Per-controller device registry: claim, release, watch, delete.
//!
//! A device is one LCT entry the core has materialized. Each carries an
//! optional owner (the claiming handler; "claim" is the I2O term for
//! exclusive ownership) and a small fixed set of watchers that want
//! best-effort removal notifications.
//!
//! Owner callbacks and watcher notifications always run outside the device
//! list lock so handlers can re-enter the registry.

extern crate alloc;

use i2o_abi::{
    CLAIM_PRIMARY, CMD_UTIL_CLAIM, CMD_UTIL_CLAIM_RELEASE, DeviceClass, HandlerContext, I2oError,
    LctEntry, SGL_OFFSET_0, Tid, frame_head, frame_route,
};
use i2o_lib::{klog_debug, klog_info, klog_warn};

use crate::controller::Controller;
use crate::handlers;
use crate::postwait;

/// Watcher slots per device.
pub const MAX_DEVICE_WATCHERS: usize = 8;

/// Bound for the claim/release round trip.
const CLAIM_TIMEOUT_MS: u64 = 5_000;

/// One addressable logical unit inside a controller.
pub struct I2oDevice {
    pub tid: Tid,
    pub class: DeviceClass,
    pub subclass: u32,
    pub flags: u32,
    /// Raw LCT entry as last reported by the IOP.
    pub lct_entry: LctEntry,
    pub owner: Option<HandlerContext>,
    pub watchers: [Option<HandlerContext>; MAX_DEVICE_WATCHERS],
}

impl I2oDevice {
    fn from_entry(entry: &LctEntry) -> Self {
        Self {
            tid: entry.tid,
            class: entry.class,
            subclass: entry.subclass,
            flags: entry.device_flags,
            lct_entry: *entry,
            owner: None,
            watchers: [None; MAX_DEVICE_WATCHERS],
        }
    }
}

/// Install a device parsed from an LCT entry.
///
/// Idempotent on TID: a second install refreshes the cached entry instead
/// of duplicating the device (TIDs are never reused, so a matching TID is
/// the same device).
pub fn install_device(ctrl: &Controller, entry: &LctEntry) -> bool {
    let mut devices = ctrl.devices.lock();
    if let Some(dev) = devices.iter_mut().find(|d| d.tid == entry.tid) {
        dev.lct_entry = *entry;
        dev.flags = entry.device_flags;
        return false;
    }
    devices.push(I2oDevice::from_entry(entry));
    klog_info!("{}: new device {} class {}", ctrl.name(), entry.tid, entry.class);
    true
}

/// `true` if a device with this TID is installed.
pub fn device_present(ctrl: &Controller, tid: Tid) -> bool {
    ctrl.devices.lock().iter().any(|d| d.tid == tid)
}

/// Owner context of a device, if any.
pub fn device_owner(ctrl: &Controller, tid: Tid) -> Option<HandlerContext> {
    ctrl.devices
        .lock()
        .iter()
        .find(|d| d.tid == tid)
        .and_then(|d| d.owner)
}

/// Number of installed devices.
pub fn device_count(ctrl: &Controller) -> usize {
    ctrl.devices.lock().len()
}

/// TIDs of every installed device.
pub fn device_tids(ctrl: &Controller) -> alloc::vec::Vec<Tid> {
    ctrl.devices.lock().iter().map(|d| d.tid).collect()
}

/// Delete a device, honoring the owner's veto.
///
/// Watchers are notified unconditionally, exactly once per attempt, before
/// the owner is consulted. An owner that does not implement the deletion
/// callback (the trait default) refuses by construction; the device then
/// stays installed and the caller sees `Busy`.
pub fn delete_device(ctrl: &Controller, tid: Tid) -> Result<(), I2oError> {
    let (owner, watchers) = {
        let devices = ctrl.devices.lock();
        let Some(dev) = devices.iter().find(|d| d.tid == tid) else {
            return Err(I2oError::NotFound);
        };
        (dev.owner, dev.watchers)
    };

    // Best-effort watcher notification; failures are the watcher's problem.
    for ctx in watchers.iter().flatten() {
        if let Some(h) = handlers::handler_at(*ctx) {
            h.on_device_removed(ctrl, tid);
        }
    }

    if let Some(owner_ctx) = owner {
        let released = match handlers::handler_at(owner_ctx) {
            Some(h) => h.on_device_deleting(ctrl, tid),
            None => {
                klog_warn!(
                    "{}: owner of {} vanished without releasing",
                    ctrl.name(),
                    tid
                );
                false
            }
        };
        if !released {
            klog_debug!("{}: delete of {} vetoed by owner", ctrl.name(), tid);
            return Err(I2oError::Busy);
        }
    }

    let mut devices = ctrl.devices.lock();
    if let Some(idx) = devices.iter().position(|d| d.tid == tid) {
        devices.swap_remove(idx);
        klog_info!("{}: device {} deleted", ctrl.name(), tid);
    }
    Ok(())
}

/// Delete every device; the first refusal aborts the sweep.
pub(crate) fn delete_all_devices(ctrl: &Controller) -> Result<(), I2oError> {
    for tid in device_tids(ctrl) {
        delete_device(ctrl, tid)?;
    }
    Ok(())
}

/// Claim exclusive ownership of a device for `handler`.
///
/// The owner slot is reserved before the claim message goes out so a
/// racing second claim sees `Busy` immediately; the reservation is rolled
/// back if the IOP rejects the claim.
pub fn claim_device(ctrl: &Controller, tid: Tid, handler: HandlerContext) -> Result<(), I2oError> {
    {
        let mut devices = ctrl.devices.lock();
        let Some(dev) = devices.iter_mut().find(|d| d.tid == tid) else {
            return Err(I2oError::NotFound);
        };
        if dev.owner.is_some() {
            return Err(I2oError::Busy);
        }
        dev.owner = Some(handler);
    }

    let mut msg = [
        frame_head(5, SGL_OFFSET_0),
        frame_route(CMD_UTIL_CLAIM, Tid::HOST, tid),
        0, // transaction context, stamped by post_and_wait
        0,
        CLAIM_PRIMARY,
    ];

    match postwait::post_and_wait(ctrl, &mut msg, CLAIM_TIMEOUT_MS) {
        Ok(()) => {
            klog_debug!("{}: {} claimed by {}", ctrl.name(), tid, handler);
            Ok(())
        }
        Err(e) => {
            let mut devices = ctrl.devices.lock();
            if let Some(dev) = devices.iter_mut().find(|d| d.tid == tid)
                && dev.owner == Some(handler)
            {
                dev.owner = None;
            }
            klog_warn!("{}: claim of {} failed: {}", ctrl.name(), tid, e);
            Err(e)
        }
    }
}

/// Release a claimed device.
///
/// Local ownership is cleared even when the IOP-side release fails: a
/// handler that believes it released must never stay recorded as owner, or
/// the claim wedges forever. The failure is logged, not returned.
pub fn release_device(
    ctrl: &Controller,
    tid: Tid,
    handler: HandlerContext,
) -> Result<(), I2oError> {
    {
        let devices = ctrl.devices.lock();
        let Some(dev) = devices.iter().find(|d| d.tid == tid) else {
            return Err(I2oError::NotFound);
        };
        if dev.owner != Some(handler) {
            return Err(I2oError::NotOwner);
        }
    }

    let mut msg = [
        frame_head(5, SGL_OFFSET_0),
        frame_route(CMD_UTIL_CLAIM_RELEASE, Tid::HOST, tid),
        0,
        0,
        CLAIM_PRIMARY,
    ];

    if let Err(e) = postwait::post_and_wait(ctrl, &mut msg, CLAIM_TIMEOUT_MS) {
        klog_warn!(
            "{}: IOP-side release of {} failed ({}), clearing claim anyway",
            ctrl.name(),
            tid,
            e
        );
    }

    let mut devices = ctrl.devices.lock();
    if let Some(dev) = devices.iter_mut().find(|d| d.tid == tid)
        && dev.owner == Some(handler)
    {
        dev.owner = None;
    }
    Ok(())
}

/// Add `handler` to the device's watcher set.
pub fn watch_device(ctrl: &Controller, tid: Tid, handler: HandlerContext) -> Result<(), I2oError> {
    let mut devices = ctrl.devices.lock();
    let Some(dev) = devices.iter_mut().find(|d| d.tid == tid) else {
        return Err(I2oError::NotFound);
    };
    if dev.watchers.iter().flatten().any(|c| *c == handler) {
        return Ok(());
    }
    match dev.watchers.iter_mut().find(|s| s.is_none()) {
        Some(slot) => {
            *slot = Some(handler);
            Ok(())
        }
        None => Err(I2oError::NoSpace),
    }
}

/// Remove `handler` from the device's watcher set.
pub fn unwatch_device(
    ctrl: &Controller,
    tid: Tid,
    handler: HandlerContext,
) -> Result<(), I2oError> {
    let mut devices = ctrl.devices.lock();
    let Some(dev) = devices.iter_mut().find(|d| d.tid == tid) else {
        return Err(I2oError::NotFound);
    };
    match dev.watchers.iter_mut().find(|s| **s == Some(handler)) {
        Some(slot) => {
            *slot = None;
            Ok(())
        }
        None => Err(I2oError::NotFound),
    }
}
