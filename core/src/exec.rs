//! The Executive OSM: controller bring-up, state transitions, and the
//! core's own reply handling.
//!
//! Bring-up walks each controller through
//! `Init -> Reset -> Hold -> Ready -> Operational`:
//!
//! 1. `activate_controller`: status query (with one reset-and-retry),
//!    forced reset for warm-started IOPs, outbound queue init, reply frame
//!    posting, HRT fetch. Ends in `Hold`.
//! 2. `boot_controllers`: builds the shared system table from every
//!    surviving controller, pushes it (`Hold -> Ready`), enables
//!    (`Ready -> Operational`), fetches the LCT, then arms the LCT refresh
//!    machinery and event delivery.
//!
//! Any step failing deletes that controller; there is no partial-success
//! state a consumer could observe. Sibling controllers are only touched
//! where a cross-controller step demands it: `reset` and `clear` quiesce
//! every peer first and re-enable them after, and a controller dropping out
//! of the online phase forces a system-table rebuild for the survivors.

extern crate alloc;

use alloc::vec::Vec;

use i2o_abi::{
    CMD_IOP_CLEAR, CMD_IOP_RESET, CMD_LCT_NOTIFY, CMD_OUTBOUND_INIT, CMD_STATUS_GET,
    CMD_SYS_ENABLE, CMD_SYS_QUIESCE, CMD_SYS_TAB_SET, CMD_UTIL_EVT_REGISTER, ClassMask,
    EVT_MASK_ALL, HandlerContext, I2oError, IopState, OUTBOUND_INIT_COMPLETE,
    OUTBOUND_INIT_FAILED, OUTBOUND_INIT_REJECTED, RESET_IN_PROGRESS, RESET_REJECTED,
    RS_TRANSACTION_ERROR, DS_UNKNOWN_ERROR, SGL_OFFSET_0, SGL_OFFSET_6, STATUS_BLOCK_WORDS,
    StatusBlock, SYSTAB_ENTRY_WORDS, SYSTAB_HEADER_WORDS, SYSTAB_VERSION, SysTabEntry, Tid,
    TransactionContext, cmd_name, detail_name, frame_cmd, frame_head, frame_route, reply_detail,
    reply_failed, reply_status, reply_status_name,
};
use i2o_lib::{clock, klog_debug, klog_error, klog_info, klog_warn};

use crate::controller::{
    Controller, delete_controller, find_controller, installed_units,
};
use crate::events;
use crate::handlers::{self, OsmHandler};
use crate::lct;
use crate::postwait;
use crate::transport;

/// Bound for the polled status-block fetch.
const STATUS_GET_TIMEOUT_MS: u64 = 5_000;
/// Bound for the polled outbound-queue init.
const OUTBOUND_INIT_TIMEOUT_MS: u64 = 5_000;
/// Bound for ordinary Executive round trips (HRT, systab, enable, ...).
const EXEC_TIMEOUT_MS: u64 = 15_000;
/// Bound for the IOP to come back readable after a reset.
const RESET_REBOOT_TIMEOUT_MS: u64 = 10_000;

/// The status block's final word doubles as a completion marker: the IOP
/// writes it last, the host polls it.
const STATUS_SYNC_WORD: usize = STATUS_BLOCK_WORDS - 1;

// =============================================================================
// The Exec-OSM itself
// =============================================================================

/// The core's own handler. Its context rides in every post-wait message and
/// in the fire-and-forget Executive requests (event registration, armed LCT
/// notify).
struct ExecOsm;

impl OsmHandler for ExecOsm {
    fn name(&self) -> &'static str {
        "i2o_core"
    }

    fn classes(&self) -> ClassMask {
        ClassMask::EXECUTIVE
    }

    /// Dispatch context. Post-wait completions never reach here (the
    /// transport routes them by token); what does is the asynchronous
    /// Executive traffic.
    fn on_reply(&self, ctrl: &Controller, msg: &[u32]) {
        match frame_cmd(msg[1]) {
            CMD_UTIL_EVT_REGISTER => events::queue_event(ctrl, msg),
            CMD_LCT_NOTIFY => lct::on_lct_notify_reply(ctrl),
            cmd => klog_debug!(
                "{}: unexpected {} reply to exec context",
                ctrl.name(),
                cmd_name(cmd)
            ),
        }
    }
}

static EXEC_OSM: ExecOsm = ExecOsm;
static EXEC_CTX: spin::Once<HandlerContext> = spin::Once::new();

/// Register the Exec-OSM; first caller wins, later calls are no-ops.
pub(crate) fn register_exec_handler() -> Result<HandlerContext, I2oError> {
    if let Some(ctx) = EXEC_CTX.get() {
        return Ok(*ctx);
    }
    let ctx = handlers::register_handler(&EXEC_OSM)?;
    Ok(*EXEC_CTX.call_once(|| ctx))
}

/// The Exec-OSM's handler context.
pub(crate) fn exec_context() -> Result<HandlerContext, I2oError> {
    EXEC_CTX.get().copied().ok_or(I2oError::NotInitialized)
}

// =============================================================================
// Reply decoding and failure reporting
// =============================================================================

/// Fold a reply into the post-wait result: the failure envelope and the
/// status byte both count, and the IOP's codes travel verbatim.
pub(crate) fn reply_result(msg: &[u32]) -> Result<(), I2oError> {
    if reply_failed(msg[0]) {
        return Err(I2oError::Reply {
            status: RS_TRANSACTION_ERROR,
            detail: DS_UNKNOWN_ERROR,
        });
    }
    let status = reply_status(msg[4]);
    if status == 0 {
        Ok(())
    } else {
        Err(I2oError::Reply {
            status,
            detail: reply_detail(msg[4]),
        })
    }
}

/// Log a decoded failure reply with the controller and command named.
pub(crate) fn report_reply_failure(ctrl: &Controller, msg: &[u32]) {
    klog_warn!(
        "{}: {} failed: {} / {}",
        ctrl.name(),
        cmd_name(frame_cmd(msg[1])),
        reply_status_name(reply_status(msg[4])),
        detail_name(reply_detail(msg[4]))
    );
}

// =============================================================================
// DMA-polled Executive commands
// =============================================================================

/// Fetch and cache the status block.
///
/// This must work before the outbound queue exists, so it cannot use the
/// reply path: the request names a DMA buffer, the IOP fills it ending with
/// the sync word, and the host polls.
pub fn status_get(ctrl: &Controller) -> Result<StatusBlock, I2oError> {
    let Some(addr) = ctrl.bus.alloc_dma(STATUS_BLOCK_WORDS) else {
        return Err(I2oError::NoMemory);
    };
    let result = status_get_into(ctrl, addr);
    ctrl.bus.free_dma(addr);

    if let Ok(sb) = &result {
        *ctrl.status_block.lock() = Some(*sb);
        ctrl.geometry.lock().inbound_frame_bytes =
            sb.inbound_frame_bytes.max(i2o_abi::MSG_FRAME_BYTES as u16);
    }
    result
}

fn status_get_into(ctrl: &Controller, addr: u32) -> Result<StatusBlock, I2oError> {
    let zeroes = [0u32; STATUS_BLOCK_WORDS];
    ctrl.bus.write_dma(addr, &zeroes);

    let msg = [
        frame_head(9, SGL_OFFSET_0),
        frame_route(CMD_STATUS_GET, Tid::HOST, Tid::IOP),
        TransactionContext::FireAndForget {
            handler: exec_context()?,
        }
        .encode(),
        0,
        0,
        0,
        addr,
        STATUS_BLOCK_WORDS as u32,
        0,
    ];
    transport::post_message(ctrl, &msg)?;

    let deadline = clock::deadline_ms(STATUS_GET_TIMEOUT_MS);
    let mut block = [0u32; STATUS_BLOCK_WORDS];
    loop {
        ctrl.bus.read_dma(addr, &mut block);
        if block[STATUS_SYNC_WORD] != 0 {
            break;
        }
        if clock::expired(deadline) {
            klog_warn!("{}: status block never arrived", ctrl.name());
            return Err(I2oError::Timeout);
        }
        core::hint::spin_loop();
    }

    let Some(sb) = StatusBlock::parse(&block) else {
        klog_warn!("{}: unparseable status block", ctrl.name());
        return Err(I2oError::InvalidState);
    };
    klog_debug!(
        "{}: status: state {}, frames {}x{}B, lct hint {}B",
        ctrl.name(),
        sb.iop_state,
        sb.max_inbound_frames,
        sb.inbound_frame_bytes,
        sb.expected_lct_bytes
    );
    Ok(sb)
}

/// Initialize the outbound (reply) queue, then hand the IOP its pool of
/// reply frames.
fn init_outbound_queue(ctrl: &Controller) -> Result<(), I2oError> {
    let Some(status_addr) = ctrl.bus.alloc_dma(1) else {
        return Err(I2oError::NoMemory);
    };
    let result = init_outbound_inner(ctrl, status_addr);
    ctrl.bus.free_dma(status_addr);
    result?;
    post_outbound_frames(ctrl)
}

fn init_outbound_inner(ctrl: &Controller, status_addr: u32) -> Result<(), I2oError> {
    ctrl.bus.write_dma(status_addr, &[0]);

    let geometry = *ctrl.geometry.lock();
    let msg = [
        frame_head(8, SGL_OFFSET_6),
        frame_route(CMD_OUTBOUND_INIT, Tid::HOST, Tid::IOP),
        TransactionContext::FireAndForget {
            handler: exec_context()?,
        }
        .encode(),
        0,
        geometry.outbound_frame_bytes as u32,
        geometry.outbound_frames,
        status_addr,
        1,
    ];
    transport::post_message(ctrl, &msg)?;

    let deadline = clock::deadline_ms(OUTBOUND_INIT_TIMEOUT_MS);
    let mut word = [0u32; 1];
    loop {
        ctrl.bus.read_dma(status_addr, &mut word);
        match word[0] {
            OUTBOUND_INIT_COMPLETE => return Ok(()),
            OUTBOUND_INIT_REJECTED | OUTBOUND_INIT_FAILED => {
                klog_error!(
                    "{}: outbound queue init refused ({:#x})",
                    ctrl.name(),
                    word[0]
                );
                return Err(I2oError::InvalidState);
            }
            _ => {}
        }
        if clock::expired(deadline) {
            klog_error!("{}: outbound queue init timed out", ctrl.name());
            return Err(I2oError::Timeout);
        }
        core::hint::spin_loop();
    }
}

/// Give every reply frame to the IOP's outbound free pool.
fn post_outbound_frames(ctrl: &Controller) -> Result<(), I2oError> {
    let geometry = *ctrl.geometry.lock();
    let frame_words = (geometry.outbound_frame_bytes as usize) / 4;
    for _ in 0..geometry.outbound_frames {
        let Some(frame) = ctrl.bus.alloc_dma(frame_words) else {
            klog_error!("{}: out of frame memory", ctrl.name());
            return Err(I2oError::NoMemory);
        };
        ctrl.outbound_pool.lock().push(frame);
        ctrl.bus.write_outbound(frame);
    }
    klog_debug!(
        "{}: posted {} outbound frames",
        ctrl.name(),
        geometry.outbound_frames
    );
    Ok(())
}

/// Fetch the hardware resource table (two passes if the first window was
/// too small) and log the adapters it describes.
fn hrt_get(ctrl: &Controller) -> Result<(), I2oError> {
    let mut words = 64usize;

    for _ in 0..2 {
        let Some(addr) = ctrl.bus.alloc_dma(words) else {
            return Err(I2oError::NoMemory);
        };
        let mut msg = [
            frame_head(8, SGL_OFFSET_6),
            frame_route(i2o_abi::CMD_HRT_GET, Tid::HOST, Tid::IOP),
            0,
            0,
            0,
            0,
            addr,
            words as u32,
        ];
        let posted = postwait::post_and_wait(ctrl, &mut msg, EXEC_TIMEOUT_MS);
        if let Err(e) = posted {
            ctrl.bus.free_dma(addr);
            return Err(e);
        }

        let mut raw = alloc::vec![0u32; words];
        ctrl.bus.read_dma(addr, &mut raw);
        ctrl.bus.free_dma(addr);

        let count = i2o_abi::hrt_entry_count(&raw);
        let entry_words = i2o_abi::hrt_entry_words(&raw).max(1);
        let needed = i2o_abi::HRT_HEADER_WORDS + count * entry_words;
        if needed > words {
            klog_debug!("{}: HRT needs {} words, retrying", ctrl.name(), needed);
            words = needed;
            continue;
        }

        for i in 0..count {
            let off = i2o_abi::HRT_HEADER_WORDS + i * entry_words;
            if let Some(e) = i2o_abi::HrtEntry::parse(&raw[off..]) {
                klog_debug!(
                    "{}: hrt adapter {:#010x} bus {} type {} {}",
                    ctrl.name(),
                    e.adapter_id,
                    e.bus_number,
                    e.bus_type,
                    e.controlling_tid
                );
            }
        }
        *ctrl.hrt.lock() = raw;
        return Ok(());
    }
    Err(I2oError::NoSpace)
}

// =============================================================================
// State transitions
// =============================================================================

/// `Ready -> Operational`. Rejected from any other state.
pub fn enable_controller(ctrl: &Controller) -> Result<(), I2oError> {
    if ctrl.current_state() != IopState::Ready {
        klog_warn!(
            "{}: enable not legal from {}",
            ctrl.name(),
            ctrl.current_state()
        );
        return Err(I2oError::InvalidState);
    }
    let mut msg = [
        frame_head(4, SGL_OFFSET_0),
        frame_route(CMD_SYS_ENABLE, Tid::HOST, Tid::IOP),
        0,
        0,
    ];
    postwait::post_and_wait(ctrl, &mut msg, EXEC_TIMEOUT_MS)?;
    ctrl.set_state(IopState::Operational);
    Ok(())
}

/// Suspend external operations (`Ready`/`Operational` -> `Ready`). The IOP
/// keeps servicing internal ones, so a quiesced controller still answers
/// Executive commands.
pub fn quiesce_controller(ctrl: &Controller) -> Result<(), I2oError> {
    match ctrl.current_state() {
        IopState::Ready | IopState::Operational => {}
        state => {
            klog_warn!("{}: quiesce not legal from {}", ctrl.name(), state);
            return Err(I2oError::InvalidState);
        }
    }
    let mut msg = [
        frame_head(4, SGL_OFFSET_0),
        frame_route(CMD_SYS_QUIESCE, Tid::HOST, Tid::IOP),
        0,
        0,
    ];
    postwait::post_and_wait(ctrl, &mut msg, EXEC_TIMEOUT_MS)?;
    ctrl.set_state(IopState::Ready);
    Ok(())
}

/// Quiesce every *other* Ready/Operational controller, returning the units
/// actually quiesced so the caller can bring exactly those back.
fn quiesce_peers(except: u8) -> Vec<u8> {
    let mut quiesced = Vec::new();
    for unit in installed_units() {
        if unit == except {
            continue;
        }
        let Some(peer) = find_controller(unit) else {
            continue;
        };
        if matches!(
            peer.current_state(),
            IopState::Ready | IopState::Operational
        ) {
            match quiesce_controller(&peer) {
                Ok(()) => quiesced.push(unit),
                Err(e) => klog_warn!("{}: peer quiesce failed: {}", peer.name(), e),
            }
        }
    }
    quiesced
}

fn reenable_peers(units: &[u8]) {
    for unit in units {
        let Some(peer) = find_controller(*unit) else {
            continue;
        };
        if let Err(e) = enable_controller(&peer) {
            klog_warn!("{}: peer re-enable failed: {}", peer.name(), e);
        }
    }
}

/// Soft clear (-> `Hold`): flush outstanding work without rebooting the
/// IOP. Peers are quiesced around it so nobody is mid-transaction with a
/// controller being cleared.
pub fn clear_controller(ctrl: &Controller) -> Result<(), I2oError> {
    let peers = quiesce_peers(ctrl.unit());
    let result = clear_inner(ctrl);
    reenable_peers(&peers);
    result
}

fn clear_inner(ctrl: &Controller) -> Result<(), I2oError> {
    let mut msg = [
        frame_head(4, SGL_OFFSET_0),
        frame_route(CMD_IOP_CLEAR, Tid::HOST, Tid::IOP),
        0,
        0,
    ];
    postwait::post_and_wait(ctrl, &mut msg, EXEC_TIMEOUT_MS)?;
    ctrl.set_state(IopState::Hold);
    status_get(ctrl).map(|_| ())
}

/// Hard reset (-> `Reset`, full LCT rebuild expected afterwards).
///
/// The IOP either acknowledges and reboots (detected by its inbound FIFO
/// handing out frames again) or rejects the reset, in which case the
/// fallback is a clear. Peer bracketing as for `clear`.
pub fn reset_controller(ctrl: &Controller) -> Result<(), I2oError> {
    let peers = quiesce_peers(ctrl.unit());
    let result = reset_inner(ctrl);
    reenable_peers(&peers);
    result
}

fn reset_inner(ctrl: &Controller) -> Result<(), I2oError> {
    let Some(status_addr) = ctrl.bus.alloc_dma(1) else {
        return Err(I2oError::NoMemory);
    };
    let result = reset_posted(ctrl, status_addr);
    ctrl.bus.free_dma(status_addr);
    result
}

fn reset_posted(ctrl: &Controller, status_addr: u32) -> Result<(), I2oError> {
    ctrl.bus.write_dma(status_addr, &[0]);

    let msg = [
        frame_head(8, SGL_OFFSET_0),
        frame_route(CMD_IOP_RESET, Tid::HOST, Tid::IOP),
        TransactionContext::FireAndForget {
            handler: exec_context()?,
        }
        .encode(),
        0,
        0,
        0,
        status_addr,
        1,
    ];
    transport::post_message(ctrl, &msg)?;

    // Wait for the IOP's verdict on the reset itself.
    let deadline = clock::deadline_ms(RESET_REBOOT_TIMEOUT_MS);
    let mut word = [0u32; 1];
    loop {
        ctrl.bus.read_dma(status_addr, &mut word);
        match word[0] {
            RESET_IN_PROGRESS => break,
            RESET_REJECTED => {
                klog_info!("{}: reset rejected, falling back to clear", ctrl.name());
                return clear_inner(ctrl);
            }
            _ => {}
        }
        if clock::expired(deadline) {
            klog_error!("{}: reset never acknowledged", ctrl.name());
            return Err(I2oError::Timeout);
        }
        core::hint::spin_loop();
    }

    // The IOP is rebooting. It is back when the inbound FIFO hands out
    // frames again; the probe frame is part of the pool the IOP has just
    // reinitialized, so taking one costs nothing.
    transport::acquire_inbound_slot(ctrl, RESET_REBOOT_TIMEOUT_MS)?;
    ctrl.set_state(IopState::Reset);
    status_get(ctrl).map(|_| ())
}

// =============================================================================
// Activation and online
// =============================================================================

/// Drive a freshly installed controller to `Hold`: status, reset if needed,
/// outbound queue, reply frames, HRT. On any failure the controller is
/// deleted: a controller that cannot be brought up does not exist as far
/// as consumers are concerned.
pub fn activate_controller(unit: u8) -> Result<(), I2oError> {
    let Some(ctrl) = find_controller(unit) else {
        return Err(I2oError::NotFound);
    };
    let result = try_activate(&ctrl);
    drop(ctrl);

    if let Err(e) = &result {
        klog_error!("iop{}: activation failed: {}", unit, e);
        if let Err(del) = delete_controller(unit) {
            klog_error!("iop{}: cleanup after failed activation: {}", unit, del);
        }
    }
    result
}

fn try_activate(ctrl: &Controller) -> Result<(), I2oError> {
    let sb = match status_get(ctrl) {
        Ok(sb) => sb,
        Err(e) => {
            klog_warn!("{}: status query failed ({}), resetting", ctrl.name(), e);
            reset_controller(ctrl)?;
            status_get(ctrl)?
        }
    };

    if sb.iop_state == IopState::Faulted {
        klog_error!("{}: hardware fault reported, giving up", ctrl.name());
        return Err(I2oError::InvalidState);
    }

    // A warm-started IOP kept running across our boot; its queues point at
    // frames we no longer own, so force it through a reset first.
    if sb.iop_state.is_warm() {
        klog_info!("{}: warm start detected ({}), resetting", ctrl.name(), sb.iop_state);
        reset_controller(ctrl)?;
        status_get(ctrl)?;
    }

    init_outbound_queue(ctrl)?;
    hrt_get(ctrl)?;
    ctrl.set_state(IopState::Hold);
    Ok(())
}

/// Build the shared system table row set. A controller whose status query
/// fails here is deleted on the spot, not merely left out of the table.
fn build_sys_table() -> Vec<u32> {
    let mut rows: Vec<SysTabEntry> = Vec::new();

    for unit in installed_units() {
        let Some(ctrl) = find_controller(unit) else {
            continue;
        };
        match status_get(&ctrl) {
            Ok(sb) => rows.push(SysTabEntry {
                org_id: sb.org_id,
                iop_id: sb.iop_id,
                segment: sb.segment,
                i2o_version: sb.i2o_version,
                iop_state: sb.iop_state,
                frame_bytes: sb.inbound_frame_bytes,
                last_changed: 0,
                capabilities: sb.capabilities,
                inbound_port: ctrl.bus.inbound_port_address(),
            }),
            Err(e) => {
                klog_error!("{}: dropped while building system table: {}", ctrl.name(), e);
                drop(ctrl);
                if let Err(del) = delete_controller(unit) {
                    klog_error!("iop{}: cleanup during table build: {}", unit, del);
                }
            }
        }
    }

    let mut words =
        alloc::vec![0u32; SYSTAB_HEADER_WORDS + rows.len() * SYSTAB_ENTRY_WORDS];
    words[0] = rows.len() as u32 | (SYSTAB_VERSION << 16);
    words[1] = 0; // change indicator
    for (i, row) in rows.iter().enumerate() {
        let off = SYSTAB_HEADER_WORDS + i * SYSTAB_ENTRY_WORDS;
        row.write(&mut words[off..off + SYSTAB_ENTRY_WORDS]);
    }
    words
}

/// Push the shared table to one controller (`Hold -> Ready`).
fn systab_send(ctrl: &Controller, table: &[u32]) -> Result<(), I2oError> {
    let Some(addr) = ctrl.bus.alloc_dma(table.len()) else {
        return Err(I2oError::NoMemory);
    };
    ctrl.bus.write_dma(addr, table);

    let mut msg = [
        frame_head(10, SGL_OFFSET_6),
        frame_route(CMD_SYS_TAB_SET, Tid::HOST, Tid::IOP),
        0,
        0,
        ctrl.unit() as u32, // host unit id
        0,                  // segment
        addr,
        table.len() as u32,
        0, // private memory base
        0, // private memory size
    ];
    let result = postwait::post_and_wait(ctrl, &mut msg, EXEC_TIMEOUT_MS);
    ctrl.bus.free_dma(addr);
    result?;
    ctrl.set_state(IopState::Ready);
    Ok(())
}

/// Take one controller from `Hold` to `Operational` with a populated
/// device registry.
fn online_one(ctrl: &Controller, table: &[u32]) -> Result<(), I2oError> {
    systab_send(ctrl, table)?;
    enable_controller(ctrl)?;
    lct::lct_fetch(ctrl)
}

/// Arm the IOP to report every Executive-class event.
fn event_register(ctrl: &Controller) -> Result<(), I2oError> {
    let msg = [
        frame_head(5, SGL_OFFSET_0),
        frame_route(CMD_UTIL_EVT_REGISTER, Tid::HOST, Tid::IOP),
        TransactionContext::FireAndForget {
            handler: exec_context()?,
        }
        .encode(),
        0,
        EVT_MASK_ALL,
    ];
    transport::post_message(ctrl, &msg)?;
    ctrl.event_registered
        .store(true, core::sync::atomic::Ordering::Release);
    Ok(())
}

/// Bring every installed controller online.
///
/// Activation failures remove the controller and do not disturb siblings.
/// The online phase is collective: if any controller fails it, the roster
/// changed, so the system table is rebuilt and the phase restarts for the
/// survivors. Returns the number of operational controllers.
pub fn boot_controllers() -> usize {
    for unit in installed_units() {
        // Failures log and delete the controller themselves.
        let _ = activate_controller(unit);
    }

    'rebuild: loop {
        let table = build_sys_table();
        if table.len() <= SYSTAB_HEADER_WORDS {
            break;
        }

        for unit in installed_units() {
            let Some(ctrl) = find_controller(unit) else {
                continue;
            };
            if ctrl.current_state() == IopState::Operational {
                continue;
            }
            if let Err(e) = online_one(&ctrl, &table) {
                klog_error!("{}: failed to come online: {}", ctrl.name(), e);
                drop(ctrl);
                if let Err(del) = delete_controller(unit) {
                    klog_error!("iop{}: cleanup after online failure: {}", unit, del);
                }
                continue 'rebuild;
            }
        }
        break;
    }

    // Survivors are operational: arm the asynchronous machinery. The
    // working LCT already carries the fetched table, which seeds the
    // change indicator for the renotify cycle.
    let mut online = 0;
    for unit in installed_units() {
        let Some(ctrl) = find_controller(unit) else {
            continue;
        };
        online += 1;
        lct::spawn_refresh_thread(&ctrl);
        if let Err(e) = lct::send_lct_notify(&ctrl) {
            klog_warn!("{}: could not arm LCT notify: {}", ctrl.name(), e);
        }
        if let Err(e) = event_register(&ctrl) {
            klog_warn!("{}: could not register for events: {}", ctrl.name(), e);
        }
    }
    klog_info!("i2o: {} controller(s) operational", online);
    online
}

/// System shutdown: tell the handlers, then quiesce every controller.
pub fn system_shutdown() {
    handlers::notify_reboot();
    for unit in installed_units() {
        let Some(ctrl) = find_controller(unit) else {
            continue;
        };
        if matches!(
            ctrl.current_state(),
            IopState::Ready | IopState::Operational
        ) && let Err(e) = quiesce_controller(&ctrl)
        {
            klog_warn!("{}: shutdown quiesce failed: {}", ctrl.name(), e);
        }
    }
    events::terminate_event_thread();
}
