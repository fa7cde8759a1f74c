//! Shared fixtures for the built-in suites: a scripted in-memory IOP and a
//! deterministic fake runtime.
//!
//! The [`MockBus`] implements [`BusOps`] over plain maps: frames and DMA
//! windows are vectors keyed by fake bus address, and `write_inbound` runs
//! a small IOP model that answers the Executive protocol the way real
//! firmware would: status blocks by DMA with the sync word last, polled
//! outbound-queue init, post-wait replies through host-posted reply
//! frames, armed LCT notifies, and unsolicited event replies.
//!
//! The fake runtime auto-advances its clock on every read (so every
//! deadline in the core expires deterministically) and pumps `run_queue`
//! whenever a task would block (standing in for reply interrupt delivery).
//! Thread spawns are recorded, not run: the suites drive the thread pass
//! functions directly.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use i2o_abi::{
    CLAIM_PRIMARY, CMD_HRT_GET, CMD_IOP_CLEAR, CMD_IOP_RESET, CMD_LCT_NOTIFY, CMD_OUTBOUND_INIT,
    CMD_STATUS_GET, CMD_SYS_ENABLE, CMD_SYS_QUIESCE, CMD_SYS_TAB_SET, CMD_UTIL_CLAIM,
    CMD_UTIL_CLAIM_RELEASE, CMD_UTIL_EVT_REGISTER, CMD_UTIL_PARAMS_GET, CMD_UTIL_PARAMS_SET,
    ClassMask, DS_DEVICE_LOCKED, DeviceClass, EMPTY_QUEUE, HRT_HEADER_WORDS, HandlerContext,
    IopState, LCT_ENTRY_WORDS, LCT_HEADER_WORDS, LctEntry, MSG_FRAME_BYTES, MSG_FRAME_WORDS,
    OUTBOUND_INIT_COMPLETE, RESET_IN_PROGRESS, RESET_REJECTED, RS_ERROR_NO_DATA_TRANSFER,
    STATUS_BLOCK_WORDS, StatusBlock, Tid, frame_cmd, frame_head, frame_route,
};
use i2o_lib::runtime::{RuntimeServices, TaskHandle, ThreadEntry};
use i2o_lib::{IrqMutex, register_runtime_services};

use crate::controller::{BusOps, Controller, find_controller, installed_units};
use crate::events;
use crate::transport;

/// Global operation sequence, shared by every mock, so suites can assert
/// cross-controller ordering (peer quiesce before reset, re-enable after).
static OP_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    OP_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// One command the mock IOP saw, with its global sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeenCmd {
    pub seq: u64,
    pub cmd: u8,
}

struct MockInner {
    mem: BTreeMap<u32, Vec<u32>>,
    next_addr: u32,
    inbound_free: VecDeque<u32>,
    outbound_free: Vec<u32>,
    outbound_ready: VecDeque<u32>,

    iop_state: IopState,
    lct_words: Vec<u32>,
    change_indicator: u32,
    /// Armed `ExecLctNotify`: (window addr, window words, initiator ctx).
    armed_notify: Option<(u32, u32, u32)>,
    /// Initiator context of the event registration, for unsolicited events.
    event_ctx: Option<u32>,

    /// Scripted params result payload.
    params_payload: Vec<u32>,
    /// TIDs whose claim the IOP refuses.
    fail_claims: Vec<u16>,
    /// TIDs whose release the IOP refuses.
    fail_releases: Vec<u16>,

    /// Swallow every posted message without acting (dead IOP).
    silent: bool,
    /// Report the inbound FIFO permanently empty.
    starve_inbound: bool,
    /// Answer `ExecIopReset` with a rejection.
    reject_reset: bool,
    /// Fail `ExecStatusGet` by never writing the block.
    mute_status: bool,

    seen: Vec<SeenCmd>,
    replies_dropped: u32,
}

const MOCK_INBOUND_FRAMES: usize = 4;

impl MockInner {
    fn new() -> Self {
        let mut inner = Self {
            mem: BTreeMap::new(),
            next_addr: 0x1000,
            inbound_free: VecDeque::new(),
            outbound_free: Vec::new(),
            outbound_ready: VecDeque::new(),
            iop_state: IopState::Reset,
            lct_words: Vec::new(),
            change_indicator: 1,
            armed_notify: None,
            event_ctx: None,
            params_payload: Vec::new(),
            fail_claims: Vec::new(),
            fail_releases: Vec::new(),
            silent: false,
            starve_inbound: false,
            reject_reset: false,
            mute_status: false,
            seen: Vec::new(),
            replies_dropped: 0,
        };
        for _ in 0..MOCK_INBOUND_FRAMES {
            let addr = inner.alloc(MSG_FRAME_WORDS);
            inner.inbound_free.push_back(addr);
        }
        inner.set_lct(&[]);
        inner
    }

    fn alloc(&mut self, words: usize) -> u32 {
        let addr = self.next_addr;
        self.next_addr += ((words.max(1) as u32) * 4).next_multiple_of(0x100);
        self.mem.insert(addr, alloc::vec![0u32; words.max(1)]);
        addr
    }

    fn set_lct(&mut self, entries: &[LctEntry]) {
        let words = LCT_HEADER_WORDS + entries.len() * LCT_ENTRY_WORDS;
        let mut table = alloc::vec![0u32; words];
        table[0] = words as u32;
        table[1] = 1; // LCT version
        table[2] = self.change_indicator;
        for (i, e) in entries.iter().enumerate() {
            let off = LCT_HEADER_WORDS + i * LCT_ENTRY_WORDS;
            e.write(&mut table[off..off + LCT_ENTRY_WORDS]);
        }
        self.lct_words = table;
    }

    fn write_mem(&mut self, addr: u32, words: &[u32]) {
        if let Some(buf) = self.mem.get_mut(&addr) {
            let n = words.len().min(buf.len());
            buf[..n].copy_from_slice(&words[..n]);
        }
    }

    fn read_mem(&self, addr: u32, out: &mut [u32]) {
        if let Some(buf) = self.mem.get(&addr) {
            let n = out.len().min(buf.len());
            out[..n].copy_from_slice(&buf[..n]);
            out[n..].fill(0);
        } else {
            out.fill(0);
        }
    }

    fn status_block(&self) -> StatusBlock {
        StatusBlock {
            org_id: 0x0001,
            iop_id: 0x042,
            host_unit_id: 0,
            segment: 0,
            i2o_version: 2,
            iop_state: self.iop_state,
            inbound_frame_bytes: MSG_FRAME_BYTES as u16,
            max_inbound_frames: MOCK_INBOUND_FRAMES as u32,
            cur_inbound_frames: MOCK_INBOUND_FRAMES as u32,
            max_outbound_frames: 128,
            cur_outbound_frames: 128,
            expected_lct_bytes: (self.lct_words.len() * 4) as u32,
            capabilities: 0,
        }
    }

    /// Craft a reply into a host-posted outbound frame.
    fn push_reply(&mut self, cmd: u8, ctx: u32, txn: u32, status: u8, detail: u16, extra: &[u32]) {
        let Some(frame) = self.outbound_free.pop() else {
            self.replies_dropped += 1;
            return;
        };
        let mut words = alloc::vec![0u32; MSG_FRAME_WORDS];
        words[0] = frame_head(5 + extra.len() as u32, 0);
        words[1] = frame_route(cmd, Tid::IOP, Tid::HOST);
        words[2] = ctx;
        words[3] = txn;
        words[4] = ((status as u32) << 24) | detail as u32;
        let n = extra.len().min(MSG_FRAME_WORDS - 5);
        words[5..5 + n].copy_from_slice(&extra[..n]);
        self.write_mem(frame, &words);
        self.outbound_ready.push_back(frame);
    }

    /// The IOP model: act on one posted request frame.
    fn handle_message(&mut self, msg: &[u32]) {
        let cmd = frame_cmd(msg[1]);
        let ctx = msg[2];
        let txn = msg[3];
        self.seen.push(SeenCmd {
            seq: next_seq(),
            cmd,
        });
        if self.silent {
            return;
        }

        match cmd {
            CMD_STATUS_GET => {
                if self.mute_status {
                    return;
                }
                let addr = msg[6];
                let mut block = [0u32; STATUS_BLOCK_WORDS];
                self.status_block().write(&mut block);
                block[STATUS_BLOCK_WORDS - 1] = 0xFFFF_FFFF; // sync marker
                self.write_mem(addr, &block);
            }
            CMD_OUTBOUND_INIT => {
                self.write_mem(msg[6], &[OUTBOUND_INIT_COMPLETE]);
            }
            CMD_HRT_GET => {
                let mut hrt = [0u32; HRT_HEADER_WORDS + 3];
                hrt[0] = 1 | (3 << 16); // one 3-word entry
                hrt[2] = 0x1234_0001; // adapter id
                hrt[3] = Tid::IOP.raw() as u32;
                hrt[4] = 0x0001; // bus 1, type 0 (local)
                self.write_mem(msg[6], &hrt);
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            CMD_SYS_TAB_SET => {
                self.iop_state = IopState::Ready;
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            CMD_SYS_ENABLE => {
                self.iop_state = IopState::Operational;
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            CMD_SYS_QUIESCE => {
                self.iop_state = IopState::Ready;
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            CMD_IOP_CLEAR => {
                self.iop_state = IopState::Hold;
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            CMD_IOP_RESET => {
                if self.reject_reset {
                    self.write_mem(msg[6], &[RESET_REJECTED]);
                } else {
                    self.iop_state = IopState::Reset;
                    self.armed_notify = None;
                    self.event_ctx = None;
                    self.write_mem(msg[6], &[RESET_IN_PROGRESS]);
                }
            }
            CMD_LCT_NOTIFY => {
                let indicator = msg[5];
                let (addr, words) = (msg[6], msg[7]);
                if indicator == 0 || indicator != self.change_indicator {
                    let table = self.lct_words.clone();
                    self.write_mem(addr, &table);
                    self.push_reply(cmd, ctx, txn, 0, 0, &[]);
                } else {
                    self.armed_notify = Some((addr, words, ctx));
                }
            }
            CMD_UTIL_EVT_REGISTER => {
                self.event_ctx = Some(ctx);
            }
            CMD_UTIL_CLAIM => {
                let tid = (msg[1] & Tid::MASK) as u16;
                if msg[4] == CLAIM_PRIMARY && !self.fail_claims.contains(&tid) {
                    self.push_reply(cmd, ctx, txn, 0, 0, &[]);
                } else {
                    self.push_reply(
                        cmd,
                        ctx,
                        txn,
                        RS_ERROR_NO_DATA_TRANSFER,
                        DS_DEVICE_LOCKED,
                        &[],
                    );
                }
            }
            CMD_UTIL_CLAIM_RELEASE => {
                let tid = (msg[1] & Tid::MASK) as u16;
                if self.fail_releases.contains(&tid) {
                    self.push_reply(
                        cmd,
                        ctx,
                        txn,
                        RS_ERROR_NO_DATA_TRANSFER,
                        DS_DEVICE_LOCKED,
                        &[],
                    );
                } else {
                    self.push_reply(cmd, ctx, txn, 0, 0, &[]);
                }
            }
            CMD_UTIL_PARAMS_GET | CMD_UTIL_PARAMS_SET => {
                let res_addr = msg[7];
                let payload = self.params_payload.clone();
                let mut block = Vec::with_capacity(2 + payload.len());
                block.push(1); // one result
                block.push(1 + payload.len() as u32); // block words, status 0
                block.extend_from_slice(&payload);
                self.write_mem(res_addr, &block);
                self.push_reply(cmd, ctx, txn, 0, 0, &[]);
            }
            _ => {
                self.push_reply(cmd, ctx, txn, RS_ERROR_NO_DATA_TRANSFER, 0, &[]);
            }
        }
    }
}

/// Cheap-to-clone handle on one mock IOP. The controller's `BusOps` box and
/// the suite share the same state.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<IrqMutex<MockInner>>,
    destroyed: Arc<AtomicBool>,
    disabled: Arc<AtomicBool>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(IrqMutex::new(MockInner::new())),
            destroyed: Arc::new(AtomicBool::new(false)),
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    // -- scripting ---------------------------------------------------------

    pub fn set_iop_state(&self, state: IopState) {
        self.inner.lock().iop_state = state;
    }

    pub fn script_lct(&self, entries: &[LctEntry]) {
        self.inner.lock().set_lct(entries);
    }

    pub fn script_params(&self, payload: &[u32]) {
        self.inner.lock().params_payload = payload.to_vec();
    }

    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    pub fn set_starve_inbound(&self, starve: bool) {
        self.inner.lock().starve_inbound = starve;
    }

    pub fn set_reject_reset(&self, reject: bool) {
        self.inner.lock().reject_reset = reject;
    }

    pub fn set_mute_status(&self, mute: bool) {
        self.inner.lock().mute_status = mute;
    }

    pub fn fail_claim(&self, tid: Tid) {
        self.inner.lock().fail_claims.push(tid.raw());
    }

    pub fn fail_release(&self, tid: Tid) {
        self.inner.lock().fail_releases.push(tid.raw());
    }

    /// Simulate an LCT change: update the scripted table and, if an armed
    /// notify is pending, answer it.
    pub fn push_lct_change(&self, entries: &[LctEntry]) {
        let mut inner = self.inner.lock();
        inner.change_indicator += 1;
        inner.set_lct(entries);
        if let Some((addr, _words, ctx)) = inner.armed_notify.take() {
            let table = inner.lct_words.clone();
            inner.write_mem(addr, &table);
            inner.push_reply(CMD_LCT_NOTIFY, ctx, 0, 0, 0, &[]);
        }
    }

    /// Inject a raw reply with an arbitrary context word, for dispatch
    /// tests. Needs a host-posted reply frame to carry it.
    pub fn inject_reply(&self, cmd: u8, ctx: u32) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.replies_dropped;
        inner.push_reply(cmd, ctx, 0, 0, 0, &[]);
        inner.replies_dropped == before
    }

    /// Simulate an unsolicited event notification.
    pub fn push_event(&self, indicator: u32, payload: &[u32]) -> bool {
        let mut inner = self.inner.lock();
        let Some(ctx) = inner.event_ctx else {
            return false;
        };
        let mut extra = Vec::with_capacity(payload.len());
        extra.extend_from_slice(payload);
        // Event replies carry the indicator where a status word would sit.
        let Some(frame) = inner.outbound_free.pop() else {
            inner.replies_dropped += 1;
            return false;
        };
        let mut words = alloc::vec![0u32; MSG_FRAME_WORDS];
        words[0] = frame_head(5 + extra.len() as u32, 0);
        words[1] = frame_route(CMD_UTIL_EVT_REGISTER, Tid::IOP, Tid::HOST);
        words[2] = ctx;
        words[4] = indicator;
        let n = extra.len().min(MSG_FRAME_WORDS - 5);
        words[5..5 + n].copy_from_slice(&extra[..n]);
        inner.write_mem(frame, &words);
        inner.outbound_ready.push_back(frame);
        true
    }

    // -- observation -------------------------------------------------------

    pub fn seen_cmds(&self) -> Vec<SeenCmd> {
        self.inner.lock().seen.clone()
    }

    /// Sequence number of the first time `cmd` was seen, if ever.
    pub fn first_seen(&self, cmd: u8) -> Option<u64> {
        self.inner
            .lock()
            .seen
            .iter()
            .find(|s| s.cmd == cmd)
            .map(|s| s.seq)
    }

    /// Sequence number of the last time `cmd` was seen, if ever.
    pub fn last_seen(&self, cmd: u8) -> Option<u64> {
        self.inner
            .lock()
            .seen
            .iter()
            .rev()
            .find(|s| s.cmd == cmd)
            .map(|s| s.seq)
    }

    pub fn armed_notify_pending(&self) -> bool {
        self.inner.lock().armed_notify.is_some()
    }

    pub fn event_registered(&self) -> bool {
        self.inner.lock().event_ctx.is_some()
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn was_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusOps for MockBus {
    fn read_inbound(&self) -> u32 {
        let mut inner = self.inner.lock();
        if inner.starve_inbound {
            return EMPTY_QUEUE;
        }
        inner.inbound_free.pop_front().unwrap_or(EMPTY_QUEUE)
    }

    fn write_inbound(&self, frame: u32) {
        let mut msg = [0u32; MSG_FRAME_WORDS];
        let mut inner = self.inner.lock();
        inner.read_mem(frame, &mut msg);
        inner.handle_message(&msg);
        inner.inbound_free.push_back(frame);
    }

    fn read_outbound(&self) -> u32 {
        self.inner
            .lock()
            .outbound_ready
            .pop_front()
            .unwrap_or(EMPTY_QUEUE)
    }

    fn write_outbound(&self, frame: u32) {
        self.inner.lock().outbound_free.push(frame);
    }

    fn read_frame(&self, addr: u32, out: &mut [u32]) {
        self.inner.lock().read_mem(addr, out);
    }

    fn write_frame(&self, addr: u32, words: &[u32]) {
        self.inner.lock().write_mem(addr, words);
    }

    fn alloc_dma(&self, words: usize) -> Option<u32> {
        Some(self.inner.lock().alloc(words))
    }

    fn free_dma(&self, addr: u32) {
        self.inner.lock().mem.remove(&addr);
    }

    fn read_dma(&self, addr: u32, out: &mut [u32]) {
        self.inner.lock().read_mem(addr, out);
    }

    fn write_dma(&self, addr: u32, words: &[u32]) {
        self.inner.lock().write_mem(addr, words);
    }

    fn inbound_port_address(&self) -> u64 {
        0x9000_0000
    }

    fn destroy(&self, _ctrl: &Controller) {
        self.destroyed.store(true, Ordering::Release);
    }

    fn bus_disable(&self, _ctrl: &Controller) {
        self.disabled.store(true, Ordering::Release);
    }
}

// =============================================================================
// Fake runtime
// =============================================================================

/// Nanoseconds added to the fake clock per read; every bounded poll in the
/// core therefore converges without wall time passing.
const CLOCK_STEP_NS: u64 = 100_000;

static FAKE_NOW_NS: AtomicU64 = AtomicU64::new(1_000_000);
static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

/// One recorded (not executed) thread spawn.
#[derive(Clone, Copy)]
pub struct SpawnRecord {
    pub name: &'static str,
    pub entry: ThreadEntry,
    pub arg: usize,
}

static SPAWNS: IrqMutex<Vec<SpawnRecord>> = IrqMutex::new(Vec::new());

fn fake_clock_monotonic_ns() -> u64 {
    FAKE_NOW_NS.fetch_add(CLOCK_STEP_NS, Ordering::Relaxed)
}

fn fake_current_task() -> TaskHandle {
    // Any stable non-null value: the suites have exactly one "task".
    0x1000 as TaskHandle
}

/// Blocking stands in for waiting on the reply interrupt: drain every
/// controller's outbound queue, which is what the interrupt would do.
fn fake_block_current_task() {
    pump();
}

fn fake_unblock_task(_task: TaskHandle) -> i32 {
    0
}

fn fake_thread_spawn(name: &'static str, entry: ThreadEntry, arg: *mut c_void) -> u32 {
    SPAWNS.lock().push(SpawnRecord {
        name,
        entry,
        arg: arg as usize,
    });
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

fn fake_thread_yield() {}

fn fake_irq_save() -> u64 {
    0
}

fn fake_irq_restore(_flags: u64) {}

static FAKE_RUNTIME: RuntimeServices = RuntimeServices {
    clock_monotonic_ns: fake_clock_monotonic_ns,
    current_task: fake_current_task,
    block_current_task: fake_block_current_task,
    unblock_task: fake_unblock_task,
    thread_spawn: fake_thread_spawn,
    thread_yield: fake_thread_yield,
    irq_save: fake_irq_save,
    irq_restore: fake_irq_restore,
};

/// Drain ready replies on every installed controller, as the bus layer's
/// interrupt handler would.
pub fn pump() {
    for unit in installed_units() {
        if let Some(ctrl) = find_controller(unit) {
            transport::run_queue(&ctrl);
        }
    }
}

/// Spawns recorded since the last reset.
pub fn recorded_spawns() -> Vec<SpawnRecord> {
    SPAWNS.lock().clone()
}

// =============================================================================
// Suite plumbing
// =============================================================================

/// Register the fake runtime and init the core. Idempotent; every suite
/// function calls this first.
pub fn init_testbed() {
    register_runtime_services(&FAKE_RUNTIME);
    let _ = crate::i2o_core_init();
}

/// Return the registries to a blank state between tests: clear device
/// claims, delete every controller, drop queued events and spawn records.
pub fn reset_testbed() {
    init_testbed();
    for unit in installed_units() {
        if let Some(ctrl) = find_controller(unit) {
            for dev in ctrl.devices.lock().iter_mut() {
                dev.owner = None;
            }
        }
    }
    crate::controller::delete_all_controllers();
    events::drain_events();
    crate::postwait::clear_waiters();
    SPAWNS.lock().clear();
    if let Ok(exec_ctx) = crate::exec::exec_context() {
        crate::handlers::retain_only(exec_ctx);
    }
}

/// Install a controller over a fresh mock.
pub fn install_mock() -> (u8, MockBus) {
    let mock = MockBus::new();
    let unit = crate::controller::install_controller(Box::new(mock.clone()))
        .unwrap_or_else(|_| panic!("controller registry full in testbed"));
    (unit, mock)
}

/// Install a controller with a scripted LCT and drive it operational.
pub fn online_mock(entries: &[LctEntry]) -> (u8, MockBus) {
    let (unit, mock) = install_mock();
    mock.script_lct(entries);
    crate::exec::boot_controllers();
    (unit, mock)
}

/// A handy three-device LCT for the suites.
pub fn sample_entry(tid: u16, class: DeviceClass) -> LctEntry {
    LctEntry {
        tid: Tid::new(tid),
        device_flags: 0,
        change_indicator: 0,
        class,
        subclass: 0,
        user_tid: Tid::HOST,
        parent_tid: Tid::IOP,
        identity_tag: *b"mockdev\0",
        event_caps: 0,
    }
}

// =============================================================================
// Recording handler
// =============================================================================

/// An OSM that counts every callback; suites register static instances.
pub struct RecordingOsm {
    name: &'static str,
    mask: ClassMask,
    pub replies: AtomicU32,
    pub new_devices: AtomicU32,
    pub deletions_asked: AtomicU32,
    pub removals_seen: AtomicU32,
    pub reboots: AtomicU32,
    /// `true` lets a deletion proceed (the handler "releases" the device).
    pub allow_delete: AtomicBool,
}

impl RecordingOsm {
    pub const fn new(name: &'static str, mask: ClassMask) -> Self {
        Self {
            name,
            mask,
            replies: AtomicU32::new(0),
            new_devices: AtomicU32::new(0),
            deletions_asked: AtomicU32::new(0),
            removals_seen: AtomicU32::new(0),
            reboots: AtomicU32::new(0),
            allow_delete: AtomicBool::new(false),
        }
    }

    pub fn reset(&self) {
        self.replies.store(0, Ordering::Relaxed);
        self.new_devices.store(0, Ordering::Relaxed);
        self.deletions_asked.store(0, Ordering::Relaxed);
        self.removals_seen.store(0, Ordering::Relaxed);
        self.reboots.store(0, Ordering::Relaxed);
        self.allow_delete.store(false, Ordering::Relaxed);
    }
}

impl crate::handlers::OsmHandler for RecordingOsm {
    fn name(&self) -> &'static str {
        self.name
    }

    fn classes(&self) -> ClassMask {
        self.mask
    }

    fn on_reply(&self, _ctrl: &Controller, _msg: &[u32]) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    fn on_new_device(&self, _ctrl: &Controller, _tid: Tid) {
        self.new_devices.fetch_add(1, Ordering::Relaxed);
    }

    fn on_device_deleting(&self, _ctrl: &Controller, _tid: Tid) -> bool {
        self.deletions_asked.fetch_add(1, Ordering::Relaxed);
        self.allow_delete.load(Ordering::Relaxed)
    }

    fn on_device_removed(&self, _ctrl: &Controller, _tid: Tid) {
        self.removals_seen.fetch_add(1, Ordering::Relaxed);
    }

    fn on_reboot(&self) {
        self.reboots.fetch_add(1, Ordering::Relaxed);
    }
}

/// Claim helper: the context a handler got from registration.
pub fn must_register(h: &'static dyn crate::handlers::OsmHandler) -> HandlerContext {
    crate::handlers::register_handler(h)
        .unwrap_or_else(|_| panic!("handler table full in testbed"))
}
