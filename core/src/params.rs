//! Scalar and table parameter operations.
//!
//! Every device exposes parameter groups readable and writable through
//! `UtilParamsGet`/`UtilParamsSet`. Each call carries an *operation list*
//! out and receives a *result block* back, both as DMA payloads; the
//! message itself only names the two buffers. These helpers are thin
//! encoders over [`post_and_wait`](crate::postwait::post_and_wait).
//!
//! Layouts (16-bit fields packed low-half-first into words):
//!
//! ```text
//! operation list:  [ op_count | 0 ]
//!                  per op: [ operation | group ] [ key_count | key0 ] keys...
//!                  (set/add ops append their payload words)
//! result block:    [ result_count | 0 ]
//!                  per result: [ block_words | block_status ] payload...
//! ```

extern crate alloc;

use alloc::vec::Vec;

use i2o_abi::{
    CMD_UTIL_PARAMS_GET, CMD_UTIL_PARAMS_SET, I2oError, PARAMS_ALL_FIELDS, PARAMS_OP_FIELD_GET,
    PARAMS_OP_FIELD_SET, PARAMS_OP_ROW_ADD, PARAMS_OP_ROW_DELETE, PARAMS_OP_TABLE_CLEAR,
    PARAMS_OP_TABLE_GET, RS_TRANSACTION_ERROR, SGL_OFFSET_5, Tid, frame_head, frame_route,
};
use i2o_lib::klog_warn;

use crate::controller::Controller;
use crate::postwait;

const PARAMS_TIMEOUT_MS: u64 = 10_000;
/// Default result window when the caller's buffer does not dictate one.
const RESULT_MIN_WORDS: usize = 32;

#[inline]
const fn pack16(lo: u16, hi: u16) -> u32 {
    lo as u32 | ((hi as u32) << 16)
}

#[inline]
const fn lo16(word: u32) -> u16 {
    word as u16
}

#[inline]
const fn hi16(word: u32) -> u16 {
    (word >> 16) as u16
}

/// Ship an operation list, wait, and return the first result's payload.
fn issue_params(
    ctrl: &Controller,
    cmd: u8,
    tid: Tid,
    oplist: &[u32],
    result_words: usize,
) -> Result<Vec<u32>, I2oError> {
    let result_words = result_words.max(RESULT_MIN_WORDS);

    let Some(op_addr) = ctrl.bus.alloc_dma(oplist.len()) else {
        return Err(I2oError::NoMemory);
    };
    let Some(res_addr) = ctrl.bus.alloc_dma(result_words) else {
        ctrl.bus.free_dma(op_addr);
        return Err(I2oError::NoMemory);
    };
    ctrl.bus.write_dma(op_addr, oplist);

    let mut msg = [
        frame_head(9, SGL_OFFSET_5),
        frame_route(cmd, Tid::HOST, tid),
        0,
        0,
        0,
        op_addr,
        oplist.len() as u32,
        res_addr,
        result_words as u32,
    ];
    let waited = postwait::post_and_wait(ctrl, &mut msg, PARAMS_TIMEOUT_MS);

    let mut raw = alloc::vec![0u32; result_words];
    ctrl.bus.read_dma(res_addr, &mut raw);
    ctrl.bus.free_dma(op_addr);
    ctrl.bus.free_dma(res_addr);
    waited?;

    parse_first_result(ctrl, tid, &raw)
}

fn parse_first_result(ctrl: &Controller, tid: Tid, raw: &[u32]) -> Result<Vec<u32>, I2oError> {
    if lo16(raw[0]) == 0 {
        klog_warn!("{}: {} returned no results", ctrl.name(), tid);
        return Err(I2oError::NotFound);
    }
    let block_words = lo16(raw[1]) as usize;
    let block_status = hi16(raw[1]);
    if block_status != 0 {
        klog_warn!(
            "{}: {} params operation failed, block status {:#06x}",
            ctrl.name(),
            tid,
            block_status
        );
        return Err(I2oError::Reply {
            status: RS_TRANSACTION_ERROR,
            detail: block_status,
        });
    }
    let end = (1 + block_words).min(raw.len());
    Ok(raw[2..end.max(2)].to_vec())
}

/// Read one scalar field (or, with `field == None`, a whole group) into
/// `buf`. Returns the number of words copied.
pub fn query_scalar(
    ctrl: &Controller,
    tid: Tid,
    group: u16,
    field: Option<u16>,
    buf: &mut [u32],
) -> Result<usize, I2oError> {
    let keys = match field {
        Some(f) => pack16(1, f),
        None => pack16(PARAMS_ALL_FIELDS, 0),
    };
    let oplist = [pack16(1, 0), pack16(PARAMS_OP_FIELD_GET, group), keys];
    let payload = issue_params(ctrl, CMD_UTIL_PARAMS_GET, tid, &oplist, buf.len() + 2)?;
    let n = payload.len().min(buf.len());
    buf[..n].copy_from_slice(&payload[..n]);
    Ok(n)
}

/// Write one scalar field.
pub fn set_scalar(
    ctrl: &Controller,
    tid: Tid,
    group: u16,
    field: u16,
    value: &[u32],
) -> Result<(), I2oError> {
    let mut oplist = Vec::with_capacity(3 + value.len());
    oplist.push(pack16(1, 0));
    oplist.push(pack16(PARAMS_OP_FIELD_SET, group));
    oplist.push(pack16(1, field));
    oplist.extend_from_slice(value);
    issue_params(ctrl, CMD_UTIL_PARAMS_SET, tid, &oplist, RESULT_MIN_WORDS).map(|_| ())
}

/// Read table rows. `rows` selects row keys; empty means every row.
pub fn query_table(
    ctrl: &Controller,
    tid: Tid,
    group: u16,
    rows: &[u16],
    buf: &mut [u32],
) -> Result<usize, I2oError> {
    let mut oplist = Vec::with_capacity(3 + rows.len().div_ceil(2));
    oplist.push(pack16(1, 0));
    oplist.push(pack16(PARAMS_OP_TABLE_GET, group));
    if rows.is_empty() {
        oplist.push(pack16(PARAMS_ALL_FIELDS, 0));
    } else {
        oplist.push(pack16(rows.len() as u16, rows[0]));
        for pair in rows[1..].chunks(2) {
            let hi = if pair.len() > 1 { pair[1] } else { 0 };
            oplist.push(pack16(pair[0], hi));
        }
    }
    let payload = issue_params(ctrl, CMD_UTIL_PARAMS_GET, tid, &oplist, buf.len() + 2)?;
    let n = payload.len().min(buf.len());
    buf[..n].copy_from_slice(&payload[..n]);
    Ok(n)
}

/// Remove every row from a table group.
pub fn clear_table(ctrl: &Controller, tid: Tid, group: u16) -> Result<(), I2oError> {
    let oplist = [pack16(1, 0), pack16(PARAMS_OP_TABLE_CLEAR, group), pack16(0, 0)];
    issue_params(ctrl, CMD_UTIL_PARAMS_SET, tid, &oplist, RESULT_MIN_WORDS).map(|_| ())
}

/// Append one row to a table group.
pub fn row_add(ctrl: &Controller, tid: Tid, group: u16, row: &[u32]) -> Result<(), I2oError> {
    let mut oplist = Vec::with_capacity(3 + row.len());
    oplist.push(pack16(1, 0));
    oplist.push(pack16(PARAMS_OP_ROW_ADD, group));
    oplist.push(pack16(row.len() as u16, 0));
    oplist.extend_from_slice(row);
    issue_params(ctrl, CMD_UTIL_PARAMS_SET, tid, &oplist, RESULT_MIN_WORDS).map(|_| ())
}

/// Delete rows (by key) from a table group.
pub fn row_delete(ctrl: &Controller, tid: Tid, group: u16, keys: &[u16]) -> Result<(), I2oError> {
    let mut oplist = Vec::with_capacity(3 + keys.len().div_ceil(2));
    oplist.push(pack16(1, 0));
    oplist.push(pack16(PARAMS_OP_ROW_DELETE, group));
    if keys.is_empty() {
        oplist.push(pack16(0, 0));
    } else {
        oplist.push(pack16(keys.len() as u16, keys[0]));
        for pair in keys[1..].chunks(2) {
            let hi = if pair.len() > 1 { pair[1] } else { 0 };
            oplist.push(pack16(pair[0], hi));
        }
    }
    issue_params(ctrl, CMD_UTIL_PARAMS_SET, tid, &oplist, RESULT_MIN_WORDS).map(|_| ())
}
