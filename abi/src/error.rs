//! Subsystem error type.
//!
//! Internal code uses `I2oError` exclusively; conversion to an errno-style
//! integer happens once, at the embedder boundary. IOP-reported failures
//! carry the reply's status byte and detailed status code verbatim so
//! diagnostics never lose the original codes.

use core::fmt;

use crate::cmd::{detail_name, reply_status_name};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2oError {
    /// A fixed-capacity table (handlers, controllers, watchers) is full.
    NoSpace,
    /// Allocation failure.
    NoMemory,
    /// The IOP did not answer within the caller's bound.
    Timeout,
    /// The resource is held: controller with users, device with an owner.
    Busy,
    /// No such controller, device, or handler.
    NotFound,
    /// Caller is not the owner of the device it tried to release.
    NotOwner,
    /// Operation not legal from the controller's current state.
    InvalidState,
    /// The core has not been initialized (or was shut down).
    NotInitialized,
    /// The IOP answered with an explicit failure.
    Reply { status: u8, detail: u16 },
}

impl I2oError {
    /// Errno-style integer for the embedder boundary. `Reply` propagates the
    /// IOP's detailed status code, negated, rather than a translation.
    pub const fn to_errno(&self) -> i32 {
        match self {
            Self::NoSpace => -28,        // ENOSPC
            Self::NoMemory => -12,       // ENOMEM
            Self::Timeout => -110,       // ETIMEDOUT
            Self::Busy => -16,           // EBUSY
            Self::NotFound => -19,       // ENODEV
            Self::NotOwner => -1,        // EPERM
            Self::InvalidState => -22,   // EINVAL
            Self::NotInitialized => -19, // ENODEV
            Self::Reply { detail, .. } => -(*detail as i32),
        }
    }
}

impl fmt::Display for I2oError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpace => f.write_str("no free table slot"),
            Self::NoMemory => f.write_str("out of memory"),
            Self::Timeout => f.write_str("IOP did not answer in time"),
            Self::Busy => f.write_str("resource busy"),
            Self::NotFound => f.write_str("no such object"),
            Self::NotOwner => f.write_str("not the owning handler"),
            Self::InvalidState => f.write_str("not legal from current state"),
            Self::NotInitialized => f.write_str("core not initialized"),
            Self::Reply { status, detail } => write!(
                f,
                "IOP failure: {} / {}",
                reply_status_name(*status),
                detail_name(*detail)
            ),
        }
    }
}
