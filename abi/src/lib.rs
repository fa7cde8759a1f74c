//! I2O Wire-Level ABI Types
//!
//! This crate provides the canonical definitions for everything that crosses
//! the host/IOP boundary: message frame layout, command opcodes, reply status
//! codes, device classes, and the configuration tables the IOP reports
//! (status block, HRT, LCT, system table). Having a single source of truth
//! eliminates:
//! - Duplicate constant definitions between the core and class drivers
//! - Bit-packing mistakes at the transport boundary
//! - Status-code drift between the dispatch path and the loggers
//!
//! Everything here is plain data; no locks, no allocation, no I/O.

#![no_std]
#![forbid(unsafe_code)]

pub mod class;
pub mod cmd;
pub mod error;
pub mod msg;
pub mod tables;

pub use class::{ClassMask, DeviceClass};
pub use cmd::*;
pub use error::I2oError;
pub use msg::*;
pub use tables::*;
