//! Support layer for the I2O subsystem.
//!
//! Everything here is host-kernel-agnostic: the subsystem is embedded into a
//! kernel by registering a [`runtime::RuntimeServices`] table (scheduler and
//! clock hooks) and, optionally, a klog backend. Nothing in this crate
//! touches hardware.

#![no_std]

pub mod clock;
pub mod init_flag;
pub mod klog;
pub mod ring_buffer;
pub mod runtime;
pub mod service_macro;
pub mod spinlock;
pub mod testing;
pub mod waitqueue;

#[doc(hidden)]
pub use paste;

pub use init_flag::InitFlag;
pub use klog::{KlogLevel, klog_get_level, klog_register_backend, klog_set_level};
pub use ring_buffer::RingBuffer;
pub use runtime::{
    RuntimeServices, TaskHandle, ThreadEntry, is_runtime_initialized, register_runtime_services,
};
pub use spinlock::{IrqMutex, IrqMutexGuard};
pub use waitqueue::WaitQueue;
