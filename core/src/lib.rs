//! I2O messaging core.
//!
//! A generic asynchronous message-passing runtime between the host and one
//! or more autonomous I/O processors over shared-memory queues: controller
//! and device registries, the inbound/outbound frame protocol, a
//! post-and-wait synchronous call layered on top, the controller bring-up
//! state machine, and the background event and LCT-refresh threads.
//!
//! Embedding: register the host's
//! [`RuntimeServices`](i2o_lib::RuntimeServices) table (and a klog backend),
//! call [`i2o_core_init`], install a controller per discovered IOP with a
//! [`BusOps`](controller::BusOps) implementation, then [`boot_controllers`].
//! The bus layer's interrupt handler calls [`run_queue`] to drain replies.

#![no_std]

extern crate alloc;

pub mod controller;
pub mod device;
pub mod events;
pub mod exec;
pub mod handlers;
pub mod lct;
pub mod params;
pub mod postwait;
pub mod transport;

#[cfg(feature = "itests")]
pub mod testbed;

#[cfg(feature = "itests")]
pub mod controller_tests;
#[cfg(feature = "itests")]
pub mod device_tests;
#[cfg(feature = "itests")]
pub mod exec_tests;
#[cfg(feature = "itests")]
pub mod msg_tests;
#[cfg(feature = "itests")]
pub mod postwait_tests;
#[cfg(feature = "itests")]
pub mod transport_tests;

use i2o_abi::I2oError;
use i2o_lib::{InitFlag, klog_info};

pub use controller::{
    BusOps, Controller, ControllerGuard, MAX_IOPS, delete_controller, find_controller,
    install_controller,
};
pub use device::{
    claim_device, delete_device, release_device, unwatch_device, watch_device,
};
pub use events::{event_pass, event_thread};
pub use exec::{
    activate_controller, boot_controllers, clear_controller, enable_controller,
    quiesce_controller, reset_controller, status_get, system_shutdown,
};
pub use handlers::{OsmHandler, register_handler, unregister_handler};
pub use lct::{lct_refresh_pass, lct_refresh_thread};
pub use params::{clear_table, query_scalar, query_table, row_add, row_delete, set_scalar};
pub use postwait::post_and_wait;
pub use transport::{post_message, run_queue};

static CORE_INIT: InitFlag = InitFlag::new();

/// Bring the core up: register the Executive handler and spawn the event
/// thread. Idempotent.
///
/// The host must have registered its runtime services first; thread
/// creation goes through them.
pub fn i2o_core_init() -> Result<(), I2oError> {
    if !CORE_INIT.claim() {
        return Ok(());
    }
    exec::register_exec_handler()?;
    events::spawn_event_thread();
    klog_info!("i2o: core online");
    Ok(())
}

/// Tear the core down: notify handlers, quiesce and delete every
/// controller, stop the event thread.
pub fn i2o_core_shutdown() {
    exec::system_shutdown();
    controller::delete_all_controllers();
    CORE_INIT.reset();
    klog_info!("i2o: core offline");
}

/// The built-in suites, in dependency order, for an embedder's test run.
#[cfg(feature = "itests")]
pub fn builtin_suites() -> [&'static i2o_lib::testing::TestSuiteDesc; 8] {
    [
        &msg_tests::MSG_SUITE,
        &transport_tests::TRANSPORT_SUITE,
        &postwait_tests::POSTWAIT_SUITE,
        &controller_tests::CONTROLLER_SUITE,
        &device_tests::DEVICE_SUITE,
        &event_tests::EVENT_SUITE,
        &lct_tests::LCT_SUITE,
        &exec_tests::EXEC_SUITE,
    ]
}
