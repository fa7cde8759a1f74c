//! Transport suite: inbound acquisition bounds, posting, reply dispatch.

use i2o_abi::{CMD_SYS_QUIESCE, ClassMask, I2oError, MSG_FRAME_WORDS, TransactionContext};
use i2o_lib::testing::TestResult;
use i2o_lib::{assert_eq_test, assert_test, pass, require_ok, require_some};

use crate::controller::find_controller;
use crate::exec;
use crate::testbed::{self, RecordingOsm};
use crate::transport;

static DISPATCH_OSM: RecordingOsm = RecordingOsm::new("dispatch_osm", ClassMask::ALL);

pub fn test_acquire_inbound_slot_times_out_when_starved() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    mock.set_starve_inbound(true);
    let ctrl = require_some!(find_controller(unit));

    let r = transport::acquire_inbound_slot(&ctrl, 5);
    assert_eq_test!(r, Err(I2oError::Timeout), "starved FIFO must time out");
    pass!()
}

pub fn test_acquire_inbound_slot_returns_frame() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    let ctrl = require_some!(find_controller(unit));

    let frame = require_ok!(transport::acquire_inbound_slot(&ctrl, 5));
    assert_test!(frame != i2o_abi::EMPTY_QUEUE);
    pass!()
}

pub fn test_post_message_rejects_oversized() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    let ctrl = require_some!(find_controller(unit));

    let msg = [0u32; MSG_FRAME_WORDS + 4];
    assert_eq_test!(transport::post_message(&ctrl, &msg), Err(I2oError::NoSpace));
    pass!()
}

pub fn test_post_message_counts_posts() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    let ctrl = require_some!(find_controller(unit));

    let msg = [
        i2o_abi::frame_head(4, 0),
        i2o_abi::frame_route(CMD_SYS_QUIESCE, i2o_abi::Tid::HOST, i2o_abi::Tid::IOP),
        0,
        0,
    ];
    require_ok!(transport::post_message(&ctrl, &msg));
    assert_eq_test!(ctrl.stats.snapshot().posts, 1u64);
    assert_test!(mock.first_seen(CMD_SYS_QUIESCE).is_some(), "IOP saw the post");
    pass!()
}

pub fn test_run_queue_dispatches_to_handler() -> TestResult {
    testbed::reset_testbed();
    DISPATCH_OSM.reset();
    let (unit, mock) = testbed::install_mock();
    require_ok!(exec::activate_controller(unit));
    let ctrl = require_some!(find_controller(unit));
    let ctx = testbed::must_register(&DISPATCH_OSM);

    let word = TransactionContext::FireAndForget { handler: ctx }.encode();
    assert_test!(mock.inject_reply(0x42, word), "mock had a reply frame");
    transport::run_queue(&ctrl);

    assert_eq_test!(
        DISPATCH_OSM.replies.load(core::sync::atomic::Ordering::Relaxed),
        1u32
    );
    crate::handlers::unregister_handler(ctx);
    pass!()
}

pub fn test_run_queue_drops_undecodable_context() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    require_ok!(exec::activate_controller(unit));
    let ctrl = require_some!(find_controller(unit));

    assert_test!(mock.inject_reply(0x42, 0x0000_FFFF));
    transport::run_queue(&ctrl);
    assert_test!(ctrl.stats.snapshot().replies >= 1, "reply was consumed");
    pass!()
}

pub fn test_run_queue_drops_unregistered_handler() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    require_ok!(exec::activate_controller(unit));
    let ctrl = require_some!(find_controller(unit));

    // Slot 31 is valid but empty: dispatched nowhere, absorbed.
    let empty =
        TransactionContext::FireAndForget {
            handler: require_some!(i2o_abi::HandlerContext::new(31)),
        }
        .encode();
    assert_test!(mock.inject_reply(0x42, empty));
    transport::run_queue(&ctrl);
    pass!()
}

pub fn test_run_queue_preserves_fifo_order() -> TestResult {
    testbed::reset_testbed();
    DISPATCH_OSM.reset();
    let (unit, mock) = testbed::install_mock();
    require_ok!(exec::activate_controller(unit));
    let ctrl = require_some!(find_controller(unit));
    let ctx = testbed::must_register(&DISPATCH_OSM);

    let word = TransactionContext::FireAndForget { handler: ctx }.encode();
    for _ in 0..3 {
        assert_test!(mock.inject_reply(0x42, word));
    }
    transport::run_queue(&ctrl);
    assert_eq_test!(
        DISPATCH_OSM.replies.load(core::sync::atomic::Ordering::Relaxed),
        3u32,
        "all queued replies drained in one run"
    );
    crate::handlers::unregister_handler(ctx);
    pass!()
}

i2o_lib::define_test_suite!(
    transport,
    [
        test_acquire_inbound_slot_times_out_when_starved,
        test_acquire_inbound_slot_returns_frame,
        test_post_message_rejects_oversized,
        test_post_message_counts_posts,
        test_run_queue_dispatches_to_handler,
        test_run_queue_drops_undecodable_context,
        test_run_queue_drops_unregistered_handler,
        test_run_queue_preserves_fifo_order,
    ]
);
