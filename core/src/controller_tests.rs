//! Registry suite: controller refcounting and deletion, handler slots.

extern crate alloc;

use alloc::boxed::Box;

use i2o_abi::{ClassMask, I2oError};
use i2o_lib::testing::TestResult;
use i2o_lib::{assert_eq_test, assert_test, pass, require_ok, require_some};

use crate::controller::{
    MAX_IOPS, delete_controller, find_controller, install_controller, installed_units,
};
use crate::handlers::{free_handler_slots, register_handler, unregister_handler};
use crate::testbed::{self, MockBus, RecordingOsm};

pub fn test_install_assigns_sequential_units() -> TestResult {
    testbed::reset_testbed();
    let (a, _) = testbed::install_mock();
    let (b, _) = testbed::install_mock();
    assert_test!(a != b, "distinct units");
    assert_eq_test!(installed_units().len(), 2usize);
    pass!()
}

pub fn test_find_unknown_unit_is_none() -> TestResult {
    testbed::reset_testbed();
    assert_test!(find_controller(7).is_none());
    assert_test!(find_controller(200).is_none());
    pass!()
}

pub fn test_delete_refused_while_referenced() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();

    let guard = require_some!(find_controller(unit));
    assert_eq_test!(delete_controller(unit), Err(I2oError::Busy), "guard pins the controller");
    assert_test!(!mock.was_destroyed());

    drop(guard);
    require_ok!(delete_controller(unit));
    assert_test!(mock.was_destroyed(), "bus destructor ran on real delete");
    assert_test!(find_controller(unit).is_none());
    pass!()
}

pub fn test_delete_twice_reports_not_found() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    require_ok!(delete_controller(unit));
    assert_eq_test!(delete_controller(unit), Err(I2oError::NotFound));
    pass!()
}

pub fn test_registry_capacity_is_enforced() -> TestResult {
    testbed::reset_testbed();
    for _ in 0..MAX_IOPS {
        let mock = MockBus::new();
        require_ok!(install_controller(Box::new(mock)));
    }
    let overflow = install_controller(Box::new(MockBus::new()));
    assert_eq_test!(overflow, Err(I2oError::NoSpace));
    pass!()
}

pub fn test_deleted_unit_is_reusable() -> TestResult {
    testbed::reset_testbed();
    let (a, _) = testbed::install_mock();
    require_ok!(delete_controller(a));
    let (b, _) = testbed::install_mock();
    assert_eq_test!(b, a, "lowest free slot is reassigned");
    pass!()
}

static SLOT_OSM_A: RecordingOsm = RecordingOsm::new("slot_a", ClassMask::ALL);
static SLOT_OSM_B: RecordingOsm = RecordingOsm::new("slot_b", ClassMask::ALL);

pub fn test_handler_register_unregister_restores_slots() -> TestResult {
    testbed::reset_testbed();
    let before = free_handler_slots();
    let ctx = require_ok!(register_handler(&SLOT_OSM_A));
    assert_eq_test!(free_handler_slots(), before - 1);
    unregister_handler(ctx);
    assert_eq_test!(free_handler_slots(), before, "table indistinguishable from before");
    pass!()
}

pub fn test_handler_unregister_is_idempotent() -> TestResult {
    testbed::reset_testbed();
    let before = free_handler_slots();
    let ctx = require_ok!(register_handler(&SLOT_OSM_A));
    unregister_handler(ctx);
    unregister_handler(ctx);
    unregister_handler(ctx);
    assert_eq_test!(free_handler_slots(), before);
    pass!()
}

pub fn test_handler_contexts_are_distinct_and_reused() -> TestResult {
    testbed::reset_testbed();
    let a = require_ok!(register_handler(&SLOT_OSM_A));
    let b = require_ok!(register_handler(&SLOT_OSM_B));
    assert_test!(a != b);
    unregister_handler(a);
    let c = require_ok!(register_handler(&SLOT_OSM_B));
    assert_eq_test!(c, a, "freed slot is the first free slot again");
    unregister_handler(b);
    unregister_handler(c);
    pass!()
}

pub fn test_stats_snapshot_starts_zero() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    let ctrl = require_some!(find_controller(unit));
    let stats = ctrl.stats.snapshot();
    assert_eq_test!(stats.posts, 0u64);
    assert_eq_test!(stats.replies, 0u64);
    assert_eq_test!(stats.events_dropped, 0u64);
    pass!()
}

i2o_lib::define_test_suite!(
    controller,
    [
        test_install_assigns_sequential_units,
        test_find_unknown_unit_is_none,
        test_delete_refused_while_referenced,
        test_delete_twice_reports_not_found,
        test_registry_capacity_is_enforced,
        test_deleted_unit_is_reusable,
        test_handler_register_unregister_restores_slots,
        test_handler_unregister_is_idempotent,
        test_handler_contexts_are_distinct_and_reused,
        test_stats_snapshot_starts_zero,
    ]
);
