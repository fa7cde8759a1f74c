//! Device suite: claim/release semantics, watcher notifications, owner
//! veto, and the parameter encoders.

use core::sync::atomic::Ordering;

use i2o_abi::{ClassMask, DeviceClass, I2oError, Tid};
use i2o_lib::testing::TestResult;
use i2o_lib::{assert_eq_test, assert_test, pass, require_ok, require_some};

use crate::controller::find_controller;
use crate::device::{
    self, claim_device, delete_device, release_device, unwatch_device, watch_device,
};
use crate::params;
use crate::testbed::{self, RecordingOsm, sample_entry};

static OWNER: RecordingOsm = RecordingOsm::new("owner", ClassMask::ALL);
static WATCHER_A: RecordingOsm = RecordingOsm::new("watcher_a", ClassMask::ALL);
static WATCHER_B: RecordingOsm = RecordingOsm::new("watcher_b", ClassMask::ALL);

const DISK: u16 = 0x010;
const NIC: u16 = 0x011;

fn online_two_devices() -> Option<u8> {
    let entries = [
        sample_entry(DISK, DeviceClass::RANDOM_BLOCK_STORAGE),
        sample_entry(NIC, DeviceClass::LAN),
    ];
    let (unit, _mock) = testbed::online_mock(&entries);
    find_controller(unit).map(|_| unit)
}

pub fn test_lct_parse_installs_devices() -> TestResult {
    testbed::reset_testbed();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    assert_eq_test!(device::device_count(&ctrl), 2usize);
    assert_test!(device::device_present(&ctrl, Tid::new(DISK)));
    assert_test!(device::device_present(&ctrl, Tid::new(NIC)));
    pass!()
}

pub fn test_claim_then_second_claim_refused() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    WATCHER_A.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);
    let h2 = testbed::must_register(&WATCHER_A);

    require_ok!(claim_device(&ctrl, Tid::new(DISK), h1));
    // Second claim from a different handler: refused, first owner intact.
    assert_eq_test!(claim_device(&ctrl, Tid::new(DISK), h2), Err(I2oError::Busy));
    assert_eq_test!(device::device_owner(&ctrl, Tid::new(DISK)), Some(h1));
    pass!()
}

pub fn test_claim_rejected_by_iop_rolls_back() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    let entries = [sample_entry(DISK, DeviceClass::RANDOM_BLOCK_STORAGE)];
    let (unit, mock) = testbed::online_mock(&entries);
    mock.fail_claim(Tid::new(DISK));
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);

    let r = claim_device(&ctrl, Tid::new(DISK), h1);
    assert_test!(matches!(r, Err(I2oError::Reply { .. })), "IOP refusal surfaces verbatim");
    assert_eq_test!(device::device_owner(&ctrl, Tid::new(DISK)), None, "reservation rolled back");
    pass!()
}

pub fn test_release_requires_ownership() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    WATCHER_A.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);
    let h2 = testbed::must_register(&WATCHER_A);

    require_ok!(claim_device(&ctrl, Tid::new(DISK), h1));
    assert_eq_test!(
        release_device(&ctrl, Tid::new(DISK), h2),
        Err(I2oError::NotOwner)
    );
    require_ok!(release_device(&ctrl, Tid::new(DISK), h1));
    assert_eq_test!(device::device_owner(&ctrl, Tid::new(DISK)), None);
    pass!()
}

pub fn test_release_clears_claim_even_when_iop_fails() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    let entries = [sample_entry(DISK, DeviceClass::RANDOM_BLOCK_STORAGE)];
    let (unit, mock) = testbed::online_mock(&entries);
    mock.fail_release(Tid::new(DISK));
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);

    require_ok!(claim_device(&ctrl, Tid::new(DISK), h1));
    // The IOP refuses the release; local bookkeeping must not stay stuck.
    require_ok!(release_device(&ctrl, Tid::new(DISK), h1));
    assert_eq_test!(device::device_owner(&ctrl, Tid::new(DISK)), None);
    pass!()
}

pub fn test_delete_vetoed_but_watchers_notified() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    WATCHER_A.reset();
    WATCHER_B.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);
    let h2 = testbed::must_register(&WATCHER_A);
    let h3 = testbed::must_register(&WATCHER_B);

    let disk = Tid::new(DISK);
    require_ok!(claim_device(&ctrl, disk, h1));
    require_ok!(watch_device(&ctrl, disk, h2));
    require_ok!(watch_device(&ctrl, disk, h3));

    // Owner keeps the device (allow_delete defaults to false).
    assert_eq_test!(delete_device(&ctrl, disk), Err(I2oError::Busy));
    assert_test!(device::device_present(&ctrl, disk), "device survives the veto");
    assert_eq_test!(OWNER.deletions_asked.load(Ordering::Relaxed), 1u32);
    assert_eq_test!(WATCHER_A.removals_seen.load(Ordering::Relaxed), 1u32);
    assert_eq_test!(WATCHER_B.removals_seen.load(Ordering::Relaxed), 1u32);
    pass!()
}

pub fn test_delete_proceeds_when_owner_releases() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);

    let disk = Tid::new(DISK);
    require_ok!(claim_device(&ctrl, disk, h1));
    OWNER.allow_delete.store(true, Ordering::Relaxed);
    require_ok!(delete_device(&ctrl, disk));
    assert_test!(!device::device_present(&ctrl, disk));
    pass!()
}

pub fn test_delete_unowned_device_succeeds() -> TestResult {
    testbed::reset_testbed();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    require_ok!(delete_device(&ctrl, Tid::new(NIC)));
    assert_eq_test!(device::device_count(&ctrl), 1usize);
    pass!()
}

pub fn test_watch_capacity_and_unwatch() -> TestResult {
    testbed::reset_testbed();
    WATCHER_A.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h2 = testbed::must_register(&WATCHER_A);
    let disk = Tid::new(DISK);

    require_ok!(watch_device(&ctrl, disk, h2));
    // Watching twice keeps a single slot.
    require_ok!(watch_device(&ctrl, disk, h2));
    require_ok!(unwatch_device(&ctrl, disk, h2));
    assert_eq_test!(
        unwatch_device(&ctrl, disk, h2),
        Err(I2oError::NotFound),
        "second unwatch finds nothing"
    );
    pass!()
}

pub fn test_device_ops_on_unknown_tid() -> TestResult {
    testbed::reset_testbed();
    OWNER.reset();
    let unit = require_some!(online_two_devices());
    let ctrl = require_some!(find_controller(unit));
    let h1 = testbed::must_register(&OWNER);
    let ghost = Tid::new(0x7FF);

    assert_eq_test!(claim_device(&ctrl, ghost, h1), Err(I2oError::NotFound));
    assert_eq_test!(delete_device(&ctrl, ghost), Err(I2oError::NotFound));
    assert_eq_test!(watch_device(&ctrl, ghost, h1), Err(I2oError::NotFound));
    pass!()
}

pub fn test_query_scalar_round_trip() -> TestResult {
    testbed::reset_testbed();
    let entries = [sample_entry(DISK, DeviceClass::RANDOM_BLOCK_STORAGE)];
    let (unit, mock) = testbed::online_mock(&entries);
    mock.script_params(&[0xCAFE_F00D, 0x1234_5678]);
    let ctrl = require_some!(find_controller(unit));

    let mut buf = [0u32; 8];
    let n = require_ok!(params::query_scalar(
        &ctrl,
        Tid::new(DISK),
        0x0100,
        Some(3),
        &mut buf
    ));
    assert_eq_test!(n, 2usize);
    assert_eq_test!(buf[0], 0xCAFE_F00Du32);
    assert_eq_test!(buf[1], 0x1234_5678u32);
    pass!()
}

pub fn test_set_scalar_and_table_ops_reach_iop() -> TestResult {
    testbed::reset_testbed();
    let entries = [sample_entry(DISK, DeviceClass::RANDOM_BLOCK_STORAGE)];
    let (unit, mock) = testbed::online_mock(&entries);
    let ctrl = require_some!(find_controller(unit));
    let disk = Tid::new(DISK);

    require_ok!(params::set_scalar(&ctrl, disk, 0x0100, 1, &[42]));
    require_ok!(params::clear_table(&ctrl, disk, 0x0200));
    require_ok!(params::row_add(&ctrl, disk, 0x0200, &[1, 2, 3]));
    require_ok!(params::row_delete(&ctrl, disk, 0x0200, &[1]));
    let mut buf = [0u32; 4];
    require_ok!(params::query_table(&ctrl, disk, 0x0200, &[], &mut buf));

    assert_test!(mock.first_seen(i2o_abi::CMD_UTIL_PARAMS_SET).is_some());
    assert_test!(mock.first_seen(i2o_abi::CMD_UTIL_PARAMS_GET).is_some());
    pass!()
}

i2o_lib::define_test_suite!(
    device,
    [
        test_lct_parse_installs_devices,
        test_claim_then_second_claim_refused,
        test_claim_rejected_by_iop_rolls_back,
        test_release_requires_ownership,
        test_release_clears_claim_even_when_iop_fails,
        test_delete_vetoed_but_watchers_notified,
        test_delete_proceeds_when_owner_releases,
        test_delete_unowned_device_succeeds,
        test_watch_capacity_and_unwatch,
        test_device_ops_on_unknown_tid,
        test_query_scalar_round_trip,
        test_set_scalar_and_table_ops_reach_iop,
    ]
);
