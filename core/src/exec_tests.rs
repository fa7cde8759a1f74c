//! Bring-up suite: state machine legality, peer bracketing, boot
//! orchestration, shutdown.

use core::sync::atomic::Ordering;

use i2o_abi::{
    CMD_IOP_CLEAR, CMD_IOP_RESET, CMD_SYS_ENABLE, CMD_SYS_QUIESCE, ClassMask, I2oError, IopState,
};
use i2o_lib::testing::TestResult;
use i2o_lib::{assert_eq_test, assert_test, pass, require_ok, require_some};

use crate::controller::{find_controller, installed_units};
use crate::exec;
use crate::testbed::{self, RecordingOsm};

static BOOT_OSM: RecordingOsm = RecordingOsm::new("boot_osm", ClassMask::ALL);

pub fn test_boot_brings_controller_operational() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    assert_eq_test!(exec::boot_controllers(), 1usize);

    let ctrl = require_some!(find_controller(unit));
    assert_eq_test!(ctrl.current_state(), IopState::Operational);
    assert_test!(mock.event_registered(), "exec events armed");
    assert_test!(mock.armed_notify_pending(), "LCT renotify armed");
    assert_test!(
        testbed::recorded_spawns().iter().any(|s| s.name == "i2o_lctd"),
        "refresh thread requested"
    );
    pass!()
}

pub fn test_enable_only_legal_from_ready() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    exec::boot_controllers();
    let ctrl = require_some!(find_controller(unit));

    // Operational already: a second enable is rejected.
    assert_eq_test!(exec::enable_controller(&ctrl), Err(I2oError::InvalidState));
    assert_eq_test!(ctrl.current_state(), IopState::Operational);

    // Quiesce drops to Ready; from there enable is the legal transition.
    require_ok!(exec::quiesce_controller(&ctrl));
    assert_eq_test!(ctrl.current_state(), IopState::Ready);
    require_ok!(exec::enable_controller(&ctrl));
    assert_eq_test!(ctrl.current_state(), IopState::Operational);
    pass!()
}

pub fn test_quiesce_illegal_before_ready() -> TestResult {
    testbed::reset_testbed();
    let (unit, _mock) = testbed::install_mock();
    require_ok!(exec::activate_controller(unit));
    let ctrl = require_some!(find_controller(unit));
    assert_eq_test!(ctrl.current_state(), IopState::Hold);
    assert_eq_test!(exec::quiesce_controller(&ctrl), Err(I2oError::InvalidState));
    pass!()
}

pub fn test_reset_brackets_peers() -> TestResult {
    testbed::reset_testbed();
    let (unit_a, mock_a) = testbed::install_mock();
    let (unit_b, mock_b) = testbed::install_mock();
    assert_eq_test!(exec::boot_controllers(), 2usize);

    let a = require_some!(find_controller(unit_a));
    require_ok!(exec::reset_controller(&a));

    // B was quiesced before A's reset command went out, and re-enabled
    // after it returned.
    let b_quiesce = require_some!(mock_b.last_seen(CMD_SYS_QUIESCE));
    let a_reset = require_some!(mock_a.first_seen(CMD_IOP_RESET));
    let b_reenable = require_some!(mock_b.last_seen(CMD_SYS_ENABLE));
    assert_test!(b_quiesce < a_reset, "peer quiesced before the reset");
    assert_test!(a_reset < b_reenable, "peer re-enabled after the reset");

    let b = require_some!(find_controller(unit_b));
    assert_eq_test!(b.current_state(), IopState::Operational, "peer ends enabled");
    assert_eq_test!(a.current_state(), IopState::Reset, "reset IOP awaits rebuild");
    pass!()
}

pub fn test_rejected_reset_falls_back_to_clear() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    exec::boot_controllers();
    mock.set_reject_reset(true);

    let ctrl = require_some!(find_controller(unit));
    require_ok!(exec::reset_controller(&ctrl));
    assert_test!(mock.first_seen(CMD_IOP_CLEAR).is_some(), "clear issued as fallback");
    assert_eq_test!(ctrl.current_state(), IopState::Hold);
    pass!()
}

pub fn test_warm_start_forces_reset() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    mock.set_iop_state(IopState::Operational); // survived a host reboot
    require_ok!(exec::activate_controller(unit));
    assert_test!(mock.first_seen(CMD_IOP_RESET).is_some(), "warm IOP was reset");

    let ctrl = require_some!(find_controller(unit));
    assert_eq_test!(ctrl.current_state(), IopState::Hold);
    pass!()
}

pub fn test_dead_controller_is_deleted_during_activation() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    mock.set_mute_status(true);
    mock.set_reject_reset(true); // the recovery reset fails too

    assert_test!(exec::activate_controller(unit).is_err());
    assert_test!(find_controller(unit).is_none(), "no broken controller left behind");
    assert_test!(mock.was_destroyed());
    pass!()
}

pub fn test_boot_survivors_come_online_when_sibling_dies() -> TestResult {
    testbed::reset_testbed();
    let (unit_bad, mock_bad) = testbed::install_mock();
    let (unit_good, _mock_good) = testbed::install_mock();
    mock_bad.set_mute_status(true);
    mock_bad.set_reject_reset(true);

    assert_eq_test!(exec::boot_controllers(), 1usize);
    assert_test!(find_controller(unit_bad).is_none());
    let good = require_some!(find_controller(unit_good));
    assert_eq_test!(good.current_state(), IopState::Operational);
    pass!()
}

pub fn test_faulted_iop_is_rejected() -> TestResult {
    testbed::reset_testbed();
    let (unit, mock) = testbed::install_mock();
    mock.set_iop_state(IopState::Faulted);
    assert_test!(exec::activate_controller(unit).is_err());
    assert_test!(find_controller(unit).is_none());
    pass!()
}

pub fn test_shutdown_notifies_handlers_and_quiesces() -> TestResult {
    testbed::reset_testbed();
    BOOT_OSM.reset();
    let (unit, mock) = testbed::install_mock();
    exec::boot_controllers();
    testbed::must_register(&BOOT_OSM);

    exec::system_shutdown();
    assert_eq_test!(BOOT_OSM.reboots.load(Ordering::Relaxed), 1u32, "on_reboot fired");
    assert_test!(mock.last_seen(CMD_SYS_QUIESCE).is_some());
    let ctrl = require_some!(find_controller(unit));
    assert_eq_test!(ctrl.current_state(), IopState::Ready, "left quiesced");
    pass!()
}

pub fn test_boot_with_empty_registry_is_a_noop() -> TestResult {
    testbed::reset_testbed();
    assert_eq_test!(exec::boot_controllers(), 0usize);
    assert_eq_test!(installed_units().len(), 0usize);
    pass!()
}

i2o_lib::define_test_suite!(
    exec,
    [
        test_boot_brings_controller_operational,
        test_enable_only_legal_from_ready,
        test_quiesce_illegal_before_ready,
        test_reset_brackets_peers,
        test_rejected_reset_falls_back_to_clear,
        test_warm_start_forces_reset,
        test_dead_controller_is_deleted_during_activation,
        test_boot_survivors_come_online_when_sibling_dies,
        test_faulted_iop_is_rejected,
        test_shutdown_notifies_handlers_and_quiesces,
        test_boot_with_empty_registry_is_a_noop,
    ]
);
