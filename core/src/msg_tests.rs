//! Wire-format suite: context packing, frame word helpers, table codecs.

use i2o_abi::{
    ClassMask, DeviceClass, HandlerContext, I2oError, IopState, LCT_ENTRY_WORDS, LctEntry,
    MSG_FAIL, STATUS_BLOCK_WORDS, StatusBlock, Tid, TransactionContext, frame_cmd, frame_head,
    frame_initiator, frame_route, frame_target, reply_detail, reply_failed, reply_status,
};
use i2o_lib::testing::TestResult;
use i2o_lib::{assert_eq_test, assert_test, pass, require_some};

fn ctx(index: usize) -> HandlerContext {
    HandlerContext::new(index).unwrap_or_else(|| panic!("bad test context"))
}

pub fn test_context_fire_and_forget_roundtrip() -> TestResult {
    for i in [0usize, 1, 7, 31] {
        let tc = TransactionContext::FireAndForget { handler: ctx(i) };
        let word = tc.encode();
        assert_test!(word & 0x8000_0000 == 0, "async context has no sync bit");
        assert_eq_test!(TransactionContext::decode(word), Some(tc));
    }
    pass!()
}

pub fn test_context_post_wait_roundtrip() -> TestResult {
    for token in [1u16, 0x7FFF, 0x1234] {
        let tc = TransactionContext::PostWait {
            handler: ctx(3),
            token,
        };
        let word = tc.encode();
        assert_test!(word & 0x8000_0000 != 0, "sync bit set");
        assert_eq_test!((word >> 16) & 0x7FFF, token as u32, "token in bits 16..31");
        assert_eq_test!(word & 0xFFFF, 3u32, "handler in low bits");
        assert_eq_test!(TransactionContext::decode(word), Some(tc));
    }
    pass!()
}

pub fn test_context_decode_rejects_bad_handler() -> TestResult {
    // Handler bits beyond the table are undecodable, not a panic.
    assert_test!(TransactionContext::decode(0x0000_FFFF).is_none());
    assert_test!(TransactionContext::decode(0x8001_0040).is_none());
    pass!()
}

pub fn test_frame_route_packing() -> TestResult {
    let word = frame_route(0xA0, Tid::HOST, Tid::new(0x123));
    assert_eq_test!(frame_cmd(word), 0xA0u8);
    assert_eq_test!(frame_initiator(word), Tid::HOST);
    assert_eq_test!(frame_target(word), Tid::new(0x123));
    pass!()
}

pub fn test_frame_head_carries_size() -> TestResult {
    let word = frame_head(9, i2o_abi::SGL_OFFSET_6);
    assert_eq_test!(word >> 16, 9u32);
    assert_test!(word & 1 != 0, "version stamped");
    pass!()
}

pub fn test_reply_status_extraction() -> TestResult {
    let word4 = (0x0Bu32 << 24) | 0x0017;
    assert_eq_test!(reply_status(word4), 0x0Bu8);
    assert_eq_test!(reply_detail(word4), 0x0017u16);
    assert_test!(reply_failed(MSG_FAIL));
    assert_test!(!reply_failed(0));
    pass!()
}

pub fn test_tid_masks_to_twelve_bits() -> TestResult {
    assert_eq_test!(Tid::new(0xFFFF).raw(), 0x0FFFu16);
    assert_eq_test!(Tid::IOP.raw(), 0u16);
    assert_eq_test!(Tid::HOST.raw(), 1u16);
    pass!()
}

pub fn test_lct_entry_roundtrip() -> TestResult {
    let entry = LctEntry {
        tid: Tid::new(0x2A),
        device_flags: 0x11,
        change_indicator: 7,
        class: DeviceClass::RANDOM_BLOCK_STORAGE,
        subclass: 0x99,
        user_tid: Tid::HOST,
        parent_tid: Tid::IOP,
        identity_tag: *b"ABCDEFGH",
        event_caps: 0xF0,
    };
    let mut words = [0u32; LCT_ENTRY_WORDS];
    entry.write(&mut words);
    let back = require_some!(LctEntry::parse(&words));
    assert_eq_test!(back, entry);
    pass!()
}

pub fn test_status_block_roundtrip() -> TestResult {
    let sb = StatusBlock {
        org_id: 0x1,
        iop_id: 0x42,
        host_unit_id: 3,
        segment: 0,
        i2o_version: 2,
        iop_state: IopState::Ready,
        inbound_frame_bytes: 128,
        max_inbound_frames: 64,
        cur_inbound_frames: 60,
        max_outbound_frames: 128,
        cur_outbound_frames: 120,
        expected_lct_bytes: 444,
        capabilities: 0x5,
    };
    let mut words = [0u32; STATUS_BLOCK_WORDS];
    sb.write(&mut words);
    let back = require_some!(StatusBlock::parse(&words));
    assert_eq_test!(back.iop_state, IopState::Ready);
    assert_eq_test!(back.inbound_frame_bytes, 128u16);
    assert_eq_test!(back.expected_lct_bytes, 444u32);
    assert_eq_test!(back.iop_id, 0x42u16);
    pass!()
}

pub fn test_iop_state_warm_detection() -> TestResult {
    assert_test!(IopState::Operational.is_warm());
    assert_test!(IopState::Ready.is_warm());
    assert_test!(IopState::Hold.is_warm());
    assert_test!(!IopState::Reset.is_warm());
    assert_test!(!IopState::Initializing.is_warm());
    assert_test!(!IopState::Faulted.is_warm());
    pass!()
}

pub fn test_class_mask_matching() -> TestResult {
    let lan_only = ClassMask::LAN;
    assert_test!(lan_only.matches(DeviceClass::LAN));
    assert_test!(!lan_only.matches(DeviceClass::SCSI_PERIPHERAL));
    assert_test!(ClassMask::ALL.matches(DeviceClass::new(0x7777)));
    assert_test!(!ClassMask::empty().matches(DeviceClass::LAN));
    pass!()
}

pub fn test_reply_error_keeps_detail_code() -> TestResult {
    let e = I2oError::Reply {
        status: 0x04,
        detail: 0x0017,
    };
    assert_eq_test!(e.to_errno(), -0x17i32);
    assert_eq_test!(I2oError::Timeout.to_errno(), -110i32);
    pass!()
}

i2o_lib::define_test_suite!(
    msg,
    [
        test_context_fire_and_forget_roundtrip,
        test_context_post_wait_roundtrip,
        test_context_decode_rejects_bad_handler,
        test_frame_route_packing,
        test_frame_head_carries_size,
        test_reply_status_extraction,
        test_tid_masks_to_twelve_bits,
        test_lct_entry_roundtrip,
        test_status_block_roundtrip,
        test_iop_state_warm_detection,
        test_class_mask_matching,
        test_reply_error_keeps_detail_code,
    ]
);
