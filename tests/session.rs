//! End-to-end coverage of `Session` against a scripted USB transport.

use stlink_swd::probes::stlink::constants::{self, commands};
use stlink_swd::probes::stlink::usb_interface::mock::MockUsbInterface;
use stlink_swd::{Error, Family, Session, UsbInterface};

/// Surfaces the crate's `log` calls through `env_logger` so `RUST_LOG=trace
/// cargo test -- --nocapture` shows the protocol-boundary tracing emitted
/// by `Session`/`StLinkUsbDevice`. Safe to call from every test: repeat
/// calls after the first are no-ops.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn v21_descriptor() -> stlink_swd::DeviceDescriptor {
    *constants::lookup(Family::V21)
}

/// Builds a session against an API-v1 probe (jtag <= 11), which skips
/// `SWD_SET_FREQ` and so needs the fewest scripted responses. Used by
/// tests that only care about behaviour after open.
fn open_api_v1_session() -> (Session<MockUsbInterface>, MockUsbInterface) {
    init_logging();
    let mock = MockUsbInterface::new(v21_descriptor());
    // word 0x0100 -> major=0, jtag=4, tail=0, api=1
    mock.push_response(commands::GET_VERSION, vec![0x01, 0x00, 0, 0, 0, 0]);
    mock.push_response(commands::GET_CURRENT_MODE, vec![4, 0]); // BOOTLOADER: no leave-state action
    mock.push_response(commands::DEBUG, vec![0, 0]); // enter_debug_swd response
    mock.push_response(commands::DEBUG, vec![0xE8, 0x03, 0x00, 0x00, 0x5F, 0x05, 0x00, 0x00]); // get_coreid (reused as placeholder 8-byte reply, only first 4 bytes consumed)
    let handle = mock.clone();
    let session = Session::from_device(mock, 1_800_000).expect("session opens");
    (session, handle)
}

#[test]
fn open_on_v21_at_default_frequency() {
    init_logging();
    let mock = MockUsbInterface::new(v21_descriptor());
    // 0x2660 -> major=2, jtag=25, tail=32, api=2 (see DESIGN.md for why
    // these bytes differ from the spec's illustrative [0x22, 0x60]).
    mock.push_response(commands::GET_VERSION, vec![0x26, 0x40, 0, 0, 0, 0]);
    mock.push_response(commands::GET_CURRENT_MODE, vec![4, 0]);
    mock.push_response(commands::DEBUG, vec![0x80, 0x00]); // SWD_SET_FREQ ack
    mock.push_response(commands::DEBUG, vec![0, 0]); // enter_debug_swd
    mock.push_response(commands::DEBUG, vec![0x77, 0x14, 0xA0, 0x2B]); // get_coreid

    let handle = mock.clone();
    let session = Session::from_device(mock, 1_800_000).expect("session opens");

    assert_eq!(session.version().major, 2);
    assert_eq!(session.version().jtag, 25);
    assert_eq!(session.version().api(), 2);
    assert_eq!(session.frequency_hz(), 1_800_000);
    assert_eq!(session.core_id(), Some(0x2BA0_1477));

    let freq_frame = handle
        .sent_frames()
        .into_iter()
        .find(|f| f[0] == commands::DEBUG && f[1] == commands::debug::v2::SWD_SET_FREQ)
        .expect("SWD_SET_FREQ was sent");
    assert_eq!(freq_frame[2], 1); // divisor for 1_800_000 Hz
}

#[test]
fn api_v1_probe_skips_frequency_negotiation() {
    let (session, handle) = open_api_v1_session();
    assert_eq!(session.version().api(), 1);
    assert_eq!(session.frequency_hz(), 1_800_000);
    assert!(
        !handle
            .sent_frames()
            .iter()
            .any(|f| f[0] == commands::DEBUG && f[1] == commands::debug::v2::SWD_SET_FREQ),
        "SWD_SET_FREQ must not be sent to an API-v1 probe"
    );
}

#[test]
fn frequency_negotiator_falls_back_to_the_highest_row_below_the_request() {
    init_logging();
    let mock = MockUsbInterface::new(v21_descriptor());
    mock.push_response(commands::GET_VERSION, vec![0x26, 0x40, 0, 0, 0, 0]);
    mock.push_response(commands::GET_CURRENT_MODE, vec![4, 0]);
    mock.push_response(commands::DEBUG, vec![0x80, 0x00]);
    mock.push_response(commands::DEBUG, vec![0, 0]);
    mock.push_response(commands::DEBUG, vec![0, 0, 0, 0]);

    let handle = mock.clone();
    let _session = Session::from_device(mock, 300_000).expect("session opens");

    let freq_frame = handle
        .sent_frames()
        .into_iter()
        .find(|f| f[0] == commands::DEBUG && f[1] == commands::debug::v2::SWD_SET_FREQ)
        .expect("SWD_SET_FREQ was sent");
    assert_eq!(freq_frame[2], 15);
}

#[test]
fn get_target_voltage_computes_volts_from_the_dual_adc_sample() {
    let (mut session, handle) = open_api_v1_session();
    handle.push_response(
        commands::GET_TARGET_VOLTAGE,
        vec![0xE8, 0x03, 0x00, 0x00, 0x5F, 0x05, 0x00, 0x00], // an0=1000, an1=1375
    );

    let volts = session.get_target_voltage().unwrap().unwrap();
    assert!((volts - 3.300).abs() < 0.001);
}

#[test]
fn get_target_voltage_returns_none_when_reference_sample_is_zero() {
    let (mut session, handle) = open_api_v1_session();
    handle.push_response(commands::GET_TARGET_VOLTAGE, vec![0; 8]);

    assert_eq!(session.get_target_voltage().unwrap(), None);
}

#[test]
fn misaligned_address_is_rejected_before_any_io() {
    let (mut session, handle) = open_api_v1_session();
    let calls_before = handle.call_count();

    let err = session.get_mem32(0x2000_0001).unwrap_err();
    assert!(matches!(err, Error::AddressAlignment { value: 0x2000_0001, .. }));
    assert_eq!(handle.call_count(), calls_before, "no transfer should be issued");
}

#[test]
fn oversize_mem32_read_is_rejected_before_any_io() {
    let (mut session, handle) = open_api_v1_session();
    let calls_before = handle.call_count();

    let err = session.read_mem32(0, 2048).unwrap_err();
    assert!(matches!(
        err,
        Error::SizeLimit { kind: 32, len: 2048, max: 1024 }
    ));
    assert_eq!(handle.call_count(), calls_before, "no transfer should be issued");
}

#[test]
fn read_mem32_encodes_address_and_size_as_little_endian_words() {
    let (mut session, handle) = open_api_v1_session();
    handle.push_response(commands::DEBUG, vec![0u8; 8]);

    session.read_mem32(0x2000_0000, 8).unwrap();

    let frame = handle.last_frame().unwrap();
    assert_eq!(frame[0], commands::DEBUG);
    assert_eq!(frame[1], commands::debug::READMEM_32);
    assert_eq!(&frame[2..6], &0x2000_0000u32.to_le_bytes());
    assert_eq!(&frame[6..10], &8u32.to_le_bytes());
}

#[test]
fn short_reads_are_padded_to_the_firmware_minimum() {
    init_logging();
    let mut mock = MockUsbInterface::new(v21_descriptor());
    let handle = mock.clone();

    let response = mock
        .xfer(&[0xAA], None, 6, stlink_swd::probes::stlink::usb_interface::TIMEOUT)
        .unwrap();

    assert_eq!(response.len(), 6);
    assert_eq!(handle.requested_read_lens(), vec![64]);
}
