use std::collections::HashMap;

use scsi_target_rs::{
    cfg::{
        config::DeviceConfig,
        enums::{CacheMode, DeviceType, YesNo},
    },
    control_block::{
        cdb::Cdb,
        opcode::{
            INQUIRY, MODE_SELECT_6, READ_CAPACITY_10, REQUEST_SENSE, TEST_UNIT_READY,
        },
    },
    devices::{CommandOutcome, ScsiTarget, TargetDevice, dispatch_command},
    models::sense::{
        FAULT_INVALID_FIELD_IN_CDB, FAULT_INVALID_OPCODE, FAULT_MEDIUM_NOT_PRESENT,
    },
};

fn device_config(device_type: DeviceType, blocks: u64) -> DeviceConfig {
    DeviceConfig {
        id: 0,
        lun: 0,
        device_type,
        scsi_level: 2,
        block_size: 512,
        blocks,
        product_spec: "RUSTSCSI:TESTDISK:0100".to_string(),
        caching: CacheMode::WriteThrough,
        read_only: YesNo::No,
        params: HashMap::new(),
    }
}

fn disk() -> TargetDevice {
    TargetDevice::from_config(&device_config(DeviceType::Disk, 2048), HashMap::new())
        .expect("disk config is valid")
}

fn cdb(bytes: &[u8]) -> Cdb {
    let mut buf = [0u8; 16];
    buf[..bytes.len()].copy_from_slice(bytes);
    Cdb::new(buf).expect("valid group code")
}

#[test]
fn test_test_unit_ready_has_no_data_phase() {
    let mut dev = disk();
    let outcome = dispatch_command(&mut dev, &cdb(&[TEST_UNIT_READY, 0, 0, 0, 0, 0]))
        .expect("TUR succeeds");
    assert_eq!(outcome, CommandOutcome::Status);
}

#[test]
fn test_inquiry_layout() {
    let mut dev = disk();
    let outcome = dispatch_command(&mut dev, &cdb(&[INQUIRY, 0, 0, 0, 36, 0]))
        .expect("INQUIRY succeeds");
    let CommandOutcome::DataIn(buf) = outcome else {
        panic!("INQUIRY must enter data-in");
    };

    assert_eq!(buf.len(), 36);
    assert_eq!(buf[0], 0x00, "direct-access device type");
    assert_eq!(buf[1], 0x00, "disk is not removable");
    assert_eq!(buf[2], 2, "SCSI-2");
    assert_eq!(buf[4], 31, "additional length");
    assert_eq!(&buf[8..16], b"RUSTSCSI");
    assert_eq!(&buf[16..32], b"TESTDISK        ");
    assert_eq!(&buf[32..36], b"0100");
}

#[test]
fn test_inquiry_respects_allocation_length() {
    let mut dev = disk();
    let outcome = dispatch_command(&mut dev, &cdb(&[INQUIRY, 0, 0, 0, 5, 0]))
        .expect("INQUIRY succeeds");
    let CommandOutcome::DataIn(buf) = outcome else {
        panic!("INQUIRY must enter data-in");
    };
    assert_eq!(buf.len(), 5);
}

#[test]
fn test_read_capacity() {
    let mut dev = disk();
    let outcome = dispatch_command(&mut dev, &cdb(&[READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]))
        .expect("READ CAPACITY succeeds");
    let CommandOutcome::DataIn(buf) = outcome else {
        panic!("READ CAPACITY must enter data-in");
    };
    // 2048 blocks of 512: last LBA 2047.
    assert_eq!(buf, vec![0x00, 0x00, 0x07, 0xff, 0x00, 0x00, 0x02, 0x00]);
}

#[test]
fn test_read_capacity_without_medium() {
    let mut dev = TargetDevice::from_config(
        &device_config(DeviceType::Optical, 0),
        HashMap::new(),
    )
    .expect("optical config is valid");

    let err = dispatch_command(&mut dev, &cdb(&[READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]))
        .expect_err("empty tray has no capacity");
    assert_eq!(err, FAULT_MEDIUM_NOT_PRESENT);
}

#[test]
fn test_unhandled_opcode() {
    let mut dev = disk();
    // READ(6) is real but this target registers no handler for it.
    let err = dispatch_command(&mut dev, &cdb(&[0x08, 0, 0, 0, 1, 0]))
        .expect_err("unhandled opcode must fault");
    assert_eq!(err, FAULT_INVALID_OPCODE);
}

#[test]
fn test_request_sense_drains_pending_fault() {
    let mut dev = disk();
    dev.set_sense(FAULT_INVALID_FIELD_IN_CDB);

    let outcome = dispatch_command(&mut dev, &cdb(&[REQUEST_SENSE, 0, 0, 0, 18, 0]))
        .expect("REQUEST SENSE succeeds");
    let CommandOutcome::DataIn(buf) = outcome else {
        panic!("REQUEST SENSE must enter data-in");
    };
    assert_eq!(buf.len(), 18);
    assert_eq!(buf[0], 0x70, "current-error fixed format");
    assert_eq!(buf[2], 0x05, "illegal request");
    assert_eq!(buf[12], 0x24, "invalid field in CDB");

    // Sense is a one-shot: the next REQUEST SENSE reports NO SENSE.
    let outcome = dispatch_command(&mut dev, &cdb(&[REQUEST_SENSE, 0, 0, 0, 18, 0]))
        .expect("REQUEST SENSE succeeds");
    let CommandOutcome::DataIn(buf) = outcome else {
        panic!("REQUEST SENSE must enter data-in");
    };
    assert_eq!(buf[2], 0x00);
    assert_eq!(buf[12], 0x00);
}

#[test]
fn test_mode_select_support_gates_dispatch() {
    // Tape does not advertise MODE SELECT: the handler is simply absent.
    let mut tape = TargetDevice::from_config(
        &device_config(DeviceType::Tape, 0),
        HashMap::new(),
    )
    .expect("tape config is valid");
    let err = dispatch_command(&mut tape, &cdb(&[MODE_SELECT_6, 0x10, 0, 0, 0, 0]))
        .expect_err("tape has no MODE SELECT handler");
    assert_eq!(err, FAULT_INVALID_OPCODE);

    // Disk announces the expected parameter-list length for the data-out.
    let mut dev = disk();
    let outcome = dispatch_command(&mut dev, &cdb(&[MODE_SELECT_6, 0x10, 0, 0, 12, 0]))
        .expect("MODE SELECT succeeds");
    assert_eq!(outcome, CommandOutcome::DataOut(12));
}

#[test]
fn test_save_pages_without_support() {
    let mut dev = disk();
    // SP set, but this device cannot persist parameters.
    let err = dispatch_command(&mut dev, &cdb(&[MODE_SELECT_6, 0x11, 0, 0, 12, 0]))
        .expect_err("SP without save support must fault");
    assert_eq!(err, FAULT_INVALID_FIELD_IN_CDB);
}
