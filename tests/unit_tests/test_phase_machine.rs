use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use scsi_target_rs::{
    bus::{
        driver::{BusDriver, VirtualBus},
        signals::{BusSignals, Phase},
    },
    cfg::{
        config::DeviceConfig,
        enums::{CacheMode, DeviceType, YesNo},
    },
    devices::TargetDevice,
    state_machine::{
        common::{StateMachine, StateMachineCtx, Transition},
        controller::{BusFree, ControllerCtx, DeviceMap, PhaseStates},
    },
};
use tokio_util::sync::CancellationToken;

const TARGET_ID: u8 = 2;
const INITIATOR_ID: u8 = 7;

fn disk_config(lun: u8) -> DeviceConfig {
    DeviceConfig {
        id: TARGET_ID,
        lun,
        device_type: DeviceType::Disk,
        scsi_level: 2,
        block_size: 512,
        blocks: 2048,
        product_spec: "RUSTSCSI:TESTDISK:0100".to_string(),
        caching: CacheMode::WriteThrough,
        read_only: YesNo::No,
        params: HashMap::new(),
    }
}

fn controller_with_disk(lun: u8) -> (Arc<VirtualBus>, ControllerCtx) {
    let bus = Arc::new(VirtualBus::new());
    let devices: Arc<DeviceMap> = Arc::new(DeviceMap::new());
    let disk = TargetDevice::from_config(&disk_config(lun), HashMap::new())
        .expect("disk config is valid");
    devices.insert(lun, Arc::new(Mutex::new(disk)));
    let ctx = ControllerCtx::new(bus.clone(), TARGET_ID, devices);
    (bus, ctx)
}

fn run_transaction(ctx: &mut ControllerCtx) -> Result<()> {
    ctx.execute(&CancellationToken::new())
}

#[test]
fn test_test_unit_ready_transaction() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x00, 0, 0, 0, 0, 0]);
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), Some(0x00), "GOOD status");
    assert_eq!(bus.take_messages_in(), vec![0x00], "COMMAND COMPLETE");
    assert_eq!(ctx.phase(), Phase::BusFree);
    assert!(
        !bus.sample().contains(BusSignals::BSY),
        "bus released after the transaction"
    );
    Ok(())
}

#[test]
fn test_inquiry_data_in_transfer() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x12, 0, 0, 0, 36, 0]);
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), Some(0x00));
    let data = bus.take_data_in();
    assert_eq!(data.len(), 36);
    assert_eq!(&data[8..16], b"RUSTSCSI");
    Ok(())
}

#[test]
fn test_check_condition_then_request_sense() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // READ(6) has no handler here: CHECK CONDITION with invalid-opcode sense.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x08, 0, 0, 0, 1, 0]);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x02));
    assert!(bus.take_data_in().is_empty(), "no data phase on a fault");

    // REQUEST SENSE in the next transaction reports it, then clears it.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x03, 0, 0, 0, 18, 0]);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x00));
    let sense = bus.take_data_in();
    assert_eq!(sense.len(), 18);
    assert_eq!(sense[2], 0x05, "illegal request");
    assert_eq!(sense[12], 0x20, "invalid command operation code");
    Ok(())
}

#[test]
fn test_identify_message_selects_lun() -> Result<()> {
    // Device lives at LUN 1; the CDB alone would address LUN 0.
    let (bus, mut ctx) = controller_with_disk(1);

    bus.select(INITIATOR_ID, TARGET_ID, true);
    bus.queue_message_out(&[0x80 | 0x01]);
    bus.queue_command(&[0x12, 0, 0, 0, 36, 0]);
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), Some(0x00));
    assert_eq!(bus.take_data_in().len(), 36);
    Ok(())
}

#[test]
fn test_missing_lun_reports_invalid_opcode() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // CDB LUN bits address LUN 5 where nothing is attached.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x12, 0xa0, 0, 0, 36, 0]);
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), Some(0x02));
    assert!(bus.take_data_in().is_empty());
    Ok(())
}

#[test]
fn test_mode_select_data_out_round_trip() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // MODE SELECT(6) with a 16-byte list: empty header + valid page 1.
    let mut list = vec![0u8; 4];
    list.extend_from_slice(&[0x01, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x15, 0x10, 0, 0, 16, 0]);
    bus.queue_data_out(&list);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x00));

    // A sector-size change request fails after the data-out completes.
    let mut page3 = vec![0u8; 4];
    page3.extend_from_slice(&{
        let mut p = vec![0u8; 24];
        p[0] = 0x03;
        p[1] = 22;
        p[12..14].copy_from_slice(&1024u16.to_be_bytes());
        p
    });
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x15, 0x10, 0, 0, 28, 0]);
    bus.queue_data_out(&page3);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x02));

    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x03, 0, 0, 0, 18, 0]);
    run_transaction(&mut ctx)?;
    let sense = bus.take_data_in();
    assert_eq!(sense[12], 0x26, "invalid field in parameter list");
    Ok(())
}

#[test]
fn test_zero_length_transfers_skip_data_phase() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // REQUEST SENSE with allocation 0: no data-in phase at all.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x03, 0, 0, 0, 0, 0]);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x00));
    assert!(bus.take_data_in().is_empty());

    // MODE SELECT with parameter length 0: no data-out phase either.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x15, 0x10, 0, 0, 0, 0]);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x00));
    Ok(())
}

#[test]
fn test_reset_takes_priority() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // A selection is pending, but RST wins over every other phase rule.
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x12, 0, 0, 0, 36, 0]);
    bus.assert_reset();
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), None, "nothing was served");
    assert_eq!(ctx.phase(), Phase::BusFree);
    assert!(!bus.sample().contains(BusSignals::BSY));

    // After RST releases the controller serves normally again.
    bus.release_reset();
    bus.clear_queues();
    bus.select(INITIATOR_ID, TARGET_ID, false);
    bus.queue_command(&[0x00, 0, 0, 0, 0, 0]);
    run_transaction(&mut ctx)?;
    assert_eq!(bus.last_status(), Some(0x00));
    Ok(())
}

#[test]
fn test_selection_ignores_other_targets() {
    let (bus, mut ctx) = controller_with_disk(0);

    // Selection of target id 3 is not for us: the machine stays in bus-free.
    bus.select(INITIATOR_ID, 3, false);
    let tr = BusFree.step(&mut ctx);
    assert!(matches!(tr, Transition::Stay(Ok(()))));
    assert_eq!(ctx.phase(), Phase::BusFree);
}

#[test]
fn test_selection_requires_attached_device() {
    let bus = Arc::new(VirtualBus::new());
    let devices: Arc<DeviceMap> = Arc::new(DeviceMap::new());
    let mut ctx = ControllerCtx::new(bus.clone(), TARGET_ID, devices);

    bus.select(INITIATOR_ID, TARGET_ID, false);
    let tr = BusFree.step(&mut ctx);
    assert!(matches!(tr, Transition::Stay(Ok(()))));
}

#[test]
fn test_selection_answers_for_our_id() {
    let (bus, mut ctx) = controller_with_disk(0);

    bus.select(INITIATOR_ID, TARGET_ID, false);
    let tr = BusFree.step(&mut ctx);
    assert!(matches!(
        tr,
        Transition::Next(PhaseStates::Selection(_), Ok(()))
    ));
}

#[test]
fn test_abort_message_goes_bus_free() -> Result<()> {
    let (bus, mut ctx) = controller_with_disk(0);

    // ATN with an ABORT message: transaction ends without a command.
    bus.select(INITIATOR_ID, TARGET_ID, true);
    bus.queue_message_out(&[0x06]);
    run_transaction(&mut ctx)?;

    assert_eq!(bus.last_status(), None);
    assert_eq!(ctx.phase(), Phase::BusFree);
    Ok(())
}
