//! Integration test: runs the whole boot stage against the shared-log mocks.
//!
//! Tests that:
//!   1. Both board profiles boot to the application vector table
//!   2. MPU programming and cache enables precede any external memory access
//!   3. NOR flash is mapped before the PSRAM is touched
//!   4. The PSRAM is reset at bring-up and again by the hand-off hook
//!   5. Errors stop the flow at the failing step
//!
//! Does NOT require physical hardware.
//!
//! Run with: cargo test -p fsbl --test integration_boot_sequence

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use embedded_hal_mock::eh1::delay::NoopDelay;
use fsbl::boot::{run_boot_stage, BootError, BootResources};
use platform::gpio::{GpioPort, XSPI_ALTERNATE_FUNCTION};
use platform::mocks::{HwEvent, MockBoard};
use platform::mpu::{MpuError, CTRL_ENABLE, CTRL_PRIVDEFENA};
use platform::xspi::{ControllerMode, XspiError, XspiReg, XspiRegisters};
use platform::{BoardProfile, RawXspi, XspiInstance, XspiPort};

fn boot(profile: &BoardProfile, board: &mut MockBoard) -> Result<u32, BootError> {
    let resources = BootResources {
        rcc: &mut board.rcc,
        pins: &mut board.pins,
        mpu: &mut board.mpu,
        caches: &mut board.system,
        delay: &mut board.delay,
    };
    run_boot_stage(profile, board.psram.clone(), board.flash.clone(), resources)
}

fn position(events: &[HwEvent], f: impl Fn(&HwEvent) -> bool) -> usize {
    events.iter().position(f).expect("event not logged")
}

fn psram_resets(events: &[HwEvent]) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            matches!(
                e,
                HwEvent::XspiCommand {
                    instance: XspiInstance::Xspi1,
                    instruction: 0xFF,
                    address: None,
                    ..
                }
            )
        })
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn both_boards_boot_to_application_vector_table() {
    for profile in [BoardProfile::discovery(), BoardProfile::custom()] {
        let mut board = MockBoard::new();
        let target = boot(&profile, &mut board).unwrap();

        assert_eq!(target, 0x3400_0400);
        assert_eq!(board.mpu.ctrl(), CTRL_ENABLE | CTRL_PRIVDEFENA);

        let flash = RawXspi::new(XspiInstance::Xspi2, board.flash.clone());
        assert_eq!(flash.hardware_mode(), ControllerMode::MemoryMapped);
        let psram = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
        assert_eq!(psram.hardware_mode(), ControllerMode::Indirect);
        assert!(!psram.is_busy());
    }
}

#[test]
fn protection_and_caches_come_before_external_memory() {
    let mut board = MockBoard::new();
    boot(&BoardProfile::custom(), &mut board).unwrap();
    let events = board.events();

    let mpu_on = position(&events, |e| matches!(e, HwEvent::MpuEnabled { .. }));
    let icache = position(&events, |e| *e == HwEvent::ICacheEnabled);
    let dcache = position(&events, |e| *e == HwEvent::DCacheEnabled);
    let first_xspi = position(&events, |e| {
        matches!(e, HwEvent::XspiClockEnabled(_) | HwEvent::XspiEnabled(_))
    });

    assert_eq!(events[0], HwEvent::MpuDisabled);
    assert!(mpu_on < icache);
    assert!(icache < dcache);
    assert!(dcache < first_xspi);
}

#[test]
fn flash_is_mapped_before_psram_bring_up() {
    let mut board = MockBoard::new();
    boot(&BoardProfile::discovery(), &mut board).unwrap();
    let events = board.events();

    let flash_mapped = position(&events, |e| {
        *e == HwEvent::XspiMemoryMapped(XspiInstance::Xspi2)
    });
    let psram_clock = position(&events, |e| {
        *e == HwEvent::XspiClockEnabled(XspiInstance::Xspi1)
    });
    assert!(flash_mapped < psram_clock);
}

#[test]
fn psram_is_reset_before_mapping_and_again_at_handoff() {
    let mut board = MockBoard::new();
    boot(&BoardProfile::custom(), &mut board).unwrap();
    let events = board.events();

    let resets = psram_resets(&events);
    assert_eq!(resets.len(), 2);

    let mapped = position(&events, |e| {
        *e == HwEvent::XspiMemoryMapped(XspiInstance::Xspi1)
    });
    let aborted = events
        .iter()
        .rposition(|e| *e == HwEvent::XspiAborted(XspiInstance::Xspi1))
        .unwrap();
    assert!(resets[0] < mapped);
    assert!(mapped < aborted);
    assert!(aborted < resets[1]);

    for reset in resets {
        assert!(matches!(events.get(reset + 1), Some(HwEvent::Delay { ns }) if *ns >= 2_000));
    }
}

#[test]
fn bus_pins_are_routed_to_xspi() {
    let profile = BoardProfile::discovery();
    let mut board = MockBoard::new();
    boot(&profile, &mut board).unwrap();

    for bus in [profile.psram, profile.flash] {
        for bank in bus.wiring.banks {
            assert!(board.rcc.port_clock_enabled(bank.port));
            assert_eq!(
                board.pins.alternate_pins(bank.port, XSPI_ALTERNATE_FUNCTION),
                bank.pins
            );
        }
    }
    assert!(board.pins.inert_pins(GpioPort::P).is_empty());
}

#[test]
fn rejected_region_table_stops_before_any_bus_access() {
    let mut profile = BoardProfile::custom();
    profile.regions[2] = profile.regions[1];
    let mut board = MockBoard::new();

    assert_eq!(
        boot(&profile, &mut board),
        Err(BootError::Mpu(MpuError::Overlap {
            first: 1,
            second: 2
        }))
    );
    assert!(board.events().is_empty(), "MPU untouched, no bus access");
}

#[test]
fn invalid_psram_config_leaves_flash_mapped_and_psram_untouched() {
    let mut profile = BoardProfile::discovery();
    profile.psram.init.fifo_threshold = 0;
    let mut board = MockBoard::new();

    let err = boot(&profile, &mut board).unwrap_err();

    assert!(matches!(err, BootError::Xspi(XspiError::InvalidConfig(_))));
    assert_eq!(board.psram.peek(XspiReg::Cr), 0);
    assert!(psram_resets(&board.events()).is_empty());
    assert_eq!(
        RawXspi::new(XspiInstance::Xspi2, board.flash.clone()).hardware_mode(),
        ControllerMode::MemoryMapped
    );
}

#[test]
fn application_can_shut_psram_down_after_handoff() {
    let profile = BoardProfile::custom();
    let mut board = MockBoard::new();
    boot(&profile, &mut board).unwrap();

    let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
    let state = platform::psram_shutdown::shutdown(
        &mut raw,
        &mut board.rcc,
        &mut board.pins,
        &mut NoopDelay::new(),
        &profile.psram.wiring,
    );

    assert_eq!(state, platform::PsramState::ResetStable);
    assert_eq!(raw.registers().read(XspiReg::Cr), 0);
    assert!(!board.psram.is_clocked());
    for bank in profile.psram.wiring.banks {
        assert_eq!(board.pins.inert_pins(bank.port), bank.pins);
        assert!(board
            .pins
            .alternate_pins(bank.port, XSPI_ALTERNATE_FUNCTION)
            .is_empty());
    }
}
