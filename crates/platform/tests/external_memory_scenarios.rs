//! End-to-end scenarios over the shared-log mocks: bring-up, hand-off,
//! shutdown, and the MPU table, exercised through the public API only.

#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use embedded_hal_mock::eh1::delay::NoopDelay;
use platform::gpio::GpioPort;
use platform::mocks::{HwEvent, MockBoard};
use platform::mpu::{AttributeClass, RegionConfigurator, RegionTable};
use platform::psram_shutdown::shutdown;
use platform::xspi::{XspiReg, XspiRegisters};
use platform::{
    BoardProfile, BootHandoffHook, ControllerMode, ExternalMemoryController, PsramState, RawXspi,
    ResetAndClockControl, XspiInstance, XspiPort,
};

#[test]
fn memory_mapped_psram_shuts_down_to_inert_bus() {
    let profile = BoardProfile::discovery();
    let mut board = MockBoard::new();
    let mut psram =
        ExternalMemoryController::init(XspiInstance::Xspi1, board.psram.clone(), &profile.psram.init)
            .unwrap();
    psram
        .enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)
        .unwrap();
    assert_eq!(psram.mode(), ControllerMode::MemoryMapped);

    let state = shutdown(
        &mut psram,
        &mut board.rcc,
        &mut board.pins,
        &mut board.delay,
        &profile.psram.wiring,
    );

    assert_eq!(state, PsramState::ResetStable);
    assert_eq!(psram.mode(), ControllerMode::Disabled);
    assert_eq!(board.psram.peek(XspiReg::Cr), 0, "EN clear");
    assert!(!board.psram.is_clocked());
    assert!(!board.psram.is_held_in_reset(), "reset released");
    for bank in profile.psram.wiring.banks {
        assert_eq!(board.pins.inert_pins(bank.port), bank.pins);
    }
    assert!(board.rcc.port_clock_enabled(GpioPort::O));
    assert!(board.rcc.port_clock_enabled(GpioPort::P));
}

#[test]
fn application_shutdown_without_driver_from_cold_controller() {
    // The application never built a driver and the boot stage already gated
    // the controller clock.
    let profile = BoardProfile::custom();
    let mut board = MockBoard::new();
    let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
    board.rcc.disable_xspi_clock(XspiInstance::Xspi1);
    board.clear_events();

    let state = shutdown(
        &mut raw,
        &mut board.rcc,
        &mut board.pins,
        &mut board.delay,
        &profile.psram.wiring,
    );

    assert_eq!(state, PsramState::ResetStable, "clock is restored before the reset");
    assert!(board.psram.is_at_reset_values());
    assert!(!board.psram.is_clocked());
    assert_eq!(raw.registers().read(XspiReg::Cr), 0);
}

#[test]
fn flash_bus_is_untouched_by_psram_shutdown() {
    let profile = BoardProfile::discovery();
    let mut board = MockBoard::new();
    let mut flash =
        ExternalMemoryController::init(XspiInstance::Xspi2, board.flash.clone(), &profile.flash.init)
            .unwrap();
    flash
        .enable_memory_mapped(&profile.flash.mapped_read, &profile.flash.mapped_write)
        .unwrap();
    let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());

    shutdown(
        &mut raw,
        &mut board.rcc,
        &mut board.pins,
        &mut board.delay,
        &profile.psram.wiring,
    );

    assert_eq!(flash.mode(), ControllerMode::MemoryMapped);
    assert!(board.flash.is_clocked());
    assert_eq!(board.pins.inert_pins(GpioPort::N).bits(), 0);
}

#[test]
fn repeated_handoff_style_resets_keep_controller_idle() {
    let profile = BoardProfile::discovery();
    let board = MockBoard::new();
    let mut psram =
        ExternalMemoryController::init(XspiInstance::Xspi1, board.psram.clone(), &profile.psram.init)
            .unwrap();

    for _ in 0..5 {
        psram
            .enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)
            .unwrap();
        let target = BootHandoffHook::new(profile.handoff)
            .run(&mut psram, &mut NoopDelay::new())
            .unwrap();
        assert_eq!(target, 0x3400_0400);
        assert_eq!(psram.mode(), ControllerMode::Indirect);
        assert!(!psram.is_busy());
    }

    let resets = board
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                HwEvent::XspiCommand {
                    instance: XspiInstance::Xspi1,
                    instruction: 0xFF,
                    ..
                }
            )
        })
        .count();
    assert_eq!(resets, 5);
}

#[test]
fn board_region_tables_read_back_as_three_classes() {
    for profile in [BoardProfile::discovery(), BoardProfile::custom()] {
        let mut board = MockBoard::new();
        let table = profile.region_table().unwrap();
        RegionConfigurator::new()
            .install(&mut board.mpu, &table)
            .unwrap();

        let back = RegionTable::decode(&board.mpu, 16).unwrap();
        let regions = back.regions();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].class(), AttributeClass::CacheableWriteBack);
        assert_eq!(regions[1].class(), AttributeClass::CacheableWriteThrough);
        assert_eq!(regions[2].class(), AttributeClass::DeviceNonCacheable);
        assert!(!regions[0].overlaps(&regions[1]));
        assert!(!regions[1].overlaps(&regions[2]));
        assert!(!regions[0].overlaps(&regions[2]));
    }
}
