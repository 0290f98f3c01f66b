//! FSBL entry point for the STM32N6.
//!
//! Runs the boot stage and jumps to the application. Any boot error ends in
//! [`fsbl::halt::terminal_halt`].

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use defmt_rtt as _;
use fsbl::boot::{run_boot_stage, selected_board, BootResources};
use fsbl::halt::terminal_halt;
use fsbl::hw::{CortexMpu, CortexSystem, GpioBanks, MmioXspi, Rcc, SpinDelay};
use platform::XspiInstance;

// Panic handler
use panic_probe as _;

#[entry]
fn main() -> ! {
    defmt::info!("FSBL v{=str}", env!("CARGO_PKG_VERSION"));

    let profile = selected_board();

    // SAFETY: single-threaded reset context, interrupts not yet enabled. Each
    // handle below is the only one for its register block until the jump.
    let (cp, psram, flash, mut rcc, mut pins, mut mpu) = unsafe {
        (
            cortex_m::Peripherals::steal(),
            MmioXspi::new(XspiInstance::Xspi1),
            MmioXspi::new(XspiInstance::Xspi2),
            Rcc::new(),
            GpioBanks::new(),
            CortexMpu::new(),
        )
    };
    let mut system = CortexSystem::new(cp.SCB, cp.CPUID);

    let resources = BootResources {
        rcc: &mut rcc,
        pins: &mut pins,
        mpu: &mut mpu,
        caches: &mut system,
        delay: &mut SpinDelay,
    };

    match run_boot_stage(&profile, psram, flash, resources) {
        Ok(vector_table) => {
            defmt::info!("jumping to {=u32:#010x}", vector_table);
            cortex_m::interrupt::disable();
            // SAFETY: the hand-off hook has left XSPI1 in indirect mode and
            // the application image at `vector_table` starts with its initial
            // MSP and reset vector. The MPU and caches stay as configured.
            unsafe {
                let scb = cortex_m::Peripherals::steal().SCB;
                scb.vtor.write(vector_table);
                cortex_m::asm::bootload(vector_table as *const u32)
            }
        }
        Err(e) => terminal_halt(e),
    }
}
