//! Terminal error path of the boot stage.
//!
//! A failed bring-up leaves the external buses in an unknown state, so there
//! is nothing sensible to retry and nothing to jump to. Log once, mask
//! interrupts and park the core where a debugger can find it.

use crate::boot::BootError;

/// Log `err` and halt forever.
pub fn terminal_halt(err: BootError) -> ! {
    defmt::error!("boot failed: {}", err);
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}
