//! Cortex-M exception handlers for the boot stage.
//!
//! - **HardFault**: raised by MPU violations (for example an instruction fetch
//!   from the Device-typed NPU buffer window), bus faults on an XSPI window
//!   whose controller is not memory-mapped, and escalated usage faults.

#![allow(unsafe_code)]

/// HardFault exception handler.
///
/// Logs the stacked PC and LR via defmt/RTT, then halts. Returning from a
/// HardFault handler is undefined behavior on Cortex-M; `-> !` enforces it.
#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::error!(
        "HardFault: pc={=u32:#010x} lr={=u32:#010x} xpsr={=u32:#010x}",
        ef.pc(),
        ef.lr(),
        ef.xpsr()
    );
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::bkpt();
    }
}
