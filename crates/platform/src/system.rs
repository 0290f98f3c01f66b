//! Core-level system control: interrupt masking, reset request, caches.

/// Whole-system operations needed at the end of a shutdown.
pub trait SystemControl {
    /// Mask all configurable interrupts (PRIMASK).
    fn disable_interrupts(&mut self);

    /// Request a system reset. Never returns.
    fn system_reset(&mut self) -> !;
}

/// L1 cache enables, run once the MPU regions are installed.
pub trait CacheControl {
    /// Enable the instruction cache.
    fn enable_icache(&mut self);

    /// Enable the data cache.
    fn enable_dcache(&mut self);
}
