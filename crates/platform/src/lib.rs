//! External-memory platform layer for the STM32N6 boot stage
//!
//! This crate holds everything the FSBL does to its external memories that can
//! be expressed without touching hardware: register encodings, controller
//! state machines and the ordered sequences that drive them. Hardware access
//! goes through small capability traits that the `fsbl` crate implements with
//! MMIO and [`mocks`] implements with a shared event log.
//!
//! # Architecture Layers
//!
//! ```text
//! Boot flow (fsbl crate)
//!         ↓
//! Sequences (psram, psram_shutdown, handoff, mpu::RegionConfigurator)
//!         ↓
//! Controllers (xspi::ExternalMemoryController, xspi::RawXspi)
//!         ↓
//! Capabilities (XspiRegisters, ResetAndClockControl, PinDeinit,
//!               MpuRegisters, SystemControl, CacheControl, DelayNs)
//! ```
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `hardware`: Physical hardware target marker
//! - `defmt`: Enable defmt logging
//!
//! # Example
//!
//! ```no_run
//! use embedded_hal::delay::DelayNs;
//! use platform::{psram, XspiPort};
//!
//! fn reset_psram<P: XspiPort, D: DelayNs>(port: &mut P, delay: &mut D) {
//!     if let Err(e) = psram::global_reset(port, delay) {
//!         // controller was disabled; nothing was sent
//!         let _ = e;
//!     }
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![deny(unsafe_code)] // register access is implemented by the firmware
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod board;
pub mod clock_config;
pub mod gpio;
pub mod handoff;
pub mod mpu;
pub mod psram;
pub mod psram_shutdown;
pub mod rcc;
pub mod system;
pub mod xspi;

pub mod mocks;

// Re-export board configuration
pub use board::{BoardProfile, BoardVariant, BusProfile, BusWiring};

// Re-export capability traits
pub use gpio::{PinDeinit, PinMux};
pub use mpu::MpuRegisters;
pub use rcc::ResetAndClockControl;
pub use system::{CacheControl, SystemControl};
pub use xspi::{XspiPort, XspiRegisters};

// Re-export controller and sequence types
pub use handoff::{BootHandoffHook, HandoffConfig};
pub use mpu::{MpuError, RegionConfigurator, RegionTable};
pub use psram::PsramState;
pub use xspi::{ControllerMode, ExternalMemoryController, RawXspi, XspiError, XspiInstance};
