//! STM32N6 first-stage boot loader
//!
//! Brings up the two external memory buses, locks down the memory protection
//! attributes and hands over to the application with the PSRAM bus in a known
//! state.
//!
//! # Architecture
//!
//! ```text
//! Entry point (main.rs)
//!         ↓
//! Boot flow (boot module, host-testable)
//!         ↓
//! Platform sequences and controllers (platform crate)
//!         ↓
//! MMIO capability implementations (hw module, hardware only)
//! ```
//!
//! # Features
//!
//! - `hardware` - Build for the STM32N6 target (MMIO, defmt, cortex-m-rt)
//! - `board-dk` - STM32N6570-DK memory sizes instead of the custom board
//! - `std` - Enable standard library (host testing)
//!
//! # Building
//!
//! ```bash
//! cargo build --release --target thumbv8m.main-none-eabihf --features hardware
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
// unsafe fn body is not implicitly unsafe block
#![deny(unsafe_code)] // MMIO lives in `hw` and the fault handler, each opted in
// Logging discipline
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // every error path ends in terminal_halt
// Pedantic lints too noisy for register-level code:
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod boot;

#[cfg(feature = "hardware")]
pub mod exception_handlers;
#[cfg(feature = "hardware")]
pub mod halt;
#[cfg(feature = "hardware")]
pub mod hw;

pub use boot::{run_boot_stage, selected_board, BootError, BootResources, BOOT_SEQUENCE_STEPS};
