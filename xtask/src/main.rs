// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod cargo;
mod check;
mod image;
mod load;
mod test;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// Rust target of the Cortex-M55 core.
pub const TARGET: &str = "thumbv8m.main-none-eabihf";

/// probe-rs chip name.
pub const CHIP: &str = "STM32N657X0HxQ";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "STM32N6 FSBL development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Board the image is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Board {
    /// STM32N6570-DK discovery kit.
    Dk,
    /// Production board.
    Custom,
}

impl Board {
    /// Name for progress output.
    pub fn name(self) -> &'static str {
        match self {
            Board::Dk => "DK",
            Board::Custom => "custom",
        }
    }

    /// Cargo features selecting this board on the fsbl crate.
    pub fn features(self) -> &'static str {
        match self {
            Board::Dk => "hardware,board-dk",
            Board::Custom => "hardware",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check the FSBL for both boards, the platform crate for no_std, clippy and fmt
    Check,
    /// Run host tests (unit, integration and doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
    },
    /// Build the FSBL image and check it fits its load window
    Image {
        #[arg(long, value_enum, default_value = "custom")]
        board: Board,
    },
    /// Build the FSBL and run it from RAM through the debug probe (dev boot mode)
    Load {
        #[arg(long, value_enum, default_value = "custom")]
        board: Board,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => check::run(),
        Commands::Test { unit, integration } => test::run(unit, integration),
        Commands::Image { board } => image::run(board),
        Commands::Load { board } => load::run(board),
    }
}
