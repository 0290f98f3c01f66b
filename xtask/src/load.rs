use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;

use crate::{image, Board, CHIP, TARGET};

/// Run the FSBL from RAM with the board strapped for development boot.
///
/// The image is not signed and is not written to NOR flash; it only survives
/// until the next reset.
pub fn run(board: Board) -> Result<()> {
    println!();
    image::build(board)?;

    println!("{}", format!("📡 Loading into {CHIP}...").cyan().bold());
    println!("   {}", "Set BOOT1 for development boot before loading".dimmed());

    let status = Command::new("probe-rs")
        .args([
            "run",
            "--chip",
            CHIP,
            &format!("target/{TARGET}/release/fsbl"),
        ])
        .status()
        .context("Failed to run probe-rs. Is probe-rs installed? (cargo install probe-rs-tools)")?;

    if !status.success() {
        anyhow::bail!("Load failed - check that the probe is connected and the board is in dev boot");
    }
    Ok(())
}
