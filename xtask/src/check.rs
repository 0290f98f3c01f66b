use anyhow::Result;
use colored::Colorize;
use std::time::Instant;

use crate::cargo::step;
use crate::{Board, TARGET};

pub fn run() -> Result<()> {
    println!();
    println!("{}", "🔍 Checking FSBL builds...".cyan().bold());
    println!();

    let total_start = Instant::now();

    for board in [Board::Custom, Board::Dk] {
        step(
            &format!("Hardware target ({} board)", board.name()),
            &["check", "-p", "fsbl", "--target", TARGET, "--features", board.features()],
            true,
        )?;
    }

    step(
        "Platform crate (no_std)",
        &["check", "-p", "platform", "--target", TARGET, "--no-default-features"],
        true,
    )?;

    // Lint and format problems are reported, not fatal.
    step(
        "Clippy lints",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        false,
    )?;
    if step("Formatting", &["fmt", "--all", "--check"], false)?.is_none() {
        eprintln!("     Run 'cargo fmt --all' to fix");
    }

    println!(
        "{}",
        format!(
            "✓ All checks completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}
