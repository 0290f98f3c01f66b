use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;

use crate::cargo::step;
use crate::{Board, TARGET};

pub fn run(board: Board) -> Result<()> {
    println!();
    println!(
        "{}",
        format!("🔨 Building FSBL image ({} board)...", board.name()).cyan().bold()
    );
    println!();

    build(board)?;

    let memory_x = std::fs::read_to_string("memory.x").context("Failed to read memory.x")?;
    let window = region_length(&memory_x, "FLASH").context("No FLASH region in memory.x")?;

    let output = Command::new("cargo")
        .args([
            "size", "--release", "-p", "fsbl", "--bin", "fsbl", "--target", TARGET, "--features",
            board.features(), "--", "-B",
        ])
        .output()
        .context("Failed to run cargo size. Is cargo-binutils installed?")?;
    let sizes = berkeley_sizes(&String::from_utf8_lossy(&output.stdout))
        .context("Could not read section sizes from cargo size")?;

    let image = sizes.text.saturating_add(sizes.data);
    println!("{}", "📊 Image size:".cyan());
    println!("   {}", format!("text {} data {} bss {}", sizes.text, sizes.data, sizes.bss).dimmed());
    println!("   {image} of {window} bytes in the load window");
    if image > window {
        anyhow::bail!(
            "FSBL image is {} bytes over its load window",
            image.saturating_sub(window)
        );
    }
    println!();
    println!("{}", "✓ Image fits".green().bold());
    println!();

    Ok(())
}

pub fn build(board: Board) -> Result<()> {
    step(
        "Release build",
        &["build", "--release", "-p", "fsbl", "--target", TARGET, "--features", board.features()],
        true,
    )?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct Sizes {
    text: u64,
    data: u64,
    bss: u64,
}

/// `LENGTH` of `region` in a linker MEMORY block, in bytes.
fn region_length(memory_x: &str, region: &str) -> Option<u64> {
    let line = memory_x
        .lines()
        .map(str::trim)
        .find(|l| l.split_whitespace().next() == Some(region))?;
    let value = line.split("LENGTH").nth(1)?.trim_start_matches([' ', '=']).trim();
    let value = value.trim_end_matches([',', ';']).trim();

    let (digits, scale) = if let Some(d) = value.strip_suffix('K') {
        (d, 1024)
    } else if let Some(d) = value.strip_suffix('M') {
        (d, 1_048_576)
    } else {
        (value, 1)
    };
    let number = match digits.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    number.checked_mul(scale)
}

/// Parse the first data row of `size -B` output.
fn berkeley_sizes(output: &str) -> Option<Sizes> {
    let row = output
        .lines()
        .find(|l| l.split_whitespace().next().is_some_and(|w| w.parse::<u64>().is_ok()))?;
    let mut cols = row.split_whitespace().map(str::parse::<u64>);
    Some(Sizes {
        text: cols.next()?.ok()?,
        data: cols.next()?.ok()?,
        bss: cols.next()?.ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMORY_X: &str = "\
MEMORY
{
  FLASH : ORIGIN = 0x34180400, LENGTH = 255K
  RAM   : ORIGIN = 0x341C0000, LENGTH = 0x40000
}";

    #[test]
    fn reads_kilobyte_and_hex_lengths() {
        assert_eq!(region_length(MEMORY_X, "FLASH"), Some(255 * 1024));
        assert_eq!(region_length(MEMORY_X, "RAM"), Some(0x40000));
        assert_eq!(region_length(MEMORY_X, "SRAM"), None);
    }

    #[test]
    fn reads_berkeley_row() {
        let out = "   text    data     bss     dec     hex filename\n  18432      64    1024   19520    4c40 fsbl\n";
        assert_eq!(
            berkeley_sizes(out),
            Some(Sizes {
                text: 18432,
                data: 64,
                bss: 1024
            })
        );
    }
}
