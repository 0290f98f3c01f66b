use anyhow::{Context, Result};
use colored::Colorize;
use std::process::{Command, Output};
use std::time::Instant;

/// Run `cargo <args>`, print a pass/fail line for `label` and return the
/// captured output.
///
/// With `fatal` a failure prints stderr and aborts the task; otherwise it is
/// reported as a warning.
pub fn step(label: &str, args: &[&str], fatal: bool) -> Result<Option<Output>> {
    println!("{}", format!("  {label}...").cyan());
    let start = Instant::now();

    let output = Command::new("cargo")
        .args(args)
        .output()
        .with_context(|| format!("Failed to run cargo {}", args.join(" ")))?;

    if output.status.success() {
        println!(
            "{}",
            format!("  ✓ {label} passed in {:.2}s", start.elapsed().as_secs_f64()).green()
        );
        println!();
        return Ok(Some(output));
    }

    if fatal {
        eprintln!("{}", format!("  ✗ {label} failed").red().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        anyhow::bail!("{label} failed");
    }
    eprintln!("{}", format!("  ⚠ {label} reported problems").yellow().bold());
    eprintln!();
    Ok(None)
}
