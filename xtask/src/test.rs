use anyhow::Result;
use colored::Colorize;
use std::time::Instant;

use crate::cargo::step;

pub fn run(unit_only: bool, integration_only: bool) -> Result<()> {
    println!();
    println!("{}", "🧪 Running host tests...".cyan().bold());
    println!();

    let total_start = Instant::now();

    if !integration_only {
        if let Some(out) = step("Unit tests", &["test", "--lib", "--workspace"], true)? {
            println!("    {}", extract_test_summary(&String::from_utf8_lossy(&out.stdout)));
        }
    }

    if !unit_only {
        if let Some(out) = step(
            "Integration tests",
            &["test", "--tests", "-p", "platform", "-p", "fsbl"],
            true,
        )? {
            println!("    {}", extract_test_summary(&String::from_utf8_lossy(&out.stdout)));
        }
    }

    // Doc test failures are reported, not fatal.
    step("Doc tests", &["test", "--doc", "--workspace"], false)?;

    println!(
        "{}",
        format!(
            "✓ All tests completed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}

/// Sum the counts of every "test result:" line cargo printed.
fn extract_test_summary(output: &str) -> String {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut found = false;
    for line in output.lines() {
        let Some(summary) = line.split("test result:").nth(1) else {
            continue;
        };
        found = true;
        for part in summary.split(';') {
            let mut words = part.split_whitespace().rev();
            let (Some(kind), Some(count)) = (words.next(), words.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<u32>() else {
                continue;
            };
            match kind {
                "passed" => passed = passed.saturating_add(count),
                "failed" => failed = failed.saturating_add(count),
                _ => {}
            }
        }
    }
    if found {
        format!("{passed} passed; {failed} failed")
    } else {
        "(summary not available)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_every_result_line() {
        let out = "\
test result: ok. 5 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out
running 3 tests
test result: ok. 3 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out";
        assert_eq!(extract_test_summary(out), "8 passed; 0 failed");
    }

    #[test]
    fn missing_summary_is_reported() {
        assert_eq!(extract_test_summary("error: could not compile"), "(summary not available)");
    }
}
