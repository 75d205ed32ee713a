use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;

use crate::drill::DrillResult;

fn summary(results: &[DrillResult]) -> (usize, usize, f64) {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    #[allow(clippy::cast_precision_loss)]
    let success_rate = if total == 0 {
        0.0
    } else {
        (passed as f64 / total as f64) * 100.0
    };
    (total, passed, success_rate)
}

pub fn write_console_report<W: Write>(
    out: &mut W,
    results: &[DrillResult],
    total_duration: Duration,
) -> Result<()> {
    let (total, passed, success_rate) = summary(results);
    writeln!(out)?;
    writeln!(out, "{}", "📊 Drill Results Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "========================".cyan())?;
    writeln!(out, "Total runs: {total}")?;
    writeln!(out, "Passed: {}", passed.to_string().green())?;
    writeln!(out, "Failed: {}", (total - passed).to_string().red())?;
    writeln!(out, "Success rate: {success_rate:.1}%")?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for result in results {
        let status = if result.passed {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        let verdict = match result.verdict {
            scamsense_engine::Verdict::Safe => result.verdict.to_string().green(),
            scamsense_engine::Verdict::Compromised => result.verdict.to_string().red(),
        };
        writeln!(
            out,
            "{status} {} [{} seed {}]",
            result.scenario_id.bold(),
            result.policy,
            result.seed
        )?;
        writeln!(
            out,
            "   Score: {} | mistakes: {} | verdict: {verdict}",
            result.score, result.mistakes
        )?;
        writeln!(out, "   Path: {}", result.choices.join(" -> "))?;
        if let Some(reason) = &result.end_reason {
            writeln!(out, "   Ended: {reason}")?;
        }
        if !result.failures.is_empty() {
            writeln!(out, "   Failures:")?;
            for failure in &result.failures {
                writeln!(out, "     • {}", failure.red())?;
            }
        }
    }
    Ok(())
}

pub fn write_json_report<W: Write>(out: &mut W, results: &[DrillResult]) -> Result<()> {
    let json_output = serde_json::to_string_pretty(results)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn write_markdown_report<W: Write>(out: &mut W, results: &[DrillResult]) -> Result<()> {
    let (total, passed, success_rate) = summary(results);
    writeln!(out, "# Scamsense Drill Results\n")?;
    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Total runs**: {total}")?;
    writeln!(out, "- **Passed**: {passed}")?;
    writeln!(out, "- **Failed**: {}", total - passed)?;
    writeln!(out, "- **Success rate**: {success_rate:.1}%\n")?;

    writeln!(out, "## Detailed Results\n")?;
    writeln!(out, "| | Scenario | Policy | Seed | Score | Mistakes | Verdict |")?;
    writeln!(out, "|---|---|---|---|---|---|---|")?;
    for result in results {
        let status = if result.passed { "✅" } else { "❌" };
        writeln!(
            out,
            "| {status} | {} | {} | {} | {} | {} | {} |",
            result.scenario_id,
            result.policy,
            result.seed,
            result.score,
            result.mistakes,
            result.verdict
        )?;
    }

    let failed: Vec<&DrillResult> = results.iter().filter(|r| !r.passed).collect();
    if !failed.is_empty() {
        writeln!(out, "\n## Failures\n")?;
        for result in failed {
            writeln!(out, "### {} ({} seed {})\n", result.scenario_id, result.policy, result.seed)?;
            for failure in &result.failures {
                writeln!(out, "- {failure}")?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}
