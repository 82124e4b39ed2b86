//! `cig mismatches` command implementation.

use cig::mismatch;
use colored::Colorize;

use super::Context;

/// Run the mismatches command.
pub fn run(ctx: &Context, sha: Option<&str>, recompute: bool) -> cig::Result<()> {
    if recompute && let Some(sha) = sha {
        let count = mismatch::recompute(ctx.store(), &ctx.scope, sha)?;
        println!(
            "{} {} mismatches at {}",
            "Recomputed".green().bold(),
            count,
            sha
        );
        println!();
    }

    let mismatches = ctx.store().list_dependency_mismatches(&ctx.scope, sha)?;
    if mismatches.is_empty() {
        println!("No dependency mismatches");
        return Ok(());
    }

    println!(
        "Found {} dependency mismatches:",
        mismatches.len().to_string().yellow().bold()
    );
    println!();

    for m in &mismatches {
        println!(
            "  {} {} {}",
            m.mismatch_type.as_str().yellow(),
            m.package_key.white().bold(),
            format!("@{}", m.sha).dimmed()
        );
        println!("    {}", m.details.to_string().dimmed());
    }

    Ok(())
}
