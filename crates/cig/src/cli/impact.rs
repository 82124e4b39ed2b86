//! `cig impact` and `cig blast-radius` command implementations.

use cig::{Direction, ImpactAnalyzer, blast_radius};
use colored::Colorize;

use super::Context;
use super::display::print_list;

/// Run the impact command.
pub fn run(ctx: &Context, files: &[String], depth: Option<u32>) -> cig::Result<()> {
    let depth = depth.unwrap_or(ctx.config().impact.depth);
    let report = ImpactAnalyzer::new(ctx.store()).compute_impact(&ctx.scope, files, depth)?;

    println!(
        "Impact analysis for {} files (depth {}):",
        files.len().to_string().cyan().bold(),
        depth
    );
    println!();

    println!(
        "  {} ({} symbols):",
        "Changed".white().bold(),
        report.changed_symbol_uids.len().to_string().green()
    );
    print_list(&report.changed_symbol_uids, "(no indexed symbols)");
    println!();

    println!(
        "  {} ({} symbols):",
        "Impacted".white().bold(),
        report.impacted_symbol_uids.len().to_string().yellow()
    );
    print_list(&report.impacted_symbol_uids, "(none)");
    println!();

    println!(
        "  {} ({} files):",
        "Files to refresh".white().bold(),
        report.reparsed_files.len().to_string().yellow()
    );
    print_list(&report.reparsed_files, "(none)");

    Ok(())
}

/// Run the blast-radius command.
pub fn run_blast_radius(
    ctx: &Context,
    symbol: &str,
    depth: u32,
    direction: Direction,
) -> cig::Result<()> {
    if ctx.store().get_node_by_symbol_uid(&ctx.scope, symbol)?.is_none() {
        return Err(cig::Error::NotFound(format!("symbol `{symbol}`")));
    }

    let reached: Vec<String> = blast_radius(ctx.store(), &ctx.scope, symbol, depth, direction)?
        .into_iter()
        .collect();

    println!(
        "Blast radius of {} ({}, depth {}): {} symbols",
        symbol.cyan().bold(),
        direction.as_str(),
        depth,
        reached.len().to_string().yellow()
    );
    println!();
    print_list(&reached, "(isolated)");

    Ok(())
}
