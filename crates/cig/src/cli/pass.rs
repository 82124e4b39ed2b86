//! `cig pass` command implementation.

use std::path::Path;

use cig::records::read_jsonl;
use cig::{IndexJob, IndexMode};
use colored::Colorize;

use super::Context;
use super::display::{print_count, print_list};

/// Run the pass command.
pub async fn run(
    ctx: &Context,
    sha: String,
    mode: IndexMode,
    changed_files: Vec<String>,
    removed_files: Vec<String>,
    records: Option<&Path>,
) -> cig::Result<()> {
    let values = match records {
        Some(path) => read_jsonl(path).await?,
        None => Vec::new(),
    };

    let job = IndexJob {
        scope: ctx.scope.clone(),
        sha,
        mode,
        changed_files,
        removed_files,
    };

    println!(
        "{} {} pass for {} at {}...",
        "Running".cyan().bold(),
        mode.as_str(),
        job.scope.to_string().cyan(),
        job.sha
    );

    let report = ctx.engine.run_pass(&job, values).await?;

    println!();
    print_count("Pruned nodes", report.pruned.nodes());
    print_count("Embedded nodes", report.embedded_nodes);
    print_count("Ingested records", report.ingested.written.total());
    match report.mismatches {
        Some(count) => print_count("Dependency mismatches", count),
        None => println!("  {}: {}", "Dependency mismatches".white().bold(), "skipped".yellow()),
    }
    print_count("Flow graphs", report.flow_graphs.materialized.len());
    if !report.flow_graphs.skipped.is_empty() {
        println!(
            "  {}: {} entrypoints without a resolvable symbol",
            "Skipped".yellow(),
            report.flow_graphs.skipped.len()
        );
    }
    print_count("Stale doc blocks", report.stale_blocks);

    if let Some(impact) = &report.impact {
        println!();
        println!(
            "  {} ({} symbols):",
            "Impacted".white().bold(),
            impact.impacted_symbol_uids.len().to_string().yellow()
        );
        print_list(&impact.impacted_symbol_uids, "(none)");
        println!(
            "  {} ({} files):",
            "Reparsed".white().bold(),
            impact.reparsed_files.len().to_string().yellow()
        );
        print_list(&impact.reparsed_files, "(none)");
    }

    Ok(())
}
