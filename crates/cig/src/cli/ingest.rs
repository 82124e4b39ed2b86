//! `cig ingest` command implementation.

use std::path::Path;

use cig::records::read_jsonl;
use colored::Colorize;

use super::Context;
use super::display::print_count;

/// Run the ingest command.
pub async fn run(ctx: &Context, file: &Path) -> cig::Result<()> {
    let values = read_jsonl(file).await?;
    println!(
        "{} {} records from {}...",
        "Ingesting".cyan().bold(),
        values.len(),
        file.display()
    );

    let summary = ctx.engine.pipeline().ingest_records(&ctx.scope, values)?;

    println!();
    println!(
        "{} {} records into {}",
        "Wrote".green().bold(),
        summary.written.total(),
        ctx.scope.to_string().cyan()
    );
    print_count("Nodes", summary.written.nodes);
    print_count("Edges", summary.written.edges);
    print_count("Occurrences", summary.written.occurrences);
    print_count("Entrypoints", summary.written.entrypoints);
    print_count("Dependencies", summary.written.dependencies);
    print_count("Mismatches", summary.written.mismatches);
    print_count("Diagnostics", summary.written.diagnostics);
    print_count("Unresolved imports", summary.written.unresolved_imports);

    let duplicates = summary.received.saturating_sub(summary.written.total());
    if duplicates > 0 {
        println!(
            "{}: {} duplicate records collapsed",
            "Note".dimmed(),
            duplicates
        );
    }

    Ok(())
}
