//! `cig stats` command implementation.

use colored::Colorize;

use super::Context;
use super::display::print_count;

/// Run the stats command.
pub fn run(ctx: &Context) -> cig::Result<()> {
    let stats = ctx.store().stats(&ctx.scope)?;
    let backend = ctx.config().storage_backend(&ctx.workspace);

    println!("{}", "CIG Graph Statistics".cyan().bold());
    println!();
    println!("  {}: {}", "Scope".white().bold(), ctx.scope);
    match backend.data_path() {
        Some(path) => println!("  {}: {}", "Database".white().bold(), path.display()),
        None => println!("  {}: {}", "Database".white().bold(), "in-memory".dimmed()),
    }
    println!();

    print_count("Nodes", stats.nodes);
    print_count("Edges", stats.edges);
    print_count("Entrypoints", stats.entrypoints);
    print_count("Flow graphs", stats.flow_graphs);
    print_count("Manifests", stats.manifests);
    print_count("Declared dependencies", stats.declared_dependencies);
    print_count("Observed dependencies", stats.observed_dependencies);
    print_count("Mismatches", stats.mismatches);
    print_count("Diagnostics", stats.diagnostics);
    print_count("Unresolved imports", stats.unresolved_imports);

    if let Some(latest) = ctx.store().list_index_diagnostics(&ctx.scope)?.last() {
        println!();
        println!(
            "  {}: {} ({}, {} files changed)",
            "Last pass".white().bold(),
            latest.sha,
            latest.mode.as_str(),
            latest.changed_files.len()
        );
    }

    Ok(())
}
