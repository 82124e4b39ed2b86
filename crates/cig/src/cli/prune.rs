//! `cig prune` command implementation.

use colored::Colorize;

use super::Context;
use super::display::{print_count, print_list};

/// Run the prune command.
pub fn run(ctx: &Context, files: &[String]) -> cig::Result<()> {
    let stats = ctx.store().delete_graph_for_file_paths(&ctx.scope, files)?;

    if stats.is_empty() {
        println!("Nothing indexed for {} files", files.len());
        return Ok(());
    }

    println!("{} {} files", "Pruned".green().bold(), files.len());
    println!();
    print_count("Nodes", stats.nodes());
    print_count("Edges", stats.edges);
    print_count("Occurrences", stats.occurrences);
    print_count("Entrypoints", stats.entrypoints);
    print_count("Flow graphs", stats.flow_graphs);
    print_count("Manifests", stats.manifests);
    print_count("Unresolved imports", stats.unresolved_imports);
    println!();
    println!("  {}:", "Removed symbols".white().bold());
    print_list(&stats.removed_symbol_uids, "(none)");

    Ok(())
}
