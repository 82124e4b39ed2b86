//! `cig search` command implementation.

use colored::Colorize;

use super::Context;

/// Run the search command.
pub async fn run(ctx: &Context, query: &str, limit: usize) -> cig::Result<()> {
    let hits = ctx.engine.semantic_search(&ctx.scope, query, limit).await?;

    if hits.is_empty() {
        println!("No symbols found matching \"{query}\"");

        let stats = ctx.store().stats(&ctx.scope)?;
        if stats.nodes == 0 {
            println!(
                "\n{}: The graph is empty. Run '{}' first.",
                "hint".dimmed(),
                "cig ingest".cyan()
            );
        } else {
            println!(
                "\n{}: Only nodes with embeddings of length {} are searchable.",
                "hint".dimmed(),
                ctx.config().embedding.dimensions
            );
        }
        return Ok(());
    }

    println!(
        "Found {} symbols matching \"{}\":",
        hits.len().to_string().green().bold(),
        query.cyan()
    );
    println!();

    for hit in &hits {
        let name = if hit.node.qualified_name.is_empty() {
            &hit.node.symbol_uid
        } else {
            &hit.node.qualified_name
        };
        println!(
            "  {} {} {}",
            format!("{:.3}", hit.score).yellow(),
            name.white().bold(),
            hit.node.file_path.dimmed()
        );
    }

    Ok(())
}
