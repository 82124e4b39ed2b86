//! `cig flow` command implementation.

use cig::{FlowGraph, FlowGraphMaterializer};
use colored::Colorize;

use super::Context;
use super::display::print_list;

/// Run the flow command.
pub fn run(
    ctx: &Context,
    entrypoint: Option<&str>,
    sha: &str,
    depth: Option<u32>,
    all: bool,
) -> cig::Result<()> {
    let depth = depth.unwrap_or(ctx.config().flow.depth);
    let materializer =
        FlowGraphMaterializer::new(ctx.store()).with_filter(ctx.config().flow.edge_filter());

    if all {
        let summary = materializer.materialize_all(&ctx.scope, sha, depth)?;
        println!(
            "{} {} flow graphs at {} (depth {})",
            "Materialized".green().bold(),
            summary.materialized.len(),
            sha,
            depth
        );
        let keys: Vec<String> = summary.materialized.iter().map(ToString::to_string).collect();
        print_list(&keys, "(no entrypoints)");
        if !summary.skipped.is_empty() {
            println!();
            println!("  {}:", "Skipped".yellow().bold());
            print_list(&summary.skipped, "");
        }
        return Ok(());
    }

    let Some(key) = entrypoint else {
        return Err(cig::Error::Config(
            "pass an entrypoint key or --all".to_string(),
        ));
    };

    let graph = materializer.materialize(&ctx.scope, key, sha, depth)?;
    print_flow_graph(&graph);
    Ok(())
}

fn print_flow_graph(graph: &FlowGraph) {
    println!(
        "Flow graph {} rooted at {}:",
        graph.key.to_string().cyan().bold(),
        graph.root_symbol_uid.white().bold()
    );
    println!();

    let nodes: Vec<&str> = graph.node_uids.iter().map(String::as_str).collect();
    println!(
        "  {} ({}):",
        "Symbols".white().bold(),
        nodes.len().to_string().green()
    );
    print_list(&nodes, "(none)");
    println!();

    let edges: Vec<String> = graph.edge_keys.iter().map(ToString::to_string).collect();
    println!(
        "  {} ({}):",
        "Edges".white().bold(),
        edges.len().to_string().green()
    );
    print_list(&edges, "(none)");
}
