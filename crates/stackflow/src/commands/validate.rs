use crate::utils::Context;
use colored::Colorize;
use stackflow_cloud::StackError;
use std::collections::BTreeMap;

pub fn handle(ctx: &Context) -> anyhow::Result<()> {
    println!("{}", "グラフ定義を検証中...".blue());
    crate::utils::print_loaded_graph_file(ctx);

    let graph = &ctx.document.graph;
    graph.validate()?;

    let plan = stackflow_cloud::resolve(graph).map_err(StackError::from)?;
    let layers = plan.layers();

    println!("{}", "✓ グラフ定義は正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  リソース: {}個", graph.len());

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    for node in graph.iter() {
        *kinds.entry(node.kind.to_string()).or_default() += 1;
    }
    for (kind, count) in &kinds {
        println!("    - {} × {}", kind.cyan(), count);
    }

    println!("  実行順序 ({}段):", layers.len());
    for (depth, layer) in layers.iter().enumerate() {
        println!("    {}. {}", depth + 1, layer.join(", "));
    }

    if let Some(region) = &ctx.settings.region {
        println!("  リージョン: {}", region.cyan());
    }
    if let Some(profile) = &ctx.settings.profile {
        println!("  プロファイル: {}", profile.cyan());
    }

    Ok(())
}
