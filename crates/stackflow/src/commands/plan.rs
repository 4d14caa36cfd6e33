use crate::utils::{self, Context};
use colored::Colorize;
use stackflow_cloud::Engine;
use std::sync::Arc;

pub async fn handle(ctx: &Context, destroy: bool) -> anyhow::Result<()> {
    if destroy {
        println!("{}", "削除計画を作成中...".blue());
    } else {
        println!("{}", "実行計画を作成中...".blue());
    }
    utils::print_loaded_graph_file(ctx);

    let ledger = utils::open_ledger(ctx.state_manager()).await?;
    // 計画の作成はプロバイダーを呼び出さない
    let provider = stackflow_cloud_aws::AwsProvider::new(
        ctx.settings.region.as_deref().unwrap_or_default(),
        ctx.settings.profile.as_deref(),
    )
    .await;
    let engine = Engine::new(Arc::new(provider), ledger)
        .with_options(utils::engine_options(&ctx.settings)?);

    let plan = if destroy {
        engine.preview_destroy(&ctx.document.graph).await?
    } else {
        engine.preview(&ctx.document.graph).await?
    };
    utils::print_plan(&plan);

    println!();
    if !plan.has_changes {
        println!("{}", "✓ 変更はありません".green());
    } else if plan.has_conflicts() {
        println!(
            "{}",
            "⚠ ドリフトがあります。置き換えるには --replace を指定してください".yellow()
        );
    } else if destroy {
        println!("{}", "削除するには: stack destroy --yes".dimmed());
    } else {
        println!("{}", "適用するには: stack apply".dimmed());
    }

    Ok(())
}
