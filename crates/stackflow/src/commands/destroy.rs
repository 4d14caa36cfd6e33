use crate::utils::{self, Context};
use colored::Colorize;
use stackflow_cloud::{Engine, Ledger};
use std::sync::Arc;

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    println!("{}", "リソースを削除中...".yellow());
    utils::print_loaded_graph_file(ctx);

    let (lock, ledger) = utils::open_locked(ctx.state_manager()).await?;
    let result = run(ctx, ledger, yes).await;
    lock.release().await?;
    result
}

async fn run(ctx: &Context, ledger: Arc<Ledger>, yes: bool) -> anyhow::Result<()> {
    if ledger.list().await.is_empty() {
        println!();
        println!("{}", "✓ 削除するリソースはありません".green());
        return Ok(());
    }

    let options = utils::engine_options(&ctx.settings)?;
    let provider = utils::aws_provider(&ctx.settings).await?;
    let cancel = utils::cancellation(ctx.settings.timeout_secs);
    let engine = Engine::new(provider, ledger)
        .with_options(options)
        .with_cancellation(cancel);

    let plan = engine.preview_destroy(&ctx.document.graph).await?;
    if plan.actions.is_empty() {
        println!();
        println!("{}", "✓ グラフ定義に対応する記録済みリソースはありません".green());
        return Ok(());
    }
    utils::print_plan(&plan);

    if !yes {
        println!();
        println!(
            "{}",
            "警告: 上記のリソースを作成と逆の順序で削除します。".yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let report = engine.destroy(&ctx.document.graph).await?;

    utils::print_report(&report);
    println!();
    println!("{}", "✓ すべてのリソースを削除しました！".green().bold());

    Ok(())
}
