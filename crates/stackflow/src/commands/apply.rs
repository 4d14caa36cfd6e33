use crate::utils::{self, Context};
use colored::Colorize;
use stackflow_cloud::{ActionType, Engine, EngineOptions, Ledger};
use std::sync::Arc;

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    println!("{}", "リソースを適用中...".blue());
    utils::print_loaded_graph_file(ctx);

    let options = utils::engine_options(&ctx.settings)?;
    let (lock, ledger) = utils::open_locked(ctx.state_manager()).await?;
    let result = run(ctx, options, ledger, yes).await;
    lock.release().await?;
    result
}

async fn run(
    ctx: &Context,
    options: EngineOptions,
    ledger: Arc<Ledger>,
    yes: bool,
) -> anyhow::Result<()> {
    let provider = utils::aws_provider(&ctx.settings).await?;
    let cancel = utils::cancellation(ctx.settings.timeout_secs);
    let engine = Engine::new(provider, ledger)
        .with_options(options)
        .with_cancellation(cancel);

    let plan = engine.preview(&ctx.document.graph).await?;
    utils::print_plan(&plan);

    // 置き換えは既存リソースの削除を伴う
    let replacing = plan.actions_by_type(ActionType::Replace);
    if !replacing.is_empty() && !yes {
        println!();
        println!(
            "{}",
            format!(
                "警告: {} 個のリソースを削除して再作成します。",
                replacing.len()
            )
            .yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!("適用中 (同時実行数: {})...", engine.options().concurrency).bold()
    );
    let report = engine.apply(&ctx.document.graph).await?;

    utils::print_report(&report);
    println!();
    if report.is_noop() {
        println!("{}", "✓ すべてのリソースは最新です".green().bold());
    } else {
        println!("{}", "✓ 適用が完了しました！".green().bold());
    }

    Ok(())
}
