use crate::StateCommands;
use crate::utils;
use colored::Colorize;
use stackflow_cloud::{Engine, EngineOptions, Ledger, RecordStatus, StateManager};
use std::sync::Arc;
use stackflow_config::Settings;

pub async fn handle(cmd: StateCommands, overrides: Settings) -> anyhow::Result<()> {
    match cmd {
        StateCommands::List { file } => {
            let root = utils::locate_project_root(file.as_deref())?;
            let manager = StateManager::new(&root);
            let ledger = utils::open_ledger(manager.clone()).await?;
            let records = ledger.list().await;

            println!(
                "状態ファイル: {}",
                manager.state_path().display().to_string().cyan()
            );
            if records.is_empty() {
                println!("{}", "記録されたリソースはありません".dimmed());
                return Ok(());
            }

            println!();
            println!("{}", format!("記録済みリソース ({} 個):", records.len()).bold());
            for record in &records {
                let status = match record.status {
                    RecordStatus::Ready => record.status.to_string().green(),
                    RecordStatus::Deleting => record.status.to_string().yellow(),
                    RecordStatus::Error => record.status.to_string().red(),
                };
                println!(
                    "  {:>3}. {} ({}) [{}]",
                    record.sequence,
                    record.logical_name.cyan(),
                    record.kind,
                    status
                );
                println!(
                    "       {} {}",
                    record.external_id,
                    record
                        .created_at
                        .format("%Y-%m-%d %H:%M:%S UTC")
                        .to_string()
                        .dimmed()
                );
            }
        }
        StateCommands::Forget { name, file } => {
            let root = utils::locate_project_root(file.as_deref())?;
            let manager = StateManager::new(&root);
            let (lock, ledger) = utils::open_locked(manager).await?;
            let result = ledger.forget(&name).await;
            lock.release().await?;
            let record = result?;

            println!(
                "{} {} ({}) を状態ファイルから削除しました",
                "✓".green(),
                record.logical_name.cyan(),
                record.external_id
            );
            println!(
                "{}",
                "  クラウド上のリソースは削除されていません".dimmed()
            );
        }
        StateCommands::Prune { file } => {
            let ctx = utils::load_context(file.as_deref(), overrides)?;
            let options = utils::engine_options(&ctx.settings)?;
            let (lock, ledger) = utils::open_locked(ctx.state_manager()).await?;
            let result = prune(&ctx, options, ledger).await;
            lock.release().await?;
            let pruned = result?;

            if pruned.is_empty() {
                println!("{}", "✓ 整理する記録はありません".green());
            } else {
                for name in &pruned {
                    println!("  {} {}", "✓".green(), name.cyan());
                }
                println!(
                    "{}",
                    format!("✓ {} 件の記録を整理しました", pruned.len()).green().bold()
                );
            }
        }
    }

    Ok(())
}

async fn prune(
    ctx: &utils::Context,
    options: EngineOptions,
    ledger: Arc<Ledger>,
) -> anyhow::Result<Vec<String>> {
    let provider = utils::aws_provider(&ctx.settings).await?;
    let engine = Engine::new(provider, ledger)
        .with_options(options)
        .with_cancellation(utils::cancellation(ctx.settings.timeout_secs));
    Ok(engine.prune().await?)
}
