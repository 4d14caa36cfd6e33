use colored::Colorize;
use stackflow_cloud::{
    Action, ActionType, ApplyReport, CloudProvider, EngineOptions, Ledger, Plan, ReplacePolicy,
    RetryConfig, StateLock, StateManager,
};
use stackflow_config::Settings;
use stackflow_core::Document;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 読み込んだプロジェクト
pub struct Context {
    pub graph_file: PathBuf,
    pub project_root: PathBuf,
    pub document: Document,
    pub settings: Settings,
}

impl Context {
    pub fn state_manager(&self) -> StateManager {
        StateManager::new(&self.project_root)
    }
}

/// グラフ定義ファイルを決定する
///
/// `-f` 指定 → STACKFLOW_GRAPH / カレントディレクトリ → 親ディレクトリを遡って探索
pub fn locate_graph_file(file: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }
    match stackflow_config::find_graph_file() {
        Ok(path) => Ok(path),
        Err(stackflow_config::ConfigError::GraphFileNotFound) => {
            let root = stackflow_config::find_project_root()?;
            stackflow_config::graph_file_in(&root)
                .ok_or_else(|| stackflow_config::ConfigError::GraphFileNotFound.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// グラフ定義と設定をロード
///
/// 設定の優先順位: ユーザー設定ファイル ← グラフ定義の settings ← 環境変数 ← CLIフラグ
pub fn load_context(file: Option<&Path>, overrides: Settings) -> anyhow::Result<Context> {
    let graph_file = locate_graph_file(file)?;
    let document = stackflow_core::load_document(&graph_file)?;

    let settings = Settings::from_user_config()?
        .merge(Settings::from_document(&document.settings)?)
        .merge(Settings::from_env()?)
        .merge(overrides);
    settings.validate()?;

    Ok(Context {
        project_root: stackflow_config::project_root_of(&graph_file),
        graph_file,
        document,
        settings,
    })
}

/// 状態ファイルだけを扱うコマンド用にプロジェクトルートを決定
pub fn locate_project_root(file: Option<&Path>) -> anyhow::Result<PathBuf> {
    match file {
        Some(file) => Ok(stackflow_config::project_root_of(file)),
        None => Ok(stackflow_config::find_project_root()?),
    }
}

pub fn engine_options(settings: &Settings) -> anyhow::Result<EngineOptions> {
    let defaults = EngineOptions::default();
    let retry_defaults = RetryConfig::default();

    let replace_policy = match settings.replace.as_deref() {
        Some(policy) => policy.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => ReplacePolicy::default(),
    };

    Ok(EngineOptions {
        retry: RetryConfig {
            max_attempts: settings
                .retry
                .max_attempts
                .unwrap_or(retry_defaults.max_attempts),
            initial_delay: settings
                .retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.initial_delay),
            max_delay: settings
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            ..retry_defaults
        },
        concurrency: settings.concurrency.unwrap_or(defaults.concurrency),
        replace_policy,
        refresh: settings.refresh.unwrap_or(defaults.refresh),
    })
}

pub async fn open_ledger(manager: StateManager) -> anyhow::Result<Arc<Ledger>> {
    Ok(Arc::new(Ledger::open(manager).await?))
}

/// 状態ロックを取得してから状態ファイルを読み込む
pub async fn open_locked(manager: StateManager) -> anyhow::Result<(StateLock, Arc<Ledger>)> {
    let (lock, ledger) = Ledger::open_locked(manager).await?;
    Ok((lock, Arc::new(ledger)))
}

/// AWSプロバイダーを初期化し、認証を確認する
pub async fn aws_provider(settings: &Settings) -> anyhow::Result<Arc<dyn CloudProvider>> {
    let region = settings.region.as_deref().ok_or_else(|| {
        anyhow::anyhow!(
            "リージョンが指定されていません\nヒント: --region / STACKFLOW_REGION / AWS_REGION、またはグラフ定義の settings {{ region \"...\" }} で指定してください"
        )
    })?;

    let provider =
        stackflow_cloud_aws::AwsProvider::new(region, settings.profile.as_deref()).await;
    println!("{}", "AWS認証を確認中...".blue());
    let auth = provider.check_auth().await?;
    if !auth.authenticated {
        anyhow::bail!(
            "AWS認証に失敗しました: {}",
            auth.error.unwrap_or_else(|| "不明なエラー".to_string())
        );
    }
    if let Some(account) = &auth.account_info {
        println!("  ✓ {} ({})", account.cyan(), region);
    }

    Ok(Arc::new(provider))
}

/// Ctrl-C とタイムアウトでキャンセルされるトークン
pub fn cancellation(timeout_secs: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "中断しています... 実行中の操作の完了を待ちます".yellow()
            );
            on_signal.cancel();
        }
    });

    if let Some(secs) = timeout_secs {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if !on_timeout.is_cancelled() {
                eprintln!(
                    "{}",
                    format!("タイムアウト ({}秒) に達したため中断します", secs).yellow()
                );
                on_timeout.cancel();
            }
        });
    }

    token
}

/// 読み込んだグラフ定義ファイルを表示
pub fn print_loaded_graph_file(ctx: &Context) {
    println!(
        "📄 グラフ定義: {} ({}個のリソース)",
        ctx.graph_file.display().to_string().cyan(),
        ctx.document.graph.len()
    );
}

fn action_marker(action_type: ActionType) -> colored::ColoredString {
    match action_type {
        ActionType::Create => "+".green().bold(),
        ActionType::Pending => "+".green(),
        ActionType::NoOp => "=".dimmed(),
        ActionType::Replace => "±".yellow().bold(),
        ActionType::Conflict => "!".red().bold(),
        ActionType::Orphan => "?".yellow(),
        ActionType::Delete => "-".red().bold(),
    }
}

fn print_action(action: &Action) {
    let mut line = format!(
        "  {} {} ({})",
        action_marker(action.action_type),
        action.name.cyan(),
        action.kind
    );
    if let Some(id) = &action.external_id {
        line.push_str(&format!(" {}", id.dimmed()));
    }
    println!("{}", line);
    if let Some(reason) = &action.reason {
        println!("      {}", reason.dimmed());
    }
}

/// 実行計画を表示
pub fn print_plan(plan: &Plan) {
    println!();
    println!(
        "{}",
        format!("実行計画 ({} 件):", plan.actions.len()).bold()
    );
    for action in &plan.actions {
        print_action(action);
    }
    println!();
    println!("  {}", plan.summary());
}

/// 実行結果を表示
pub fn print_report(report: &ApplyReport) {
    println!();
    for name in &report.created {
        println!("  {} {} 作成", "✓".green(), name.cyan());
    }
    for name in &report.replaced {
        println!("  {} {} 置き換え", "✓".yellow(), name.cyan());
    }
    for name in &report.deleted {
        println!("  {} {} 削除", "✓".red(), name.cyan());
    }
    if !report.reused.is_empty() {
        println!(
            "  {}",
            format!("{} 個のリソースは変更なし", report.reused.len()).dimmed()
        );
    }
    println!(
        "  {}",
        format!("所要時間: {:.1}秒", report.duration_ms as f64 / 1000.0).dimmed()
    );
}
