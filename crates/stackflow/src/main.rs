mod commands;
mod exit_code;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use stackflow_cloud::StackError;
use stackflow_config::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "宣言したとおりに、何度でも、途中からでも。", long_about = None)]
struct Cli {
    /// AWSリージョン
    #[arg(long, global = true, env = "STACKFLOW_REGION")]
    region: Option<String>,

    /// AWS認証情報のプロファイル名
    #[arg(long, global = true)]
    profile: Option<String>,

    /// 詳細ログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// 実行系コマンド共通のオプション
#[derive(Args)]
struct RunArgs {
    /// グラフ定義ファイル（省略時は stack.kdl などを探索）
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// 同時に実行するリソース操作の上限
    #[arg(long)]
    concurrency: Option<usize>,

    /// 実行全体のタイムアウト（秒）
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// 実行計画を表示（クラウドには変更を加えません）
    Plan {
        /// グラフ定義ファイル
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// 削除計画を表示
        #[arg(long)]
        destroy: bool,
        /// ドリフトしたリソースを置き換える前提で計画する
        #[arg(long)]
        replace: bool,
    },
    /// グラフ定義どおりにリソースを作成
    Apply {
        #[command(flatten)]
        run: RunArgs,
        /// ドリフトしたリソースを削除して再作成する
        #[arg(long)]
        replace: bool,
        /// 記録済みリソースの実在確認をスキップ
        #[arg(long)]
        no_refresh: bool,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 作成したリソースを逆順に削除
    Destroy {
        #[command(flatten)]
        run: RunArgs,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// グラフ定義を検証
    Validate {
        /// グラフ定義ファイル
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// 状態ファイルを管理
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

/// 状態ファイルのサブコマンド
#[derive(Subcommand)]
enum StateCommands {
    /// 記録済みリソースの一覧を表示
    List {
        /// グラフ定義ファイル（プロジェクトルートの決定に使用）
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// 記録を削除（クラウド上のリソースはそのまま）
    Forget {
        /// 論理名
        name: String,
        /// グラフ定義ファイル（プロジェクトルートの決定に使用）
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// 削除中・エラー状態のまま実体がなくなった記録を整理
    Prune {
        /// グラフ定義ファイル
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdoutはコマンドの出力に使うので、ログはstderrへ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            report_error(&e);
            ExitCode::from(exit_code::for_error(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut overrides = Settings {
        region: cli.region,
        profile: cli.profile,
        ..Default::default()
    };

    match cli.command {
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate { file } => {
            let ctx = utils::load_context(file.as_deref(), overrides)?;
            commands::validate::handle(&ctx)?;
        }
        Commands::Plan {
            file,
            destroy,
            replace,
        } => {
            if replace {
                overrides.replace = Some("replace".to_string());
            }
            let ctx = utils::load_context(file.as_deref(), overrides)?;
            commands::plan::handle(&ctx, destroy).await?;
        }
        Commands::Apply {
            run,
            replace,
            no_refresh,
            yes,
        } => {
            overrides.concurrency = run.concurrency;
            overrides.timeout_secs = run.timeout;
            if replace {
                overrides.replace = Some("replace".to_string());
            }
            if no_refresh {
                overrides.refresh = Some(false);
            }
            let ctx = utils::load_context(run.file.as_deref(), overrides)?;
            commands::apply::handle(&ctx, yes).await?;
        }
        Commands::Destroy { run, yes } => {
            overrides.concurrency = run.concurrency;
            overrides.timeout_secs = run.timeout;
            let ctx = utils::load_context(run.file.as_deref(), overrides)?;
            commands::destroy::handle(&ctx, yes).await?;
        }
        Commands::State(cmd) => {
            commands::state::handle(cmd, overrides).await?;
        }
    }

    Ok(())
}

fn report_error(err: &anyhow::Error) {
    eprintln!();
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(StackError::PartialCompletion(partial)) = err.downcast_ref::<StackError>() else {
        for cause in err.chain().skip(1) {
            eprintln!("  {} {}", "原因:".dimmed(), cause);
        }
        return;
    };

    if let Some(source) = &partial.source {
        eprintln!("  {} {}", "原因:".dimmed(), source.root_cause());
    } else {
        eprintln!("  {}", "実行は中断されました".yellow());
    }
    if !partial.completed.is_empty() {
        eprintln!(
            "  完了 ({}): {}",
            partial.completed.len(),
            partial.completed.join(", ").green()
        );
    }
    if !partial.pending.is_empty() {
        eprintln!(
            "  未完了 ({}): {}",
            partial.pending.len(),
            partial.pending.join(", ").yellow()
        );
    }
    eprintln!();
    eprintln!(
        "{}",
        "完了したリソースは記録済みです。同じコマンドを再実行すると続きから再開します。".dimmed()
    );
}
