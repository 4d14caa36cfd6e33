use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "グラフ定義ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: stack.kdl, stack.yaml, stack.yml, stack.json\n\
        - ./.stackflow/ ディレクトリ\n\
        または STACKFLOW_GRAPH 環境変数で直接指定できます"
    )]
    GraphFileNotFound,

    #[error(
        "プロジェクトルートが見つかりません\n探索開始位置: {0}\nヒント: stack.kdl ファイルを含むディレクトリで実行してください"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("無効な設定値: {key}={value}\n理由: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("settings ブロックが不正です: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    #[error("ユーザー設定ファイルが不正です: {path}\n理由: {source}")]
    InvalidUserSettings {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
