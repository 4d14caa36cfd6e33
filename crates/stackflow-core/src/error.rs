use stackflow_cloud::GraphError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("KDLパースエラー: {path}\n理由: {source}")]
    Kdl {
        path: PathBuf,
        #[source]
        source: kdl::KdlError,
    },

    #[error("YAMLパースエラー: {path}\n理由: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSONパースエラー: {path}\n理由: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ファイル読み込みエラー: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("無効なノード: {path}\n理由: {message}")]
    InvalidNode { path: PathBuf, message: String },

    #[error("未対応のファイル形式です: {0}\nヒント: .kdl / .yaml / .yml / .json を使用してください")]
    UnsupportedFormat(PathBuf),

    #[error("リソースグラフエラー: {path}\n理由: {source}")]
    Graph {
        path: PathBuf,
        #[source]
        source: GraphError,
    },
}

pub type Result<T> = std::result::Result<T, DocumentError>;
