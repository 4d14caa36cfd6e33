//! グラフ定義ドキュメント

use serde_json::{Map, Value};
use stackflow_cloud::ResourceGraph;
use std::path::{Path, PathBuf};

/// グラフ定義ファイルの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Kdl,
    Yaml,
    Json,
}

impl Format {
    /// 拡張子から形式を判定
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "kdl" => Some(Format::Kdl),
            "yaml" | "yml" => Some(Format::Yaml),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Kdl => write!(f, "kdl"),
            Format::Yaml => write!(f, "yaml"),
            Format::Json => write!(f, "json"),
        }
    }
}

/// 読み込んだグラフ定義
#[derive(Debug, Clone)]
pub struct Document {
    /// 読み込み元のファイル
    pub path: PathBuf,

    /// `settings` ブロックの内容（解釈は stackflow-config が行う）
    pub settings: Map<String, Value>,

    pub graph: ResourceGraph,
}

impl Document {
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }
}
