//! KDLパーサー
//!
//! Stackflowのグラフ定義ファイル (stack.kdl) をパースします。
//!
//! ```kdl
//! settings {
//!     region "us-west-1"
//! }
//! resource "main-vpc" kind="network" {
//!     cidr_block "10.0.0.0/16"
//! }
//! ```

mod value;

pub(crate) use value::node_value;

use crate::document::Document;
use crate::error::{DocumentError, Result};
use kdl::{KdlDocument, KdlNode};
use serde_json::Map;
use stackflow_cloud::{ResourceGraph, ResourceKind, ResourceNode};
use std::path::Path;
use value::{arguments, properties};

/// パラメータではなく依存関係として扱う子ノード
const DEPENDS_ON: &str = "depends_on";

/// KDL文字列をパース
///
/// `path` はエラーメッセージ用で、読み込みは行いません。
pub fn parse_kdl_str(content: &str, path: &Path) -> Result<Document> {
    let doc: KdlDocument = content.parse().map_err(|source| DocumentError::Kdl {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |message: String| DocumentError::InvalidNode {
        path: path.to_path_buf(),
        message,
    };

    let mut settings = Map::new();
    let mut nodes = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "settings" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        settings.insert(
                            child.name().value().to_string(),
                            node_value(child).map_err(invalid)?,
                        );
                    }
                }
            }
            "resource" => {
                nodes.push(parse_resource(node).map_err(invalid)?);
            }
            other => {
                // 不明なノードはスキップ
                tracing::warn!(node = other, path = %path.display(), "Skipping unknown node");
            }
        }
    }

    let graph = ResourceGraph::from_nodes(nodes).map_err(|source| DocumentError::Graph {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Document {
        path: path.to_path_buf(),
        settings,
        graph,
    })
}

/// resource ノードをパース
pub fn parse_resource(node: &KdlNode) -> std::result::Result<ResourceNode, String> {
    let name = arguments(node)
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| "resource には名前が必要です".to_string())?
        .to_string();

    let kind: ResourceKind = properties(node)
        .find(|(key, _)| *key == "kind")
        .and_then(|(_, e)| e.value().as_string())
        .ok_or_else(|| format!("resource '{}' に kind が指定されていません", name))?
        .parse()
        .map_err(|e| format!("resource '{}': {}", name, e))?;

    let mut resource = ResourceNode::new(&name, kind);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            if key == DEPENDS_ON {
                for entry in arguments(child) {
                    let dep = entry.value().as_string().ok_or_else(|| {
                        format!("resource '{}': depends_on には名前を指定してください", name)
                    })?;
                    resource = resource.with_dependency(dep);
                }
                continue;
            }
            if resource.params.contains_key(key) {
                return Err(format!("resource '{}': '{}' が重複しています", name, key));
            }
            let value = node_value(child).map_err(|e| format!("resource '{}': {}", name, e))?;
            resource.params.insert(key.to_string(), value);
        }
    }

    Ok(resource)
}
