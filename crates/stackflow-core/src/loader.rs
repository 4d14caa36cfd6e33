//! ファイル形式を判定してグラフ定義をロード

use crate::document::{Document, Format};
use crate::error::{DocumentError, Result};
use crate::parser::parse_kdl_str;
use serde::Deserialize;
use serde_json::{Map, Value};
use stackflow_cloud::{ResourceGraph, ResourceNode};
use std::path::Path;
use tracing::{debug, info, instrument};

/// YAML / JSON のドキュメント構造
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentSpec {
    #[serde(default)]
    settings: Map<String, Value>,

    #[serde(default)]
    resources: Vec<ResourceNode>,
}

/// グラフ定義ファイルをロード
#[instrument(fields(path = %path.display()))]
pub fn load_document(path: &Path) -> Result<Document> {
    let format =
        Format::from_path(path).ok_or_else(|| DocumentError::UnsupportedFormat(path.to_path_buf()))?;
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(%format, bytes = content.len(), "Read graph document");

    let document = load_str(&content, format, path)?;
    info!(resources = document.graph.len(), "Loaded graph document");
    Ok(document)
}

/// 文字列からロード
///
/// `path` はエラーメッセージと [`Document::path`] に使われます。
pub fn load_str(content: &str, format: Format, path: &Path) -> Result<Document> {
    let spec: DocumentSpec = match format {
        Format::Kdl => return parse_kdl_str(content, path),
        Format::Yaml => serde_yaml::from_str(content).map_err(|source| DocumentError::Yaml {
            path: path.to_path_buf(),
            source,
        })?,
        Format::Json => serde_json::from_str(content).map_err(|source| DocumentError::Json {
            path: path.to_path_buf(),
            source,
        })?,
    };

    let graph = ResourceGraph::from_nodes(spec.resources).map_err(|source| DocumentError::Graph {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Document {
        path: path.to_path_buf(),
        settings: spec.settings,
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackflow_cloud::{GraphError, ResourceKind};
    use std::fs;

    const YAML: &str = r#"
settings:
  region: us-west-1
resources:
  - name: main-vpc
    kind: network
    params:
      cidr_block: 10.0.0.0/16
  - name: subnet-a
    kind: subnet
    params:
      network: ${main-vpc}
      cidr_block: 10.0.1.0/24
    depends_on: [main-vpc]
"#;

    #[test]
    fn test_load_yaml() {
        let doc = load_str(YAML, Format::Yaml, Path::new("stack.yaml")).unwrap();
        assert_eq!(doc.setting("region"), Some(&json!("us-west-1")));
        assert_eq!(doc.graph.len(), 2);
        let subnet = doc.graph.get("subnet-a").unwrap();
        assert_eq!(subnet.kind, ResourceKind::Subnet);
        assert_eq!(subnet.depends_on, vec!["main-vpc".to_string()]);
        assert!(doc.graph.validate().is_ok());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.json");
        fs::write(
            &path,
            r#"{"resources": [{"name": "igw", "kind": "internet-gateway", "params": {"network": "vpc-0abc"}}]}"#,
        )
        .unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.path, path);
        assert!(doc.settings.is_empty());
        assert_eq!(doc.graph.get("igw").unwrap().kind, ResourceKind::InternetGateway);
    }

    #[test]
    fn test_load_kdl_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.kdl");
        fs::write(&path, r#"resource "vpc" kind="network" { cidr_block "10.0.0.0/16"; }"#)
            .unwrap();
        assert_eq!(load_document(&path).unwrap().graph.len(), 1);
    }

    #[test]
    fn test_unknown_kind_is_a_parse_error() {
        let yaml = "resources:\n  - name: db\n    kind: database\n";
        assert!(matches!(
            load_str(yaml, Format::Yaml, Path::new("stack.yaml")),
            Err(DocumentError::Yaml { .. })
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let json = r#"{"resources": [
            {"name": "vpc", "kind": "network"},
            {"name": "vpc", "kind": "network"}
        ]}"#;
        match load_str(json, Format::Json, Path::new("stack.json")) {
            Err(DocumentError::Graph {
                source: GraphError::DuplicateName(name),
                ..
            }) => assert_eq!(name, "vpc"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_document(Path::new("stack.toml")),
            Err(DocumentError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_document(&dir.path().join("stack.kdl")),
            Err(DocumentError::Io { .. })
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/stack.YML")), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("stack")), None);
    }
}
