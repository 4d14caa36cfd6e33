//! Stackflow グラフ定義の読み込み
//!
//! `stack.kdl`（または YAML / JSON）を [`ResourceGraph`] と
//! `settings` に変換します。検証は [`ResourceGraph::validate`] が行います。
//!
//! [`ResourceGraph`]: stackflow_cloud::ResourceGraph
//! [`ResourceGraph::validate`]: stackflow_cloud::ResourceGraph::validate

pub mod document;
pub mod error;
pub mod loader;
pub mod parser;

pub use document::{Document, Format};
pub use error::{DocumentError, Result};
pub use loader::{load_document, load_str};
pub use parser::{parse_kdl_str, parse_resource};
