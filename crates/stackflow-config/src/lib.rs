pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{REPLACE_POLICIES, RetrySettings, Settings};

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// グラフ定義ファイルの候補（優先順）
pub const GRAPH_FILE_CANDIDATES: &[&str] = &["stack.kdl", "stack.yaml", "stack.yml", "stack.json"];

/// プロジェクト用ディレクトリ（状態ファイルもここに置かれる）
pub const PROJECT_DIR: &str = ".stackflow";

/// ユーザー設定ファイル名（設定ディレクトリ直下）
pub const USER_SETTINGS_FILE: &str = "settings.json";

/// Stackflowの設定ディレクトリを取得 (`~/.config/stackflow` など)
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("stackflow"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// ユーザー設定ファイルのパス
pub fn user_settings_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(USER_SETTINGS_FILE))
}

/// ディレクトリ内のグラフ定義ファイルを探す
///
/// `dir` 直下、`dir/.stackflow/` の順に候補を確認します。
pub fn graph_file_in(dir: &Path) -> Option<PathBuf> {
    let project_dir = dir.join(PROJECT_DIR);
    [dir.to_path_buf(), project_dir]
        .iter()
        .flat_map(|base| GRAPH_FILE_CANDIDATES.iter().map(move |name| base.join(name)))
        .find(|path| path.is_file())
}

/// グラフ定義ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_GRAPH (直接パス指定)
/// 2. カレントディレクトリ: stack.kdl, stack.yaml, stack.yml, stack.json
/// 3. ./.stackflow/ ディレクトリ内: 同様の順序
pub fn find_graph_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(graph_path) = std::env::var("STACKFLOW_GRAPH") {
        let path = PathBuf::from(&graph_path);
        if path.exists() {
            return Ok(path);
        }
        warn!(path = %graph_path, "STACKFLOW_GRAPH does not exist, falling back to discovery");
    }

    // 2, 3. カレントディレクトリと ./.stackflow/
    let current_dir = std::env::current_dir()?;
    graph_file_in(&current_dir).ok_or(ConfigError::GraphFileNotFound)
}

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_PROJECT_ROOT
/// 2. カレントディレクトリから上に向かってグラフ定義ファイルを探す
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    // 1. 環境変数
    if let Ok(root) = std::env::var("STACKFLOW_PROJECT_ROOT") {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking STACKFLOW_PROJECT_ROOT");
        if graph_file_in(&path).is_some() {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    // 2. カレントディレクトリから上に向かって探す
    let start_dir = std::env::current_dir()?;
    let mut current = start_dir.clone();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if let Some(file) = graph_file_in(&current) {
            info!(project_root = %current.display(), file = %file.display(), "Found project root");
            return Ok(current);
        }

        // 親ディレクトリへ
        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(ConfigError::ProjectRootNotFound(start_dir))
}

/// グラフ定義ファイルが属するプロジェクトルート
///
/// `.stackflow/` 内のファイルならその親ディレクトリになります。
pub fn project_root_of(graph_file: &Path) -> PathBuf {
    let parent = graph_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if parent.file_name().is_some_and(|name| name == PROJECT_DIR) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("stackflow"));
        assert!(user_settings_path().unwrap().ends_with("stackflow/settings.json"));
    }

    #[test]
    fn test_graph_file_in_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("stack.json"), "{}").unwrap();
        fs::write(temp_dir.path().join("stack.kdl"), "// kdl").unwrap();

        // stack.kdl が優先される
        let found = graph_file_in(temp_dir.path()).unwrap();
        assert!(found.ends_with("stack.kdl"));
    }

    #[test]
    fn test_graph_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_dir = temp_dir.path().join(PROJECT_DIR);
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("stack.yaml"), "resources: []").unwrap();

        let found = graph_file_in(temp_dir.path()).unwrap();
        assert!(found.ends_with(".stackflow/stack.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_graph_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.kdl"), "// test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_graph_file();
        assert!(result.unwrap().ends_with("stack.kdl"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_graph_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph_path = temp_dir.path().join("custom.yaml");
        fs::write(&graph_path, "resources: []").unwrap();

        unsafe {
            std::env::set_var("STACKFLOW_GRAPH", graph_path.to_str().unwrap());
        }

        let result = find_graph_file().unwrap();
        assert_eq!(result, graph_path);

        unsafe {
            std::env::remove_var("STACKFLOW_GRAPH");
        }
    }

    #[test]
    #[serial]
    fn test_find_graph_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_graph_file();
        assert!(matches!(result, Err(ConfigError::GraphFileNotFound)));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_root_walks_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stack.kdl"), "// root").unwrap();
        let nested = temp_dir.path().join("modules").join("web");
        fs::create_dir_all(&nested).unwrap();
        std::env::set_current_dir(&nested).unwrap();

        let root = find_project_root().unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            temp_dir.path().canonicalize().unwrap()
        );

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_root_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("stack.json"), "{}").unwrap();

        unsafe {
            std::env::set_var("STACKFLOW_PROJECT_ROOT", temp_dir.path());
        }

        let root = find_project_root().unwrap();
        assert_eq!(root, temp_dir.path());

        unsafe {
            std::env::remove_var("STACKFLOW_PROJECT_ROOT");
        }
    }

    #[test]
    fn test_project_root_of() {
        assert_eq!(
            project_root_of(Path::new("/work/app/.stackflow/stack.kdl")),
            PathBuf::from("/work/app")
        );
        assert_eq!(
            project_root_of(Path::new("/work/app/stack.kdl")),
            PathBuf::from("/work/app")
        );
        assert_eq!(project_root_of(Path::new("stack.kdl")), PathBuf::from("."));
    }
}
