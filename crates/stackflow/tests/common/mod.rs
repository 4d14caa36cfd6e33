use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_stack_kdl(&self, content: &str) {
        self.write_file("stack.kdl", content);
    }

    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// ユーザー設定ディレクトリとして使う場所
    pub fn config_home(&self) -> PathBuf {
        self.path().join(".config-home")
    }

    /// プロジェクトルートで `stack` を実行するコマンド（AWS関連の環境変数は除去）
    #[allow(deprecated)]
    pub fn stack(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("stack").unwrap();
        cmd.current_dir(self.path())
            .env_remove("STACKFLOW_REGION")
            .env_remove("AWS_REGION")
            .env_remove("STACKFLOW_GRAPH")
            .env_remove("STACKFLOW_PROJECT_ROOT")
            .env_remove("STACKFLOW_CONCURRENCY")
            .env_remove("STACKFLOW_REPLACE")
            .env_remove("STACKFLOW_TIMEOUT")
            .env_remove("STACKFLOW_PROFILE")
            .env("XDG_CONFIG_HOME", self.config_home())
            .env("NO_COLOR", "1");
        cmd
    }
}
