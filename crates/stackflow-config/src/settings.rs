//! 実行設定
//!
//! 優先順位（後勝ち）: デフォルト ← ユーザー設定ファイル ← グラフ定義の `settings` ← 環境変数 ← CLIフラグ

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// 有効な置き換えポリシー
pub const REPLACE_POLICIES: &[&str] = &["fail", "replace"];

/// リトライ設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

impl RetrySettings {
    fn merge(&mut self, other: RetrySettings) {
        if other.max_attempts.is_some() {
            self.max_attempts = other.max_attempts;
        }
        if other.initial_delay_ms.is_some() {
            self.initial_delay_ms = other.initial_delay_ms;
        }
        if other.max_delay_ms.is_some() {
            self.max_delay_ms = other.max_delay_ms;
        }
    }
}

/// 実行設定
///
/// `None` のフィールドは「このレイヤーでは未指定」を意味します。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// AWSリージョン
    pub region: Option<String>,

    /// AWS認証情報のプロファイル名
    pub profile: Option<String>,

    /// 同時に実行するリソース操作の上限
    pub concurrency: Option<usize>,

    /// ドリフト時のポリシー (`fail` / `replace`)
    pub replace: Option<String>,

    /// 再利用前に実リソースを確認するか
    pub refresh: Option<bool>,

    pub retry: RetrySettings,

    /// 実行全体のタイムアウト（秒）
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// グラフ定義の `settings` ブロックから生成
    pub fn from_document(settings: &Map<String, Value>) -> Result<Self> {
        let parsed: Settings = serde_json::from_value(Value::Object(settings.clone()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// JSON形式の設定ファイルから生成（ファイルがなければ空の設定）
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let parsed: Settings =
            serde_json::from_str(&content).map_err(|source| ConfigError::InvalidUserSettings {
                path: path.to_path_buf(),
                source,
            })?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// ユーザー設定ファイル (`~/.config/stackflow/settings.json`) から生成
    pub fn from_user_config() -> Result<Self> {
        match crate::user_settings_path() {
            Ok(path) => Self::from_file(&path),
            Err(ConfigError::ConfigDirNotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// 環境変数から生成
    ///
    /// - `STACKFLOW_REGION`（未設定なら `AWS_REGION`）
    /// - `STACKFLOW_PROFILE`
    /// - `STACKFLOW_CONCURRENCY`
    /// - `STACKFLOW_REPLACE`
    /// - `STACKFLOW_TIMEOUT`
    pub fn from_env() -> Result<Self> {
        let region = env_var("STACKFLOW_REGION").or_else(|| env_var("AWS_REGION"));

        let concurrency = env_var("STACKFLOW_CONCURRENCY")
            .map(|v| parse_number::<usize>("STACKFLOW_CONCURRENCY", &v))
            .transpose()?;

        let timeout_secs = env_var("STACKFLOW_TIMEOUT")
            .map(|v| parse_number::<u64>("STACKFLOW_TIMEOUT", &v))
            .transpose()?;

        let settings = Settings {
            region,
            profile: env_var("STACKFLOW_PROFILE"),
            concurrency,
            replace: env_var("STACKFLOW_REPLACE"),
            timeout_secs,
            ..Default::default()
        };
        settings.validate_as("STACKFLOW_CONCURRENCY", "STACKFLOW_REPLACE")?;
        Ok(settings)
    }

    /// `other` で指定されているフィールドを上書き
    pub fn merge(mut self, other: Settings) -> Self {
        if other.region.is_some() {
            self.region = other.region;
        }
        if other.profile.is_some() {
            self.profile = other.profile;
        }
        if other.concurrency.is_some() {
            self.concurrency = other.concurrency;
        }
        if other.replace.is_some() {
            self.replace = other.replace;
        }
        if other.refresh.is_some() {
            self.refresh = other.refresh;
        }
        self.retry.merge(other.retry);
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_as("concurrency", "replace")
    }

    fn validate_as(&self, concurrency_key: &str, replace_key: &str) -> Result<()> {
        if self.concurrency == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: concurrency_key.to_string(),
                value: "0".to_string(),
                reason: "1以上を指定してください".to_string(),
            });
        }
        if let Some(replace) = &self.replace
            && !REPLACE_POLICIES.contains(&replace.as_str())
        {
            return Err(ConfigError::InvalidValue {
                key: replace_key.to_string(),
                value: replace.clone(),
                reason: format!("{} のいずれかを指定してください", REPLACE_POLICIES.join(" / ")),
            });
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "1以上を指定してください".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "数値を指定してください".to_string(),
        })
}
