use std::fs;
use std::path::{Path, PathBuf};
use serde::Deserialize;

use crate::builder::SelectionStrategy;
use crate::error::AppError;
use crate::scheduler::RetryPolicy;

/// 実行時設定。JSONファイルから読み込み、省略された項目は既定値を使う。
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// "bitcoin", "testnet", "regtest"
    pub network: String,
    /// esplora互換APIのベースURL
    pub provider_url: String,
    /// 予約済みトランザクションの保存ディレクトリ
    pub tx_dir: PathBuf,
    /// 自動ブロードキャストのポーリング間隔 (秒)
    pub poll_interval_secs: u64,
    /// コイン選択の方針
    pub selection: SelectionStrategy,
    /// ブロードキャスト失敗時の再試行方針
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            network: "testnet".to_string(),
            provider_url: "https://blockstream.info/testnet/api".to_string(),
            tx_dir: PathBuf::from("transactions"),
            poll_interval_secs: 60,
            selection: SelectionStrategy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content).map_err(|e| AppError::JsonParse {
            file_path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_target_testnet_with_sixty_second_poll() {
        let config = AppConfig::default();
        assert_eq!(config.network, "testnet");
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.selection, SelectionStrategy::FirstFit);
        assert_eq!(config.retry, RetryPolicy::EveryTick);
    }

    #[test]
    fn partial_config_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"network": "regtest", "pollIntervalSecs": 5, "retry": {{"kind": "maxAttempts", "limit": 3}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.network, "regtest");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.retry, RetryPolicy::MaxAttempts { limit: 3 });
        // 指定しなかった項目は既定値のまま
        assert_eq!(config.tx_dir, PathBuf::from("transactions"));
    }

    #[test]
    fn malformed_config_file_is_a_json_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        match AppConfig::load(file.path()) {
            Err(AppError::JsonParse { .. }) => {}
            other => panic!("JsonParseを期待: {:?}", other),
        }
    }
}
