use clap::Parser;
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::error::AppError;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// 実行時設定を記述したJSONファイルへのパス (省略時は既定値)
    #[clap(short, long, value_parser)]
    pub config_file: Option<PathBuf>,

    /// 使用するネットワーク ("bitcoin", "testnet", "regtest")。設定ファイルより優先
    #[clap(short, long, value_parser)]
    pub network: Option<String>,

    /// esplora互換APIのベースURL。設定ファイルより優先
    #[clap(short, long, value_parser)]
    pub provider_url: Option<String>,

    /// 予約済みトランザクションの保存ディレクトリ。設定ファイルより優先
    #[clap(short, long, value_parser)]
    pub tx_dir: Option<PathBuf>,

    /// 自動ブロードキャストのポーリング間隔 (秒)。設定ファイルより優先
    #[clap(long, value_parser)]
    pub poll_interval_secs: Option<u64>,
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, AppError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(AppError::InputValidation(format!(
            "無効なネットワークが指定されました: {}",
            s
        ))),
    }
}
