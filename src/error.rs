use std::path::PathBuf;
use bitcoin::bip32::Error as Bip32Error;
use bitcoin::secp256k1::Error as SecpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー ファイル: {file_path:?}, 詳細: {source}")]
    JsonParse {
        file_path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("BIP32鍵導出エラー: {0}")]
    Bip32(#[from] Bip32Error),

    #[error("secp256k1エラー: {0}")]
    Secp256k1(#[from] SecpError),

    #[error("無効なニーモニックです: {0}")]
    InvalidMnemonic(#[source] bip39::Error),

    #[error("資金不足: 利用可能な総額 {available} sats, 要求額 {required} sats (手数料 {fee} sats を含む)")]
    InsufficientFunds {
        available: u64,
        required: u64,
        fee: u64,
    },

    #[error("UTXOプロバイダエラー: {message}")]
    Provider { message: String },

    #[error("ブロードキャスト失敗: {reason}")]
    Broadcast { reason: String },

    #[error("トランザクションが見つかりません: {id}")]
    NotFound { id: String },

    #[error("予約日時の形式が不正です ({input}): {source}")]
    InvalidSchedule {
        input: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("入力検証エラー: {0}")]
    InputValidation(String),

    #[error("Sighash計算エラー (入力インデックス {input_index}): {message}")]
    Sighash { input_index: usize, message: String },

    #[error("不明なスクリプトタイプ: {script_hex}")]
    UnknownScriptType { script_hex: String },

    #[error("内部エラー: {0}")]
    Internal(String),
}
