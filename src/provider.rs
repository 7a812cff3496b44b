use std::time::Duration;
use reqwest::blocking::Client;

use crate::error::AppError;
use crate::types::Utxo;

/// UTXO照会とブロードキャストを提供する外部チェーンサービスの境界。
pub trait ChainProvider {
    /// アドレスの未使用出力一覧を取得する。
    fn utxos(&self, address: &str) -> Result<Vec<Utxo>, AppError>;

    /// 署名済みraw transaction hexをネットワークへ中継する。
    fn broadcast(&self, raw_tx_hex: &str) -> Result<(), AppError>;
}

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Blockstream等のesplora互換HTTP APIクライアント。
pub struct EsploraProvider {
    base_url: String,
    client: Client,
}

impl EsploraProvider {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Provider {
                message: format!("HTTPクライアントの初期化に失敗: {}", e),
            })?;
        Ok(EsploraProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl ChainProvider for EsploraProvider {
    fn utxos(&self, address: &str) -> Result<Vec<Utxo>, AppError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        log::debug!("UTXO照会: {}", url);

        let response = self.client.get(&url).send().map_err(|e| AppError::Provider {
            message: format!("UTXO照会のネットワークエラー ({}): {}", address, e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AppError::Provider {
                message: format!("UTXO照会が失敗 ({}): {} - {}", address, status, body),
            });
        }

        let utxos: Vec<Utxo> = response.json().map_err(|e| AppError::Provider {
            message: format!("UTXOレスポンスのJSONデコード失敗 ({}): {}", address, e),
        })?;
        log::debug!("アドレス {} のUTXO {} 件を取得しました", address, utxos.len());
        Ok(utxos)
    }

    fn broadcast(&self, raw_tx_hex: &str) -> Result<(), AppError> {
        // 送信前にhexとしての妥当性を確認する
        hex::decode(raw_tx_hex).map_err(|e| AppError::Broadcast {
            reason: format!("署名済みトランザクションが有効なhexではありません: {}", e),
        })?;

        let url = format!("{}/tx", self.base_url);
        log::debug!("ブロードキャスト送信: {}", url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(raw_tx_hex.to_string())
            .send()
            .map_err(|e| AppError::Broadcast {
                reason: format!("ネットワークエラー: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            // esploraは拒否理由を本文のテキストで返す
            let body = response.text().unwrap_or_default();
            return Err(AppError::Broadcast {
                reason: format!("{} - {}", status, body.trim()),
            });
        }
        Ok(())
    }
}
