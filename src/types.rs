use bitcoin::{Amount, OutPoint, TxOut, script::ScriptBuf};
use chrono::NaiveDateTime;
use serde::Deserialize;
use crate::error::AppError;

/// プロバイダから取得した未使用トランザクション出力。(txid, vout) で一意。
/// esplora系APIが返す追加フィールド (status等) は無視する。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptType {
    P2PKH,
    P2WPKH,
    // 他のタイプも追加可能
}

impl ScriptType {
    pub fn from_script_buf(script: &ScriptBuf) -> Result<Self, AppError> {
        if script.is_p2pkh() {
            Ok(ScriptType::P2PKH)
        } else if script.is_p2wpkh() {
            Ok(ScriptType::P2WPKH)
        }
        // is_p2sh(), is_p2wsh(), is_v0_p2tr() なども将来的に対応可能
        else {
            Err(AppError::UnknownScriptType { script_hex: script.to_hex_string() })
        }
    }
}

/// コイン選択で採用された入力。address_index は送金元アドレスリスト内の
/// 位置 (重複時は初出位置) で、署名時の鍵導出インデックスとして使う。
#[derive(Debug, Clone)]
pub struct SelectedInput {
    pub out_point: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub address_index: usize,
}

/// 未署名トランザクション。sum(inputs) == sum(outputs) + fee が構築時に成立する。
#[derive(Debug)]
pub struct UnsignedTransaction {
    pub inputs: Vec<SelectedInput>,
    pub outputs: Vec<TxOut>,
    pub fee: Amount,
}

impl UnsignedTransaction {
    pub fn input_total(&self) -> Amount {
        Amount::from_sat(self.inputs.iter().map(|i| i.value.to_sat()).sum())
    }

    pub fn output_total(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|o| o.value.to_sat()).sum())
    }
}

/// ストアから読み出した予約済みトランザクション。
/// ストア内部への参照ではなく複製であり、削除しても手元の値は無効にならない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub id: String,
    pub signed_tx_hex: String,
    pub scheduled_time: NaiveDateTime,
}
