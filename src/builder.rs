use std::str::FromStr;
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, TxOut, Txid};
use serde::Deserialize;

use crate::error::AppError;
use crate::provider::ChainProvider;
use crate::types::{SelectedInput, UnsignedTransaction, Utxo};

// Bitcoin Coreのデフォルトダスト閾値 (P2PKH/P2WPKH出力に対して)
const DUST_THRESHOLD_SATS: u64 = 546;

/// コイン選択の方針。
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionStrategy {
    /// 送金元アドレスを与えられた順に走査し、プロバイダが返した順でUTXOを
    /// 積み上げる。必要額に達した時点で残りのアドレスは照会しない。
    #[default]
    FirstFit,
    /// 全アドレスのUTXOを取得し、金額の大きい順に積み上げる。
    LargestFirst,
}

// 検証済みの送金元アドレス。address_index はリスト内の初出位置。
struct SenderEntry<'a> {
    address: &'a str,
    script_pubkey: ScriptBuf,
    address_index: usize,
}

/// UTXOを選択し、支払い出力とおつり出力を組み立てて未署名トランザクションを返す。
/// 必要額 (amount + fee) に届かない場合は InsufficientFunds。
/// プロバイダ呼び出しの失敗は構築全体を中止し、部分的な結果は残らない。
pub fn build_unsigned_transaction(
    provider: &dyn ChainProvider,
    sender_addresses: &[String],
    recipient: &str,
    amount_sats: u64,
    fee_sats: u64,
    network: Network,
    strategy: SelectionStrategy,
) -> Result<UnsignedTransaction, AppError> {
    if sender_addresses.is_empty() {
        return Err(AppError::InputValidation(
            "送金元アドレスが指定されていません".to_string(),
        ));
    }
    if amount_sats == 0 {
        return Err(AppError::InputValidation(
            "送金額は1 satoshi以上である必要があります".to_string(),
        ));
    }
    let required_sats = amount_sats.checked_add(fee_sats).ok_or_else(|| {
        AppError::InputValidation("送金額と手数料の合計がオーバーフローしました".to_string())
    })?;

    log::info!(
        "トランザクション構築処理を開始します。送金額: {} sats, 手数料: {} sats",
        amount_sats,
        fee_sats
    );

    // 送金元アドレスの検証。重複は初出位置のインデックスへ寄せ、照会は一度だけ行う。
    let mut senders: Vec<SenderEntry> = Vec::new();
    for (position, address_str) in sender_addresses.iter().enumerate() {
        if senders.iter().any(|s| s.address == address_str.as_str()) {
            log::warn!(
                "送金元アドレス {} が重複しています。初出位置の鍵インデックスを使用します。",
                address_str
            );
            continue;
        }
        let address = Address::from_str(address_str)
            .and_then(|addr| addr.require_network(network))
            .map_err(|e| {
                AppError::InputValidation(format!(
                    "送金元アドレス形式エラーまたはネットワーク不整合 ({}): {}",
                    address_str, e
                ))
            })?;
        senders.push(SenderEntry {
            address: address_str,
            script_pubkey: address.script_pubkey(),
            address_index: position,
        });
    }

    let recipient_address = Address::from_str(recipient)
        .and_then(|addr| addr.require_network(network))
        .map_err(|e| {
            AppError::InputValidation(format!(
                "受信者アドレス形式エラーまたはネットワーク不整合 ({}): {}",
                recipient, e
            ))
        })?;

    let (inputs, accumulated_sats) = match strategy {
        SelectionStrategy::FirstFit => select_first_fit(provider, &senders, required_sats)?,
        SelectionStrategy::LargestFirst => select_largest_first(provider, &senders, required_sats)?,
    };

    if accumulated_sats < required_sats {
        return Err(AppError::InsufficientFunds {
            available: accumulated_sats,
            required: required_sats,
            fee: fee_sats,
        });
    }

    // 出力の組み立て。余剰は全額おつりとして送金元先頭アドレスへ戻す。
    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sats),
        script_pubkey: recipient_address.script_pubkey(),
    }];
    let change_sats = accumulated_sats - required_sats;
    if change_sats > 0 {
        if change_sats < DUST_THRESHOLD_SATS {
            log::warn!(
                "おつり {} sats はダスト閾値 {} sats 未満です。リレーに拒否される可能性があります。",
                change_sats,
                DUST_THRESHOLD_SATS
            );
        }
        log::debug!(
            "おつり発生: {} sats, おつりアドレス: {}",
            change_sats,
            sender_addresses[0]
        );
        outputs.push(TxOut {
            value: Amount::from_sat(change_sats),
            script_pubkey: senders[0].script_pubkey.clone(),
        });
    }

    let unsigned = UnsignedTransaction {
        inputs,
        outputs,
        fee: Amount::from_sat(fee_sats),
    };
    log::info!(
        "入力 {} 件 (合計 {} sats)、出力 {} 件 (合計 {} sats) でトランザクションを構築しました。",
        unsigned.inputs.len(),
        unsigned.input_total().to_sat(),
        unsigned.outputs.len(),
        unsigned.output_total().to_sat()
    );

    Ok(unsigned)
}

fn to_selected_input(utxo: &Utxo, sender: &SenderEntry) -> Result<SelectedInput, AppError> {
    let txid = Txid::from_str(&utxo.txid).map_err(|e| AppError::Provider {
        message: format!("プロバイダが不正なTXIDを返しました ({}): {}", utxo.txid, e),
    })?;
    Ok(SelectedInput {
        out_point: OutPoint::new(txid, utxo.vout),
        value: Amount::from_sat(utxo.value),
        script_pubkey: sender.script_pubkey.clone(),
        address_index: sender.address_index,
    })
}

fn select_first_fit(
    provider: &dyn ChainProvider,
    senders: &[SenderEntry],
    required_sats: u64,
) -> Result<(Vec<SelectedInput>, u64), AppError> {
    let mut inputs = Vec::new();
    let mut accumulated = 0u64;
    'scan: for sender in senders {
        let utxos = provider.utxos(sender.address)?;
        log::debug!("アドレス {} のUTXO {} 件を受信", sender.address, utxos.len());
        for utxo in &utxos {
            inputs.push(to_selected_input(utxo, sender)?);
            accumulated += utxo.value;
            if accumulated >= required_sats {
                break 'scan;
            }
        }
    }
    Ok((inputs, accumulated))
}

fn select_largest_first(
    provider: &dyn ChainProvider,
    senders: &[SenderEntry],
    required_sats: u64,
) -> Result<(Vec<SelectedInput>, u64), AppError> {
    let mut candidates: Vec<(usize, Utxo)> = Vec::new();
    for (sender_index, sender) in senders.iter().enumerate() {
        for utxo in provider.utxos(sender.address)? {
            candidates.push((sender_index, utxo));
        }
    }
    candidates.sort_by(|a, b| b.1.value.cmp(&a.1.value));

    let mut inputs = Vec::new();
    let mut accumulated = 0u64;
    for (sender_index, utxo) in &candidates {
        inputs.push(to_selected_input(utxo, &senders[*sender_index])?);
        accumulated += utxo.value;
        if accumulated >= required_sats {
            break;
        }
    }
    Ok((inputs, accumulated))
}
