use bitcoin::{
    Network, PrivateKey, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, Witness,
    absolute::LockTime,
    bip32::{ChildNumber, DerivationPath, Xpriv},
    script::PushBytesBuf,
    secp256k1::{All, Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
};

use crate::error::AppError;
use crate::types::{ScriptType, UnsignedTransaction};

// 署名に必要な情報を一時的に保持するための構造体
struct SigningInfo {
    input_index: usize,
    sighash_message: Message,
    private_key: PrivateKey,
    public_key: PublicKey,
    script_type: ScriptType,
}

/// ニーモニックをBIP39チェックサム検証し、シードへ展開する。パスフレーズは空。
pub fn seed_from_mnemonic(mnemonic: &str) -> Result<[u8; 64], AppError> {
    let parsed = bip39::Mnemonic::parse_normalized(mnemonic).map_err(AppError::InvalidMnemonic)?;
    Ok(parsed.to_seed(""))
}

/// BIP44パス m/44'/{coin}'/0'/0/{address_index} で秘密鍵を導出する。
/// coin はメインネットで 0、それ以外 (testnet/regtest) で 1。
pub fn derive_private_key(
    secp: &Secp256k1<All>,
    seed: &[u8],
    network: Network,
    address_index: u32,
) -> Result<PrivateKey, AppError> {
    let coin = if network == Network::Bitcoin { 0 } else { 1 };
    let master = Xpriv::new_master(network, seed)?;
    let path = DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(44)?,
        ChildNumber::from_hardened_idx(coin)?,
        ChildNumber::from_hardened_idx(0)?,
        ChildNumber::from_normal_idx(0)?,
        ChildNumber::from_normal_idx(address_index)?,
    ]);
    let derived = master.derive_priv(secp, &path)?;
    log::debug!(
        "鍵を導出しました: m/44'/{}'/0'/0/{}",
        coin,
        address_index
    );
    Ok(derived.to_priv())
}

/// 未署名トランザクションへ入力順に署名を適用し、完成したトランザクションを返す。
/// keys_by_input_index は inputs と同じ並びで、各入力の所有アドレスの鍵を持つ。
pub fn sign_transaction(
    secp: &Secp256k1<All>,
    unsigned: &UnsignedTransaction,
    keys_by_input_index: &[PrivateKey],
) -> Result<Transaction, AppError> {
    if keys_by_input_index.len() != unsigned.inputs.len() {
        return Err(AppError::Internal(format!(
            "鍵の数 ({}) が入力の数 ({}) と一致しません",
            keys_by_input_index.len(),
            unsigned.inputs.len()
        )));
    }

    // 署名対象のトランザクションを初期化 (script_sig と witness は空)
    let mut transaction = Transaction {
        version: bitcoin::transaction::Version(2),
        lock_time: LockTime::ZERO,
        input: unsigned
            .inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.out_point,
                script_sig: ScriptBuf::new(), // 署名前は空
                sequence: Sequence::MAX,
                witness: Witness::new(), // 署名前は空
            })
            .collect(),
        output: unsigned.outputs.clone(),
    };

    log::info!("トランザクション署名処理を開始します。入力数: {}", unsigned.inputs.len());
    let mut signing_infos: Vec<SigningInfo> = Vec::new();

    // 1. 署名ハッシュ計算フェーズ
    // このスコープ内で SighashCache が transaction を可変借用する
    {
        let mut sighash_cache = SighashCache::new(&mut transaction);

        for (input_index, input) in unsigned.inputs.iter().enumerate() {
            let private_key = keys_by_input_index[input_index].clone();
            let public_key = private_key.public_key(secp);
            let script_type = ScriptType::from_script_buf(&input.script_pubkey)?;
            let sighash_type = EcdsaSighashType::All;

            let sighash_message = match script_type {
                ScriptType::P2PKH => {
                    let sighash = sighash_cache
                        .legacy_signature_hash(
                            input_index,
                            &input.script_pubkey,
                            sighash_type.to_u32(),
                        )
                        .map_err(|e| AppError::Sighash {
                            input_index,
                            message: e.to_string(),
                        })?;
                    Message::from_digest_slice(sighash.as_ref())?
                }
                ScriptType::P2WPKH => {
                    let script_code = input.script_pubkey.p2wpkh_script_code().ok_or_else(|| {
                        AppError::Internal(format!(
                            "P2WPKH script codeの取得に失敗 (input {})",
                            input_index
                        ))
                    })?;
                    let sighash = sighash_cache
                        .p2wpkh_signature_hash(input_index, &script_code, input.value, sighash_type)
                        .map_err(|e| AppError::Sighash {
                            input_index,
                            message: e.to_string(),
                        })?;
                    Message::from_digest_slice(sighash.as_ref())?
                }
            };

            log::debug!(
                "入力 {} (txid={}, vout={}) の署名ハッシュ計算が完了 ({:?})",
                input_index,
                input.out_point.txid,
                input.out_point.vout,
                script_type
            );

            signing_infos.push(SigningInfo {
                input_index,
                sighash_message,
                private_key,
                public_key,
                script_type,
            });
        }
    } // ここで sighash_cache が破棄され、transaction の可変借用が解放される

    // 2. 署名生成と適用フェーズ
    for info in signing_infos {
        let secp_sig = secp.sign_ecdsa(&info.sighash_message, &info.private_key.inner);
        // DERエンコードした署名にSIGHASH_ALLフラグを付加する
        let mut sig_bytes = secp_sig.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All as u8);

        match info.script_type {
            ScriptType::P2PKH => {
                let script_sig = bitcoin::script::Builder::new()
                    .push_slice(PushBytesBuf::try_from(sig_bytes).map_err(|_| {
                        AppError::Internal(format!(
                            "P2PKH署名のPushBytes変換失敗 (input {})",
                            info.input_index
                        ))
                    })?)
                    .push_key(&info.public_key)
                    .into_script();
                transaction.input[info.input_index].script_sig = script_sig;
            }
            ScriptType::P2WPKH => {
                let mut witness = Witness::new();
                witness.push(sig_bytes);
                witness.push(info.public_key.to_bytes());
                transaction.input[info.input_index].witness = witness;
            }
        }
        log::debug!("入力 {} ({:?}) の署名適用完了。", info.input_index, info.script_type);
    }
    log::info!("全ての入力の署名が完了しました。");

    Ok(transaction)
}
