use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bitcoin::Network;
use bitcoin::consensus::encode;
use bitcoin::secp256k1::All as AllContext;
use bitcoin::secp256k1::Secp256k1;
use chrono::NaiveDateTime;
use clap::Parser;

mod broadcast;
mod builder;
mod cli;
mod config;
mod error;
mod provider;
mod scheduler;
mod signer;
mod store;
mod types;

use broadcast::BroadcastCoordinator;
use cli::{CliArgs, parse_network};
use config::AppConfig;
use error::AppError;
use provider::EsploraProvider;
use scheduler::Scheduler;
use store::{SCHEDULE_TIME_FORMAT, TransactionStore};

fn main() -> Result<(), AppError> {
    env_logger::init();

    let args = CliArgs::parse();
    log::info!("アプリケーションを開始します。引数: {:?}", args);

    let mut config = match &args.config_file {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    // CLI引数は設定ファイルより優先する
    if let Some(network) = args.network {
        config.network = network;
    }
    if let Some(url) = args.provider_url {
        config.provider_url = url;
    }
    if let Some(dir) = args.tx_dir {
        config.tx_dir = dir;
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }

    let network = parse_network(&config.network)?;
    log::info!("指定されたネットワーク: {:?}", network);

    let secp: Secp256k1<AllContext> = Secp256k1::new();
    let provider = EsploraProvider::new(&config.provider_url)?;
    let store = TransactionStore::open(&config.tx_dir)?;

    loop {
        println!();
        println!("メニュー:");
        println!("1. トランザクション一覧");
        println!("2. トランザクションの作成と予約");
        println!("3. トランザクションの削除");
        println!("4. トランザクションの即時ブロードキャスト");
        println!("5. 自動ブロードキャストの開始");
        println!("6. 終了");

        let choice = prompt("番号を選択してください: ")?;
        let result = match choice.as_str() {
            "1" => list_transactions(&store),
            "2" => create_transaction(&config, network, &provider, &store, &secp),
            "3" => delete_transaction(&store),
            "4" => broadcast_transaction(&provider, &store),
            "5" => {
                run_auto_broadcast(&config, &provider, &store);
                Ok(())
            }
            "6" => {
                println!("終了します。");
                break;
            }
            _ => {
                println!("無効な選択です。もう一度入力してください。");
                Ok(())
            }
        };
        // 個々の操作の失敗は報告してメニューへ戻る
        if let Err(e) = result {
            println!("エラー: {}", e);
            log::error!("操作が失敗しました: {}", e);
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String, AppError> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn list_transactions(store: &TransactionStore) -> Result<(), AppError> {
    let entries = store.list()?;
    if entries.is_empty() {
        println!("保存されているトランザクションはありません。");
        return Ok(());
    }
    for entry in entries {
        println!("ID: {}", entry.id);
        println!("予約日時: {}", entry.scheduled_time.format(SCHEDULE_TIME_FORMAT));
        println!("状態: pending");
        println!("{}", "-".repeat(30));
    }
    Ok(())
}

fn create_transaction(
    config: &AppConfig,
    network: Network,
    provider: &EsploraProvider,
    store: &TransactionStore,
    secp: &Secp256k1<AllContext>,
) -> Result<(), AppError> {
    let mnemonic = prompt("ニーモニックを入力してください: ")?;
    // 構築前にチェックサムを検証する
    let seed = signer::seed_from_mnemonic(&mnemonic)?;

    let count: usize = prompt("送金元アドレスの数を入力してください: ")?
        .parse()
        .map_err(|e| AppError::InputValidation(format!("アドレス数の形式が不正です: {}", e)))?;
    if count == 0 {
        return Err(AppError::InputValidation(
            "送金元アドレスは1件以上必要です".to_string(),
        ));
    }
    let mut sender_addresses = Vec::with_capacity(count);
    for i in 0..count {
        sender_addresses.push(prompt(&format!("送金元アドレス {} を入力してください: ", i + 1))?);
    }
    let recipient = prompt("受信者アドレスを入力してください: ")?;
    let amount_sats: u64 = prompt("送金額 (satoshi) を入力してください: ")?
        .parse()
        .map_err(|e| AppError::InputValidation(format!("送金額の形式が不正です: {}", e)))?;
    let fee_sats: u64 = prompt("手数料 (satoshi) を入力してください: ")?
        .parse()
        .map_err(|e| AppError::InputValidation(format!("手数料の形式が不正です: {}", e)))?;
    let scheduled_str = prompt("予約日時 (YYYY-MM-DD HH:MM:SS) を入力してください: ")?;
    let scheduled_time = NaiveDateTime::parse_from_str(&scheduled_str, SCHEDULE_TIME_FORMAT)
        .map_err(|e| AppError::InvalidSchedule {
            input: scheduled_str.clone(),
            source: e,
        })?;

    let unsigned = builder::build_unsigned_transaction(
        provider,
        &sender_addresses,
        &recipient,
        amount_sats,
        fee_sats,
        network,
        config.selection,
    )?;

    // 各入力の所有アドレス位置に対応する鍵を導出する
    let mut keys = Vec::with_capacity(unsigned.inputs.len());
    for input in &unsigned.inputs {
        keys.push(signer::derive_private_key(
            secp,
            &seed,
            network,
            input.address_index as u32,
        )?);
    }
    let signed = signer::sign_transaction(secp, &unsigned, &keys)?;
    let raw_hex = encode::serialize_hex(&signed);
    log::info!("Raw transaction hex: {}", raw_hex);

    let id = store.put(&raw_hex, scheduled_time)?;
    println!("トランザクションを作成し {} として保存しました。", id);
    println!("Raw hex: {}", raw_hex);
    Ok(())
}

fn delete_transaction(store: &TransactionStore) -> Result<(), AppError> {
    let id = prompt("削除するトランザクションIDを入力してください: ")?;
    store.delete(&id)?;
    println!("トランザクションを削除しました。");
    Ok(())
}

/// 予約日時に関わらず、指定されたエントリを即時ブロードキャストする。
fn broadcast_transaction(
    provider: &EsploraProvider,
    store: &TransactionStore,
) -> Result<(), AppError> {
    let id = prompt("ブロードキャストするトランザクションIDを入力してください: ")?;
    let entries = store.list()?;
    let Some(entry) = entries.into_iter().find(|e| e.id == id) else {
        return Err(AppError::NotFound { id });
    };
    let coordinator = BroadcastCoordinator::new(provider, store);
    coordinator.submit(&entry)?;
    println!("トランザクションをブロードキャストしました。");
    Ok(())
}

fn run_auto_broadcast(config: &AppConfig, provider: &EsploraProvider, store: &TransactionStore) {
    let stop = AtomicBool::new(false);
    println!("自動ブロードキャストを開始しました。Enterキーで停止します。");

    thread::scope(|scope| {
        let handle = scope.spawn(|| {
            let coordinator = BroadcastCoordinator::new(provider, store);
            let mut scheduler = Scheduler::new(
                store,
                coordinator,
                Duration::from_secs(config.poll_interval_secs),
                config.retry,
            );
            scheduler.run(&stop);
        });

        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
        stop.store(true, Ordering::SeqCst);
        let _ = handle.join();
    });

    println!("自動ブロードキャストを停止しました。");
}
