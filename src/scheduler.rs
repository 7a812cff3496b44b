use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use serde::Deserialize;

use crate::broadcast::BroadcastCoordinator;
use crate::error::AppError;
use crate::store::TransactionStore;

/// ブロードキャスト失敗後の再試行方針。
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RetryPolicy {
    /// 毎tick再試行する (既定)。
    #[default]
    EveryTick,
    /// 失敗回数 k に対して min(base * 2^(k-1), max) 秒待ってから再試行する。
    ExponentialBackoff { base_secs: u64, max_secs: u64 },
    /// limit 回失敗したエントリはスキップし続ける。エントリ自体は残る。
    MaxAttempts { limit: u32 },
}

// エントリごとの失敗履歴。IDは再利用されないため取り違えは起きない。
struct FailureState {
    attempts: u32,
    last_attempt: NaiveDateTime,
}

/// ストアを定期的に走査し、予約日時に達したエントリをコーディネータへ渡す。
pub struct Scheduler<'a> {
    store: &'a TransactionStore,
    coordinator: BroadcastCoordinator<'a>,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
    failures: HashMap<String, FailureState>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        store: &'a TransactionStore,
        coordinator: BroadcastCoordinator<'a>,
        poll_interval: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Scheduler {
            store,
            coordinator,
            poll_interval,
            retry_policy,
            failures: HashMap::new(),
        }
    }

    /// 1回のtick。予約日時が now 以前のエントリをリスト順に処理する。
    /// 個々のエントリの失敗はログに記録し、残りのエントリの処理を続行する。
    pub fn tick(&mut self, now: NaiveDateTime) -> Result<(), AppError> {
        let entries = self.store.list()?;

        // ストアから消えたエントリの失敗履歴を破棄する
        self.failures
            .retain(|id, _| entries.iter().any(|e| &e.id == id));

        for entry in &entries {
            if entry.scheduled_time > now {
                continue;
            }
            if !self.retry_allowed(&entry.id, now) {
                continue;
            }
            log::info!(
                "予約日時に達したトランザクション {} を処理します (予約: {})",
                entry.id,
                entry.scheduled_time
            );
            match self.coordinator.submit(entry) {
                Ok(()) => {
                    self.failures.remove(&entry.id);
                }
                Err(e) => {
                    log::error!(
                        "トランザクション {} のブロードキャストに失敗しました: {}",
                        entry.id,
                        e
                    );
                    let state = self
                        .failures
                        .entry(entry.id.clone())
                        .or_insert(FailureState {
                            attempts: 0,
                            last_attempt: now,
                        });
                    state.attempts += 1;
                    state.last_attempt = now;
                }
            }
        }
        Ok(())
    }

    fn retry_allowed(&self, id: &str, now: NaiveDateTime) -> bool {
        let Some(state) = self.failures.get(id) else {
            return true;
        };
        match self.retry_policy {
            RetryPolicy::EveryTick => true,
            RetryPolicy::ExponentialBackoff { base_secs, max_secs } => {
                let exponent = state.attempts.saturating_sub(1).min(32);
                let delay_secs = base_secs.saturating_mul(1u64 << exponent).min(max_secs);
                now - state.last_attempt >= ChronoDuration::seconds(delay_secs as i64)
            }
            RetryPolicy::MaxAttempts { limit } => {
                if state.attempts >= limit {
                    log::warn!(
                        "トランザクション {} は失敗上限 ({} 回) に達したためスキップします",
                        id,
                        limit
                    );
                    false
                } else {
                    true
                }
            }
        }
    }

    /// stop が立てられるまでtickを繰り返すブロッキングループ。
    /// 処理中の送信はループ終了前に必ず完走する。
    pub fn run(&mut self, stop: &AtomicBool) {
        log::info!(
            "自動ブロードキャストループを開始します (間隔: {}秒)",
            self.poll_interval.as_secs()
        );
        while !stop.load(Ordering::SeqCst) {
            let now = Local::now().naive_local();
            if let Err(e) = self.tick(now) {
                log::error!("tick処理でエラーが発生しました: {}", e);
            }
            // stopへの応答性を保つため1秒刻みでスリープする
            let mut remaining = self.poll_interval;
            while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
                let step = remaining.min(Duration::from_secs(1));
                thread::sleep(step);
                remaining -= step;
            }
        }
        log::info!("自動ブロードキャストループを停止しました");
    }
}
