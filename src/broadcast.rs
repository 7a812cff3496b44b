use crate::error::AppError;
use crate::provider::ChainProvider;
use crate::store::TransactionStore;
use crate::types::ScheduledEntry;

/// ブロードキャストとストア削除の順序を司るコーディネータ。
/// 送信の結果が確定するまでストアには一切触れない。
pub struct BroadcastCoordinator<'a> {
    provider: &'a dyn ChainProvider,
    store: &'a TransactionStore,
}

impl<'a> BroadcastCoordinator<'a> {
    pub fn new(provider: &'a dyn ChainProvider, store: &'a TransactionStore) -> Self {
        BroadcastCoordinator { provider, store }
    }

    /// エントリをプロバイダへ送信し、成功した場合のみストアから削除する。
    /// 送信失敗時はエントリを残したまま Broadcast エラーを返す。
    /// 送信成功後の削除失敗はログに記録して成功扱いとする (送信は取り消せない)。
    pub fn submit(&self, entry: &ScheduledEntry) -> Result<(), AppError> {
        log::info!("トランザクション {} をブロードキャストします", entry.id);
        self.provider.broadcast(&entry.signed_tx_hex)?;
        log::info!("トランザクション {} のブロードキャストに成功しました", entry.id);

        match self.store.delete(&entry.id) {
            Ok(()) => {}
            Err(AppError::NotFound { id }) => {
                log::warn!(
                    "ブロードキャスト済みトランザクション {} はストアから既に削除されています",
                    id
                );
            }
            Err(e) => {
                log::error!(
                    "ブロードキャスト済みトランザクション {} の削除に失敗しました: {}",
                    entry.id,
                    e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use chrono::NaiveDate;

    use crate::types::Utxo;

    struct MockProvider {
        broadcasts: RefCell<Vec<String>>,
        fail_broadcast: Cell<bool>,
    }

    impl MockProvider {
        fn new() -> Self {
            MockProvider {
                broadcasts: RefCell::new(Vec::new()),
                fail_broadcast: Cell::new(false),
            }
        }
    }

    impl ChainProvider for MockProvider {
        fn utxos(&self, _address: &str) -> Result<Vec<Utxo>, AppError> {
            unreachable!("ブロードキャストのテストではutxosは呼ばれない")
        }

        fn broadcast(&self, raw_tx_hex: &str) -> Result<(), AppError> {
            self.broadcasts.borrow_mut().push(raw_tx_hex.to_string());
            if self.fail_broadcast.get() {
                return Err(AppError::Broadcast {
                    reason: "モック拒否".to_string(),
                });
            }
            Ok(())
        }
    }

    fn entry(store: &TransactionStore, hex: &str) -> ScheduledEntry {
        let time = NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let id = store.put(hex, time).unwrap();
        ScheduledEntry {
            id,
            signed_tx_hex: hex.to_string(),
            scheduled_time: time,
        }
    }

    #[test]
    fn successful_submit_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        let provider = MockProvider::new();
        let coordinator = BroadcastCoordinator::new(&provider, &store);

        let e = entry(&store, "aabb");
        coordinator.submit(&e).unwrap();

        assert_eq!(*provider.broadcasts.borrow(), vec!["aabb"]);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn failed_submit_keeps_entry_in_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        let provider = MockProvider::new();
        provider.fail_broadcast.set(true);
        let coordinator = BroadcastCoordinator::new(&provider, &store);

        let e = entry(&store, "aabb");
        match coordinator.submit(&e) {
            Err(AppError::Broadcast { .. }) => {}
            other => panic!("Broadcastエラーを期待: {:?}", other),
        }
        // エントリは残り、内容は変わらない
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].signed_tx_hex, "aabb");
    }

    #[test]
    fn delete_not_found_after_success_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        let provider = MockProvider::new();
        let coordinator = BroadcastCoordinator::new(&provider, &store);

        let e = entry(&store, "aabb");
        store.delete(&e.id).unwrap();

        // 送信は成功し、削除のNotFoundは致命的エラーにならない
        coordinator.submit(&e).unwrap();
        assert_eq!(provider.broadcasts.borrow().len(), 1);
    }
}
