use std::fs;
use std::path::{Path, PathBuf};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::ScheduledEntry;

/// ストアおよび予約日時入力で使う日時形式。
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SEQ_FILE: &str = ".seq";

// 永続化するレコードの形式。日時は文字列で保持する。
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    signed_tx_hex: String,
    scheduled_time: String,
}

/// 予約済みトランザクションのファイルストア。1レコード1ファイル ({id}.json)。
/// 単一プロセスからのアクセスを前提とし、プロセス間ロックは行わない。
pub struct TransactionStore {
    dir: PathBuf,
}

impl TransactionStore {
    /// ストアを開く。ディレクトリが存在しない場合は作成する。
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir)?;
        log::debug!("トランザクションストアを開きました: {:?}", dir);
        Ok(TransactionStore {
            dir: dir.to_path_buf(),
        })
    }

    /// 署名済みトランザクションを予約日時と共に永続化し、採番したIDを返す。
    pub fn put(
        &self,
        signed_tx_hex: &str,
        scheduled_time: NaiveDateTime,
    ) -> Result<String, AppError> {
        let id = self.next_id()?;
        let record = StoredRecord {
            signed_tx_hex: signed_tx_hex.to_string(),
            scheduled_time: scheduled_time.format(SCHEDULE_TIME_FORMAT).to_string(),
        };
        let path = self.record_path(&id);
        let json = serde_json::to_string_pretty(&record).map_err(|e| AppError::JsonParse {
            file_path: path.clone(),
            source: e,
        })?;
        fs::write(&path, json)?;
        log::info!(
            "トランザクション {} を保存しました (予約日時: {})",
            id,
            record.scheduled_time
        );
        Ok(id)
    }

    /// 現在永続化されている全レコードを読み出す。ID番号順に整列して返す。
    /// 壊れたレコードは読み飛ばさずエラーとして報告する。
    pub fn list(&self) -> Result<Vec<ScheduledEntry>, AppError> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let Some(id) = Self::id_from_path(&path) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            let record: StoredRecord =
                serde_json::from_str(&content).map_err(|e| AppError::JsonParse {
                    file_path: path.clone(),
                    source: e,
                })?;
            let scheduled_time =
                NaiveDateTime::parse_from_str(&record.scheduled_time, SCHEDULE_TIME_FORMAT)
                    .map_err(|e| AppError::InvalidSchedule {
                        input: record.scheduled_time.clone(),
                        source: e,
                    })?;
            entries.push(ScheduledEntry {
                id,
                signed_tx_hex: record.signed_tx_hex,
                scheduled_time,
            });
        }
        entries.sort_by_key(|e| Self::id_number(&e.id));
        Ok(entries)
    }

    /// レコードを削除する。存在しないIDは NotFound。
    pub fn delete(&self, id: &str) -> Result<(), AppError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("トランザクション {} を削除しました", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    // 次のIDを採番する。連番はファイルに永続化され、削除後も再利用されない。
    fn next_id(&self) -> Result<String, AppError> {
        let seq_path = self.dir.join(SEQ_FILE);
        let last: u64 = match fs::read_to_string(&seq_path) {
            Ok(content) => content.trim().parse().map_err(|e| {
                AppError::Internal(format!(
                    "連番ファイルの内容が不正です ({:?}): {}",
                    seq_path, e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(AppError::Io(e)),
        };
        let next = last + 1;
        fs::write(&seq_path, next.to_string())?;
        Ok(format!("tx{}", next))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    // "tx{N}.json" 形式のファイルのみをレコードとして扱う
    fn id_from_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        stem.strip_prefix("tx")?.parse::<u64>().ok()?;
        Some(stem.to_string())
    }

    fn id_number(id: &str) -> u64 {
        id.strip_prefix("tx").and_then(|n| n.parse().ok()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn schedule(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn put_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();

        let id = store.put("0200aabb", schedule(12)).unwrap();
        assert_eq!(id, "tx1");

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "tx1");
        assert_eq!(entries[0].signed_tx_hex, "0200aabb");
        assert_eq!(entries[0].scheduled_time, schedule(12));
    }

    #[test]
    fn delete_removes_entry_and_second_delete_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();

        let id = store.put("0200aabb", schedule(12)).unwrap();
        store.delete(&id).unwrap();
        assert!(store.list().unwrap().is_empty());

        match store.delete(&id) {
            Err(AppError::NotFound { id: missing }) => assert_eq!(missing, id),
            other => panic!("NotFoundを期待: {:?}", other),
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_reused_after_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();

        let id1 = store.put("aa", schedule(1)).unwrap();
        let id2 = store.put("bb", schedule(2)).unwrap();
        store.delete(&id2).unwrap();
        let id3 = store.put("cc", schedule(3)).unwrap();

        assert_eq!(id1, "tx1");
        assert_eq!(id2, "tx2");
        assert_eq!(id3, "tx3");
    }

    #[test]
    fn ids_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = TransactionStore::open(dir.path()).unwrap();
            let id = store.put("aa", schedule(1)).unwrap();
            store.delete(&id).unwrap();
        }
        // 再オープン後も連番は巻き戻らない
        let store = TransactionStore::open(dir.path()).unwrap();
        let id = store.put("bb", schedule(2)).unwrap();
        assert_eq!(id, "tx2");
    }

    #[test]
    fn persisted_record_layout_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        let id = store.put("0200aabb", schedule(9)).unwrap();

        let content = std::fs::read_to_string(dir.path().join(format!("{}.json", id))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["signed_tx_hex"], "0200aabb");
        assert_eq!(value["scheduled_time"], "2026-08-06 09:00:00");
    }

    #[test]
    fn list_reports_malformed_schedule_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("tx1.json"),
            r#"{"signed_tx_hex": "aa", "scheduled_time": "06-08-2026"}"#,
        )
        .unwrap();

        match store.list() {
            Err(AppError::InvalidSchedule { input, .. }) => assert_eq!(input, "06-08-2026"),
            other => panic!("InvalidScheduleを期待: {:?}", other),
        }
    }
}
