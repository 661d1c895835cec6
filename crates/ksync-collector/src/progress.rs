//! 동기화 진행 상태 체크포인트.
//!
//! 진행 상태는 JSON 문서 하나로 저장되며, 프로세스 재시작 후에도
//! 이어서 동기화할 수 있게 하는 유일한 내구 상태입니다. 문서는
//! version 필드로 태깅되며, 과거 버전 문서는 로드 시 단계별로
//! 마이그레이션됩니다:
//!
//! - v1 → v2: `completed_end_date` 필드 추가
//! - v2 → v3: 당일 "신규 데이터 없음" 캐시와 예산 스냅샷 추가
//!
//! 저장은 항상 전체 문서를 덮어씁니다 (새 파일 생성 후 rename).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::budget::BudgetSnapshot;
use crate::error::{Result, SyncError};

/// 현재 체크포인트 문서 버전.
pub const PROGRESS_VERSION: u32 = 3;

/// 동기화 진행 상태.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// 문서 버전
    pub version: u32,
    /// 목표 구간 시작일
    pub start_date: NaiveDate,
    /// 목표 구간 종료일
    pub end_date: NaiveDate,
    /// 전 종목이 동기화 확인된 마지막 날짜.
    ///
    /// 실패가 하나도 없이 pass가 완주했을 때만 전진하므로,
    /// 실제 커버리지의 하한(lower bound)입니다.
    #[serde(default)]
    pub completed_end_date: Option<NaiveDate>,
    /// 마지막 체크포인트 저장 시각
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// 마지막으로 파악한 전체 종목 수
    #[serde(default)]
    pub total_tickers: usize,
    /// 한 번 이상 동기화 완료된 종목
    #[serde(default)]
    pub completed: BTreeSet<String>,
    /// 최근 시도가 실패한 종목
    #[serde(default)]
    pub failed: BTreeSet<String>,
    /// 당일 캐시가 적용되는 날짜
    #[serde(default)]
    pub checked_today_date: Option<NaiveDate>,
    /// 해당 날짜에 "watermark 이후 신규 데이터 없음"이 확인된 종목.
    /// `checked_today_date`가 오늘일 때만 의미가 있습니다.
    #[serde(default)]
    pub checked_today: BTreeSet<String>,
    /// API 호출 예산 스냅샷
    #[serde(default)]
    pub budget: Option<BudgetSnapshot>,
}

impl ProgressState {
    /// 빈 진행 상태 생성 (첫 실행).
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            version: PROGRESS_VERSION,
            start_date,
            end_date,
            completed_end_date: None,
            last_update: None,
            total_tickers: 0,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            checked_today_date: None,
            checked_today: BTreeSet::new(),
            budget: None,
        }
    }

    /// 종목 동기화 성공 기록. 실패 목록에서는 제거됩니다.
    pub fn mark_completed(&mut self, ticker: &str) {
        self.completed.insert(ticker.to_string());
        self.failed.remove(ticker);
    }

    /// 종목 실패 기록.
    ///
    /// 과거에 성공한 종목이 증분 시도에서 실패하면 completed와
    /// failed 양쪽에 남을 수 있습니다 (의도된 동작).
    pub fn mark_failed(&mut self, ticker: &str) {
        self.failed.insert(ticker.to_string());
    }

    /// 당일 "신규 데이터 없음" 캐시에 종목 추가.
    ///
    /// 캐시 날짜가 `today`와 다르면 먼저 비웁니다.
    pub fn mark_checked_today(&mut self, ticker: &str, today: NaiveDate) {
        if self.checked_today_date != Some(today) {
            self.checked_today.clear();
            self.checked_today_date = Some(today);
        }
        self.checked_today.insert(ticker.to_string());
    }

    /// 당일 캐시 조회. 날짜가 지났으면 빈 집합으로 취급합니다.
    pub fn checked_today_set(&self, today: NaiveDate) -> BTreeSet<String> {
        if self.checked_today_date == Some(today) {
            self.checked_today.clone()
        } else {
            BTreeSet::new()
        }
    }

    /// 아직 완료되지 않은 종목 수.
    pub fn remaining(&self) -> usize {
        self.total_tickers.saturating_sub(self.completed.len())
    }
}

/// 체크포인트 파일 저장소.
///
/// 문서 전체를 읽고 쓰며, 스트리밍하지 않습니다.
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 체크포인트 로드. 파일이 없으면 빈 상태를 반환합니다.
    ///
    /// 과거 버전 문서는 로드하면서 현재 버전으로 마이그레이션하며,
    /// 기존 completed/failed 집합은 보존됩니다.
    pub fn load_or_init(&self, start_date: NaiveDate, end_date: NaiveDate) -> Result<ProgressState> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "체크포인트 없음, 새로 시작");
            return Ok(ProgressState::new(start_date, end_date));
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let doc: Value = serde_json::from_str(&raw)?;
        let doc = migrate_document(doc)?;

        let state: ProgressState = serde_json::from_value(doc)?;
        info!(
            completed = state.completed.len(),
            failed = state.failed.len(),
            completed_end_date = ?state.completed_end_date,
            "체크포인트 로드 완료"
        );
        Ok(state)
    }

    /// 체크포인트 저장 (전체 덮어쓰기).
    ///
    /// 임시 파일에 쓴 뒤 rename 하므로 중간에 죽어도 기존
    /// 체크포인트는 손상되지 않습니다.
    pub fn save(&self, state: &mut ProgressState) -> Result<()> {
        state.last_update = Some(Utc::now());

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// 저장하되 실패는 로그만 남김.
    ///
    /// 체크포인트 저장 실패는 pass를 중단시키지 않습니다. 진행은
    /// 메모리에서 계속되고, 크래시 시 마지막 저장분까지만 복구됩니다.
    pub fn save_lossy(&self, state: &mut ProgressState) {
        if let Err(e) = self.save(state) {
            warn!(path = %self.path.display(), error = %e, "체크포인트 저장 실패 (계속 진행)");
        }
    }
}

/// 문서를 현재 버전까지 단계별로 마이그레이션.
pub fn migrate_document(mut doc: Value) -> Result<Value> {
    loop {
        let version = doc
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        match version {
            1 => migrate_v1_to_v2(&mut doc)?,
            2 => migrate_v2_to_v3(&mut doc)?,
            PROGRESS_VERSION => return Ok(doc),
            other => {
                return Err(SyncError::CheckpointFormat(format!(
                    "unsupported checkpoint version: {}",
                    other
                )))
            }
        }
    }
}

/// v1 → v2: `completed_end_date` 필드가 없던 초기 문서.
fn migrate_v1_to_v2(doc: &mut Value) -> Result<()> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| SyncError::CheckpointFormat("checkpoint is not an object".to_string()))?;

    obj.entry("completed_end_date").or_insert(Value::Null);
    obj.insert("version".to_string(), Value::from(2));
    Ok(())
}

/// v2 → v3: 당일 캐시와 예산 스냅샷 필드 추가.
fn migrate_v2_to_v3(doc: &mut Value) -> Result<()> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| SyncError::CheckpointFormat("checkpoint is not an object".to_string()))?;

    obj.entry("checked_today_date").or_insert(Value::Null);
    obj.entry("checked_today")
        .or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("budget").or_insert(Value::Null);
    obj.insert("version".to_string(), Value::from(3));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_mark_completed_clears_failed() {
        let mut state = ProgressState::new(d("2019-01-02"), d("2024-01-10"));
        state.mark_failed("sh.600000");
        assert!(state.failed.contains("sh.600000"));

        state.mark_completed("sh.600000");
        assert!(state.completed.contains("sh.600000"));
        assert!(!state.failed.contains("sh.600000"));
    }

    #[test]
    fn test_failed_after_completed_keeps_both() {
        let mut state = ProgressState::new(d("2019-01-02"), d("2024-01-10"));
        state.mark_completed("sh.600000");
        state.mark_failed("sh.600000");

        assert!(state.completed.contains("sh.600000"));
        assert!(state.failed.contains("sh.600000"));
    }

    #[test]
    fn test_checked_today_rolls_over() {
        let mut state = ProgressState::new(d("2019-01-02"), d("2024-01-10"));
        state.mark_checked_today("sh.600000", d("2024-01-10"));
        assert!(state.checked_today_set(d("2024-01-10")).contains("sh.600000"));

        // 다음 날에는 빈 집합으로 취급
        assert!(state.checked_today_set(d("2024-01-11")).is_empty());

        // 다음 날 새 항목을 기록하면 이전 항목은 사라짐
        state.mark_checked_today("sz.000001", d("2024-01-11"));
        let set = state.checked_today_set(d("2024-01-11"));
        assert!(set.contains("sz.000001"));
        assert!(!set.contains("sh.600000"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));

        let mut state = ProgressState::new(d("2019-01-02"), d("2024-01-10"));
        state.mark_completed("sh.600000");
        state.mark_failed("sz.000001");
        state.total_tickers = 2;
        store.save(&mut state).unwrap();

        let loaded = store.load_or_init(d("2019-01-02"), d("2024-01-10")).unwrap();
        assert_eq!(loaded.version, PROGRESS_VERSION);
        assert!(loaded.completed.contains("sh.600000"));
        assert!(loaded.failed.contains("sz.000001"));
        assert_eq!(loaded.remaining(), 1);
        assert!(loaded.last_update.is_some());
    }

    #[test]
    fn test_load_missing_file_returns_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("none.json"));

        let state = store.load_or_init(d("2019-01-02"), d("2024-01-10")).unwrap();
        assert!(state.completed.is_empty());
        assert_eq!(state.start_date, d("2019-01-02"));
    }

    #[test]
    fn test_migrate_v1_to_v2_adds_completed_end_date() {
        let mut doc = json!({
            "start_date": "2019-01-02",
            "end_date": "2024-01-10",
        });
        migrate_v1_to_v2(&mut doc).unwrap();

        assert_eq!(doc["version"], 2);
        assert!(doc["completed_end_date"].is_null());
    }

    #[test]
    fn test_migrate_v2_to_v3_adds_daily_cache() {
        let mut doc = json!({
            "version": 2,
            "completed_end_date": "2024-01-05",
        });
        migrate_v2_to_v3(&mut doc).unwrap();

        assert_eq!(doc["version"], 3);
        assert!(doc["checked_today_date"].is_null());
        assert_eq!(doc["checked_today"], json!([]));
        assert!(doc["budget"].is_null());
    }

    #[test]
    fn test_load_v1_document_preserves_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        // version 필드조차 없는 v1 문서
        let v1 = json!({
            "start_date": "2019-01-02",
            "end_date": "2024-01-10",
            "last_update": null,
            "total_tickers": 3,
            "completed": ["sh.600000", "sz.000001"],
            "failed": ["sz.300750"],
        });
        std::fs::write(&path, serde_json::to_string(&v1).unwrap()).unwrap();

        let store = ProgressStore::new(&path);
        let state = store.load_or_init(d("2019-01-02"), d("2024-01-10")).unwrap();

        assert_eq!(state.version, PROGRESS_VERSION);
        assert_eq!(state.completed.len(), 2);
        assert!(state.failed.contains("sz.300750"));
        assert!(state.completed_end_date.is_none());
        assert!(state.checked_today.is_empty());
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let doc = json!({ "version": 99 });
        assert!(migrate_document(doc).is_err());
    }
}
