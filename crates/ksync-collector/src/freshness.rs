//! 종목별 최신성 판정.
//!
//! 종목 하나에 대해 (목표 구간, 저장소 watermark, 당일 캐시)를
//! 입력으로 받아 이번 pass에서 취할 동작을 결정합니다. 저장소
//! watermark 조회 외의 부수효과는 없습니다.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use ksync_data::KlineStore;

use crate::Result;

/// 종목 하나에 대한 동기화 동작.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// 저장된 데이터 없음: 목표 구간 전체 수집
    FullFetch { start: NaiveDate, end: NaiveDate },
    /// watermark 다음 날부터 증분 수집
    IncrementalFetch { start: NaiveDate, end: NaiveDate },
    /// watermark가 이미 목표 종료일 이상
    AlreadyCurrent,
    /// 오늘 이미 "신규 데이터 없음"을 확인함
    SkipCheckedToday,
}

/// 종목의 동기화 동작 결정.
///
/// 날짜 비교는 캘린더 날짜 기준이며, watermark가 `target_end`와
/// 정확히 같으면 최신으로 판정해 다시 수집하지 않습니다.
pub async fn resolve_action(
    store: &dyn KlineStore,
    ticker: &str,
    target_start: NaiveDate,
    target_end: NaiveDate,
    checked_today: &BTreeSet<String>,
) -> Result<SyncAction> {
    if checked_today.contains(ticker) {
        return Ok(SyncAction::SkipCheckedToday);
    }

    match store.last_date(ticker).await? {
        None => Ok(SyncAction::FullFetch {
            start: target_start,
            end: target_end,
        }),
        Some(watermark) if watermark >= target_end => Ok(SyncAction::AlreadyCurrent),
        Some(watermark) => Ok(SyncAction::IncrementalFetch {
            start: watermark + Duration::days(1),
            end: target_end,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ksync_data::{DataError, Kline5m};
    use std::collections::HashMap;

    /// watermark 테이블만 가진 테스트용 저장소.
    struct FixedStore {
        watermarks: HashMap<String, NaiveDate>,
    }

    #[async_trait]
    impl KlineStore for FixedStore {
        async fn last_date(
            &self,
            ticker: &str,
        ) -> std::result::Result<Option<NaiveDate>, DataError> {
            Ok(self.watermarks.get(ticker).copied())
        }

        async fn append(
            &self,
            _ticker: &str,
            _klines: &[Kline5m],
        ) -> std::result::Result<usize, DataError> {
            unreachable!("resolver must not write")
        }

        async fn known_tickers(&self) -> std::result::Result<Vec<String>, DataError> {
            Ok(self.watermarks.keys().cloned().collect())
        }
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn store_with(entries: &[(&str, &str)]) -> FixedStore {
        FixedStore {
            watermarks: entries
                .iter()
                .map(|(t, date)| (t.to_string(), d(date)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_no_watermark_resolves_full_fetch() {
        let store = store_with(&[]);
        let action = resolve_action(
            &store,
            "sh.600000",
            d("2019-01-02"),
            d("2024-01-10"),
            &BTreeSet::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            action,
            SyncAction::FullFetch {
                start: d("2019-01-02"),
                end: d("2024-01-10"),
            }
        );
    }

    #[tokio::test]
    async fn test_stale_watermark_resolves_incremental() {
        let store = store_with(&[("sh.600000", "2024-01-05")]);
        let action = resolve_action(
            &store,
            "sh.600000",
            d("2019-01-02"),
            d("2024-01-10"),
            &BTreeSet::new(),
        )
        .await
        .unwrap();

        // 구간은 watermark 다음 날부터
        assert_eq!(
            action,
            SyncAction::IncrementalFetch {
                start: d("2024-01-06"),
                end: d("2024-01-10"),
            }
        );
    }

    #[tokio::test]
    async fn test_watermark_equal_to_target_end_is_current() {
        let store = store_with(&[("sh.600000", "2024-01-10")]);
        let action = resolve_action(
            &store,
            "sh.600000",
            d("2019-01-02"),
            d("2024-01-10"),
            &BTreeSet::new(),
        )
        .await
        .unwrap();

        assert_eq!(action, SyncAction::AlreadyCurrent);
    }

    #[tokio::test]
    async fn test_watermark_past_target_end_is_current() {
        let store = store_with(&[("sh.600000", "2024-02-01")]);
        let action = resolve_action(
            &store,
            "sh.600000",
            d("2019-01-02"),
            d("2024-01-10"),
            &BTreeSet::new(),
        )
        .await
        .unwrap();

        assert_eq!(action, SyncAction::AlreadyCurrent);
    }

    #[tokio::test]
    async fn test_checked_today_wins_over_watermark() {
        let store = store_with(&[("sh.600000", "2024-01-05")]);
        let mut checked = BTreeSet::new();
        checked.insert("sh.600000".to_string());

        let action = resolve_action(
            &store,
            "sh.600000",
            d("2019-01-02"),
            d("2024-01-10"),
            &checked,
        )
        .await
        .unwrap();

        assert_eq!(action, SyncAction::SkipCheckedToday);
    }
}
