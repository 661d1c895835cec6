//! 일일 API 호출 예산 관리.
//!
//! 원격 소스는 하루 호출 수를 제한하므로 (기본 100,000회),
//! 모든 fetch/종목목록 호출을 여기서 계수합니다. 날짜가 바뀌면
//! 카운터는 자동으로 0부터 다시 시작합니다.
//!
//! 카운터 상태는 체크포인트 문서에 스냅샷으로 저장되어, 같은 날
//! 프로세스를 다시 실행해도 예산이 이어서 계산됩니다.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// 예산 카운터 스냅샷 (체크포인트 저장용).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// 당일 사용한 호출 수
    pub calls_used: u32,
    /// 카운터가 적용되는 날짜
    pub date: NaiveDate,
}

struct BudgetInner {
    calls_today: u32,
    date: NaiveDate,
}

impl BudgetInner {
    /// 날짜가 바뀌었으면 카운터 리셋.
    fn roll_over(&mut self, today: NaiveDate) {
        if self.date != today {
            self.calls_today = 0;
            self.date = today;
        }
    }
}

/// 일일 호출 예산 관리자.
///
/// 모든 연산은 내부 lock으로 직렬화되며, 동시 호출자 간
/// lost update가 발생하지 않습니다.
pub struct RateBudget {
    daily_limit: u32,
    inner: Mutex<BudgetInner>,
}

impl RateBudget {
    /// 일일 한도로 예산 생성. 카운터는 오늘 날짜로 0부터 시작합니다.
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            inner: Mutex::new(BudgetInner {
                calls_today: 0,
                date: today(),
            }),
        }
    }

    /// 일일 한도.
    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// 당일 호출 수가 threshold 미만인지 확인.
    ///
    /// 확인만 하고 카운터를 올리지는 않습니다. 실제 호출 후에는
    /// `record`를 호출해야 합니다.
    pub async fn try_consume(&self, threshold: u32) -> bool {
        let mut inner = self.inner.lock().await;
        inner.roll_over(today());
        inner.calls_today < threshold
    }

    /// 호출 `n`건 기록.
    pub async fn record(&self, n: u32) {
        let mut inner = self.inner.lock().await;
        inner.roll_over(today());
        inner.calls_today = inner.calls_today.saturating_add(n);
    }

    /// threshold까지 남은 호출 수.
    pub async fn remaining(&self, threshold: u32) -> u32 {
        let mut inner = self.inner.lock().await;
        inner.roll_over(today());
        threshold.saturating_sub(inner.calls_today)
    }

    /// 현재 카운터 스냅샷.
    pub async fn snapshot(&self) -> BudgetSnapshot {
        let inner = self.inner.lock().await;
        BudgetSnapshot {
            calls_used: inner.calls_today,
            date: inner.date,
        }
    }

    /// 스냅샷에서 카운터 복원.
    ///
    /// 스냅샷 날짜가 오늘이 아니면 다음 접근 시 자동으로 리셋됩니다.
    pub async fn restore(&self, snapshot: BudgetSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.calls_today = snapshot.calls_used;
        inner.date = snapshot.date;
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
