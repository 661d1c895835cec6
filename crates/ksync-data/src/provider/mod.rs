//! 원격 데이터 소스 Provider.
//!
//! 동기화 코어는 이 trait을 통해서만 원격 소스와 통신합니다.
//! 호출 한 번이 논리적 API 호출 한 번에 대응하며, rate budget
//! 계산은 호출자(코어) 책임입니다.

pub mod gateway;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Kline5m, Result};

/// K-line Provider trait.
#[async_trait]
pub trait KlineProvider: Send + Sync {
    /// Provider 이름.
    fn name(&self) -> &str;

    /// 원격 소스 세션 확인/수립.
    ///
    /// 실패 시 해당 pass 전체가 중단됩니다 (재시도 없음).
    async fn connect(&self) -> Result<()>;

    /// 원격 소스 세션 종료. 오류는 무시합니다.
    async fn disconnect(&self);

    /// 구간 `[start, end]`의 5분봉 조회.
    ///
    /// 데이터가 없는 구간은 빈 Vec으로 성공 반환합니다.
    async fn fetch_klines(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Kline5m>>;

    /// 기준일 시점의 전체 종목 목록 조회.
    async fn list_tickers(&self, as_of: NaiveDate) -> Result<Vec<String>>;
}

pub use gateway::GatewayKlineProvider;
