//! 로컬 K-line 저장소.
//!
//! 저장소는 append 전용이며, 동시 writer에 안전하지 않습니다.
//! 동기화 코어의 WriteSink가 append 경로를 단독 소유하고
//! 직렬화하는 것을 전제로 합니다.

pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Kline5m, Result};

/// K-line 저장소 trait.
#[async_trait]
pub trait KlineStore: Send + Sync {
    /// 종목의 watermark (저장된 마지막 거래일) 조회.
    ///
    /// 저장된 데이터가 없으면 `None`.
    async fn last_date(&self, ticker: &str) -> Result<Option<NaiveDate>>;

    /// 레코드 배치 append. 저장된 행 수를 반환합니다.
    async fn append(&self, ticker: &str, klines: &[Kline5m]) -> Result<usize>;

    /// 저장소에 존재하는 전체 종목 목록.
    async fn known_tickers(&self) -> Result<Vec<String>>;
}

pub use postgres::PgKlineStore;
