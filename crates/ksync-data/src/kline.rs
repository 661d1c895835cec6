//! 5분봉 K-line 레코드 타입.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 5분봉 K-line 레코드.
///
/// 원격 소스에서 수취한 원시(미수정주가) 봉 하나를 표현합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline5m {
    /// 종목 코드 (예: sh.600000)
    pub ticker: String,
    /// 봉 시작 시각 (UTC)
    pub ts: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: Decimal,
    /// 거래대금
    pub amount: Decimal,
}

impl Kline5m {
    /// 봉이 속한 거래일 (캘린더 날짜 기준).
    pub fn trade_date(&self) -> NaiveDate {
        self.ts.date_naive()
    }
}
