//! BaoStock HTTP 게이트웨이 클라이언트.
//!
//! 원격 소스(BaoStock)는 자체 바이너리 프로토콜을 사용하므로,
//! 운영 환경에서는 JSON을 말하는 HTTP 게이트웨이 뒤에 두고 접근합니다.
//! 이 클라이언트는 게이트웨이의 세 엔드포인트만 사용합니다:
//!
//! - `POST /api/login`, `POST /api/logout` — 세션 관리
//! - `GET /api/kline5m` — 구간별 5분봉 조회
//! - `GET /api/all_stock` — 기준일 시점 전체 종목 목록
//!
//! 세션 토큰은 클라이언트 내부에서 관리합니다. 연결당 rate limit은
//! 게이트웨이 서버가 강제하므로, 동시 호출 수 제어는 호출자 책임입니다.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{DataError, Kline5m, KlineProvider, Result};

/// 게이트웨이가 rate limit 초과 시 반환하는 오류 코드.
const ERROR_CODE_RATE_LIMITED: &str = "10002";

/// BaoStock HTTP 게이트웨이 Provider.
pub struct GatewayKlineProvider {
    client: reqwest::Client,
    base_url: String,
    /// 로그인 후 발급되는 세션 토큰
    session: Mutex<Option<String>>,
}

/// 게이트웨이 공통 응답 래퍼.
///
/// `data` 필드의 `#[serde(default)]`가 `T: Default`를 요구하지
/// 않도록 역직렬화 bound를 명시합니다 (`Option::default`로 충분).
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct GatewayResponse<T> {
    error_code: String,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    data: Option<T>,
}

/// 로그인 응답 본문.
#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

/// 5분봉 행 (게이트웨이는 모든 값을 문자열로 반환).
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct KlineRow {
    date: String,
    time: String,
    code: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    amount: String,
}

/// 종목 목록 행.
#[derive(Debug, Deserialize)]
struct StockRow {
    code: String,
}

impl GatewayKlineProvider {
    /// 게이트웨이 주소로 클라이언트 생성.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Mutex::new(None),
        }
    }

    /// 현재 세션 토큰 반환 (없으면 NotConnected).
    async fn token(&self) -> Result<String> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or(DataError::NotConnected)
    }

    /// 응답 래퍼 검사 후 본문 추출.
    fn unwrap_response<T>(resp: GatewayResponse<T>) -> Result<Option<T>> {
        match resp.error_code.as_str() {
            "0" => Ok(resp.data),
            ERROR_CODE_RATE_LIMITED => Err(DataError::RateLimited),
            code => Err(DataError::Gateway {
                code: code.to_string(),
                message: resp.error_msg,
            }),
        }
    }
}

/// 게이트웨이 5분봉 행을 레코드로 변환.
///
/// `time` 필드는 BaoStock 형식 `YYYYMMDDHHMMSSsss`입니다.
fn parse_kline_row(row: KlineRow) -> Result<Kline5m> {
    if row.time.len() < 14 {
        return Err(DataError::InvalidData(format!(
            "unexpected time field: {}",
            row.time
        )));
    }
    let naive = NaiveDateTime::parse_from_str(&row.time[..14], "%Y%m%d%H%M%S")
        .map_err(|e| DataError::InvalidData(format!("bad timestamp {}: {}", row.time, e)))?;

    let parse_dec = |name: &str, raw: &str| -> Result<Decimal> {
        if raw.is_empty() {
            return Ok(Decimal::ZERO);
        }
        Decimal::from_str(raw)
            .map_err(|e| DataError::InvalidData(format!("bad {} value {}: {}", name, raw, e)))
    };

    Ok(Kline5m {
        ticker: row.code,
        ts: Utc.from_utc_datetime(&naive),
        open: parse_dec("open", &row.open)?,
        high: parse_dec("high", &row.high)?,
        low: parse_dec("low", &row.low)?,
        close: parse_dec("close", &row.close)?,
        volume: parse_dec("volume", &row.volume)?,
        amount: parse_dec("amount", &row.amount)?,
    })
}

#[async_trait]
impl KlineProvider for GatewayKlineProvider {
    fn name(&self) -> &str {
        "baostock-gateway"
    }

    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let url = format!("{}/api/login", self.base_url);
        let resp: GatewayResponse<LoginData> =
            self.client.post(&url).send().await?.json().await?;

        let data = Self::unwrap_response(resp)?
            .ok_or_else(|| DataError::Connection("login returned no token".to_string()))?;

        info!(provider = self.name(), "게이트웨이 로그인 성공");
        *session = Some(data.token);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        let Some(token) = session.take() else {
            return;
        };

        // 로그아웃 실패는 무시 (연결이 이미 닫혔을 수 있음)
        let url = format!("{}/api/logout", self.base_url);
        if let Err(e) = self.client.post(&url).bearer_auth(&token).send().await {
            warn!(error = %e, "게이트웨이 로그아웃 실패 (무시)");
        }
    }

    async fn fetch_klines(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Kline5m>> {
        let token = self.token().await?;
        let url = format!("{}/api/kline5m", self.base_url);

        debug!(ticker, %start, %end, "5분봉 조회 요청");

        let resp: GatewayResponse<Vec<KlineRow>> = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("code", ticker),
                ("start_date", &start.to_string()),
                ("end_date", &end.to_string()),
                ("frequency", "5"),
                ("adjustflag", "3"),
            ])
            .send()
            .await?
            .json()
            .await?;

        let rows = Self::unwrap_response(resp)?.unwrap_or_default();
        rows.into_iter().map(parse_kline_row).collect()
    }

    async fn list_tickers(&self, as_of: NaiveDate) -> Result<Vec<String>> {
        let token = self.token().await?;
        let url = format!("{}/api/all_stock", self.base_url);

        let resp: GatewayResponse<Vec<StockRow>> = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("day", &as_of.to_string())])
            .send()
            .await?
            .json()
            .await?;

        let rows = Self::unwrap_response(resp)?.unwrap_or_default();
        Ok(rows.into_iter().map(|r| r.code).collect())
    }
}
