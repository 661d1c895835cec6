//! Postgres 기반 K-line 저장소.
//!
//! `kline_5m` 테이블에 5분봉을 append 합니다. 같은 (ticker, ts)
//! 행이 이미 있으면 무시하므로 재수집이 중복을 만들지 않습니다.
//!
//! ```sql
//! CREATE TABLE kline_5m (
//!     ticker  TEXT        NOT NULL,
//!     ts      TIMESTAMPTZ NOT NULL,
//!     open    NUMERIC     NOT NULL,
//!     high    NUMERIC     NOT NULL,
//!     low     NUMERIC     NOT NULL,
//!     close   NUMERIC     NOT NULL,
//!     volume  NUMERIC     NOT NULL,
//!     amount  NUMERIC     NOT NULL,
//!     PRIMARY KEY (ticker, ts)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use tracing::debug;

use crate::{Kline5m, KlineStore, Result};

/// Postgres K-line 저장소.
#[derive(Clone)]
pub struct PgKlineStore {
    pool: PgPool,
}

impl PgKlineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KlineStore for PgKlineStore {
    async fn last_date(&self, ticker: &str) -> Result<Option<NaiveDate>> {
        let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            r#"
            SELECT MAX(ts)
            FROM kline_5m
            WHERE ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(ts,)| ts).map(|ts| ts.date_naive()))
    }

    async fn append(&self, ticker: &str, klines: &[Kline5m]) -> Result<usize> {
        if klines.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;

        for kline in klines {
            let result = sqlx::query(
                r#"
                INSERT INTO kline_5m (ticker, ts, open, high, low, close, volume, amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (ticker, ts) DO NOTHING
                "#,
            )
            .bind(ticker)
            .bind(kline.ts)
            .bind(kline.open)
            .bind(kline.high)
            .bind(kline.low)
            .bind(kline.close)
            .bind(kline.volume)
            .bind(kline.amount)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!(ticker, total = klines.len(), written, "K-line 저장 완료");
        Ok(written)
    }

    async fn known_tickers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ticker
            FROM kline_5m
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}
