//! 환경변수 기반 설정 모듈.

use chrono::{Local, NaiveDate};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// 원격 소스의 5분봉 최초 제공일.
pub const KLINE_5M_EARLIEST_DATE: &str = "2019-01-02";

/// 원격 소스 일일 호출 한도.
pub const DEFAULT_DAILY_LIMIT: u32 = 100_000;

/// 한도 도달 전 여유를 두는 안전 threshold.
pub const DEFAULT_SAFE_THRESHOLD: u32 = 90_000;

/// 동기화 설정.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 데이터베이스 URL
    pub database_url: String,
    /// BaoStock 게이트웨이 URL
    pub gateway_url: String,
    /// 목표 구간 시작일
    pub start_date: NaiveDate,
    /// 목표 구간 종료일 (기본: 오늘)
    pub end_date: NaiveDate,
    /// 일일 호출 한도
    pub daily_limit: u32,
    /// 이번 세션 호출 threshold
    pub safe_threshold: u32,
    /// 체크포인트 저장 주기 (처리 종목 수)
    pub batch_size: usize,
    /// 동시 fetch worker 수
    pub workers: usize,
    /// 체크포인트 파일 경로
    pub progress_file: String,
    /// 수렴 루프 설정
    pub converge: ConvergeConfig,
}

/// 수렴 루프 설정.
#[derive(Debug, Clone)]
pub struct ConvergeConfig {
    /// 진행 없는 iteration 후 대기 시간 (분)
    pub wait_minutes: u64,
    /// 최대 iteration 수 (0이면 무제한)
    pub max_iterations: usize,
}

impl SyncConfig {
    /// 환경변수에서 설정 로드.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            SyncError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })?;
        let gateway_url = std::env::var("KSYNC_GATEWAY_URL").map_err(|_| {
            SyncError::Config("KSYNC_GATEWAY_URL 환경변수가 설정되지 않았습니다".to_string())
        })?;

        let start_date = match std::env::var("KSYNC_START_DATE") {
            Ok(raw) => parse_date("KSYNC_START_DATE", &raw)?,
            Err(_) => KLINE_5M_EARLIEST_DATE
                .parse()
                .expect("constant date is valid"),
        };
        let end_date = match std::env::var("KSYNC_END_DATE") {
            Ok(raw) => parse_date("KSYNC_END_DATE", &raw)?,
            Err(_) => Local::now().date_naive(),
        };

        Ok(Self {
            database_url,
            gateway_url,
            start_date,
            end_date,
            daily_limit: env_var_parse("KSYNC_DAILY_LIMIT", DEFAULT_DAILY_LIMIT),
            safe_threshold: env_var_parse("KSYNC_SAFE_THRESHOLD", DEFAULT_SAFE_THRESHOLD),
            batch_size: env_var_parse("KSYNC_BATCH_SIZE", 50).max(1),
            workers: env_var_parse("KSYNC_WORKERS", 1),
            progress_file: std::env::var("KSYNC_PROGRESS_FILE")
                .unwrap_or_else(|_| "data/kline_5m_progress.json".to_string()),
            converge: ConvergeConfig {
                wait_minutes: env_var_parse("KSYNC_CONVERGE_WAIT_MINUTES", 60),
                max_iterations: env_var_parse("KSYNC_CONVERGE_MAX_ITERATIONS", 0),
            },
        })
    }
}

impl ConvergeConfig {
    /// iteration 간 대기 시간을 Duration으로 반환.
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_minutes * 60)
    }
}

/// YYYY-MM-DD 형식 날짜 파싱.
fn parse_date(key: &str, raw: &str) -> Result<NaiveDate> {
    raw.parse()
        .map_err(|_| SyncError::Config(format!("{}: 잘못된 날짜 형식: {}", key, raw)))
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용).
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
