//! 데이터 협력자 오류 타입.

use thiserror::Error;

/// 데이터 소스/저장소 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// HTTP 요청 실패
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 게이트웨이가 오류 코드를 반환함
    #[error("Gateway error (code {code}): {message}")]
    Gateway { code: String, message: String },

    /// 데이터베이스 오류
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 원격 소스 연결 안 됨
    #[error("Not connected to remote source")]
    NotConnected,

    /// 원격 소스 연결 실패 (로그인/로그아웃)
    #[error("Connection error: {0}")]
    Connection(String),

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 원격 소스 rate limit 초과
    #[error("Rate limited by remote source")]
    RateLimited,
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, DataError>;
