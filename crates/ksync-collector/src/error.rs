//! 동기화 오류 타입.

use thiserror::Error;

/// 동기화 코어 오류.
#[derive(Debug, Error)]
pub enum SyncError {
    /// 데이터 소스/저장소 오류
    #[error("Data error: {0}")]
    Data(#[from] ksync_data::DataError),

    /// 체크포인트 파일 입출력 오류
    #[error("Checkpoint I/O error: {0}")]
    CheckpointIo(#[from] std::io::Error),

    /// 체크포인트 문서 파싱/마이그레이션 오류
    #[error("Checkpoint document error: {0}")]
    CheckpointFormat(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),

    /// 원격 소스 연결 실패 (pass 전체 중단)
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::CheckpointFormat(err.to_string())
    }
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, SyncError>;
