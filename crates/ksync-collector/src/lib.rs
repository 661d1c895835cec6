//! 5분봉 K-line 증분 동기화 코어.
//!
//! 이 crate는 rate limit이 있는 원격 소스에서 로컬 저장소로
//! 5분봉 데이터를 여러 번의 실행에 걸쳐 동기화하는 바이너리를
//! 제공합니다:
//! - 일일 API 호출 예산 관리 (RateBudget)
//! - 재시작에도 유지되는 진행 상태 체크포인트 (ProgressStore)
//! - 종목별 최신성 판정 (FreshnessResolver)
//! - 동시 fetch / 단일 writer 파이프라인 (SyncWorkerPool + WriteSink)
//! - pass 단위 오케스트레이션 및 수렴 루프 (SyncOrchestrator)

pub mod budget;
pub mod config;
pub mod error;
pub mod freshness;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod sink;
pub mod stats;

pub use budget::{BudgetSnapshot, RateBudget};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use freshness::{resolve_action, SyncAction};
pub use orchestrator::{OrchestratorConfig, PassMode, PassSummary, StatusReport, SyncOrchestrator};
pub use pool::{FetchKind, PoolConfig, SeriesOutcome, SyncWorkerPool};
pub use progress::{ProgressState, ProgressStore};
pub use stats::PassStats;
