//! K-line 데이터 수집의 외부 협력자(collaborator) 정의.
//!
//! 이 crate는 다음을 제공합니다:
//! - 5분봉 K-line 레코드 타입
//! - 원격 데이터 소스 Provider trait 및 HTTP 게이트웨이 구현
//! - 로컬 append 전용 저장소 trait 및 Postgres 구현

pub mod error;
pub mod kline;
pub mod provider;
pub mod store;

pub use error::{DataError, Result};
pub use kline::Kline5m;
pub use provider::{GatewayKlineProvider, KlineProvider};
pub use store::{KlineStore, PgKlineStore};
