//! Pass 단위 수집 통계.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 한 pass의 동작별 통계.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassStats {
    /// 디스패치된 종목 수
    pub total: usize,
    /// 전체 구간 신규 수집 성공
    pub new_full: usize,
    /// 증분 수집 성공
    pub incremental: usize,
    /// 이미 최신 (watermark >= 목표 종료일)
    pub up_to_date: usize,
    /// 당일 캐시로 건너뜀
    pub skipped_today: usize,
    /// 조회 성공, 신규 데이터 없음
    pub empty: usize,
    /// fetch 실패
    pub failed: usize,
    /// 저장(append) 실패
    pub write_failed: usize,
    /// 예산 소진으로 미처리
    pub stopped: usize,
    /// 저장된 총 봉 수
    pub total_klines: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이번 pass에서 저장소나 진행 상태가 바뀌었는지.
    ///
    /// 수렴 루프는 변경이 전혀 없는 pass가 반복되면 대기합니다.
    pub fn made_progress(&self) -> bool {
        self.new_full + self.incremental + self.empty + self.failed + self.write_failed > 0
    }

    /// 실패 없이 모든 종목이 커버되었는지 (Stopped 포함 불가).
    pub fn fully_covered(&self) -> bool {
        self.failed == 0 && self.write_failed == 0 && self.stopped == 0 && self.covered() == self.total
    }

    /// 목표 구간까지 커버된 것으로 집계되는 종목 수.
    pub fn covered(&self) -> usize {
        self.new_full + self.incremental + self.up_to_date + self.skipped_today + self.empty
    }

    /// 통계 요약 로그 출력.
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            new_full = self.new_full,
            incremental = self.incremental,
            up_to_date = self.up_to_date,
            skipped_today = self.skipped_today,
            empty = self.empty,
            failed = self.failed,
            write_failed = self.write_failed,
            stopped = self.stopped,
            total_klines = self.total_klines,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "pass 완료"
        );
    }
}
