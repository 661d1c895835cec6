//! 동기화 pass 오케스트레이션.
//!
//! pass 하나는 다음 단계를 순서대로 거칩니다:
//!
//! 1. Init — 체크포인트 로드, 예산 스냅샷 복원, 원격 소스 연결
//! 2. DiscoverUniverse — 목표 구간을 분기 단위로 샘플링해 종목
//!    목록 union (universe는 시간에 따라 변하므로 한 날짜로는 부족)
//! 3. Dispatch — worker pool + write sink 파이프라인 가동
//! 4. Drain — outcome 스트림을 소비하며 진행 상태 갱신, 주기 저장
//! 5. Checkpoint — 최종 집계 및 저장
//! 6. Done — 요약 로그
//!
//! 같은 목표 구간으로 pass를 반복 실행해도 결과는 한 번에 끝낸
//! 것과 같아야 합니다 (멱등 재개). 이미 저장된 종목은 watermark
//! 판정으로 자연히 건너뛰므로, 체크포인트가 일부 유실되어도
//! 중복 수집만 늘어날 뿐 데이터는 손상되지 않습니다.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Local, NaiveDate};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use ksync_data::{KlineProvider, KlineStore};

use crate::budget::{BudgetSnapshot, RateBudget};
use crate::error::{Result, SyncError};
use crate::pool::{FetchKind, PoolConfig, SeriesOutcome, SyncWorkerPool};
use crate::progress::{ProgressState, ProgressStore};
use crate::sink::WriteSink;
use crate::stats::PassStats;

/// pass 실행 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// 체크포인트에서 이어서 실행 (기본)
    Resume,
    /// 완료 목록을 버리고 전 종목 재확인
    Fresh,
    /// 실패 종목만 재시도
    RetryFailed,
}

/// orchestrator 설정 (환경 독립적인 부분만).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 목표 구간 시작일
    pub start_date: NaiveDate,
    /// 목표 구간 종료일
    pub end_date: NaiveDate,
    /// 이번 세션 호출 threshold
    pub threshold: u32,
    /// 체크포인트 저장 주기 (처리 종목 수)
    pub batch_size: usize,
    /// 동시 worker 수
    pub workers: usize,
    /// 세션당 최대 처리 종목 수
    pub max_tickers: Option<usize>,
}

/// pass 하나의 실행 결과 요약.
#[derive(Debug)]
pub struct PassSummary {
    /// 동작별 통계
    pub stats: PassStats,
    /// 누적 완료 종목 수
    pub total_completed: usize,
    /// 누적 실패 종목 수
    pub total_failed: usize,
    /// 미완료 종목 수
    pub remaining: usize,
    /// 현재 확정된 커버리지 종료일
    pub completed_end_date: Option<NaiveDate>,
}

/// 읽기 전용 상태 보고.
#[derive(Debug)]
pub struct StatusReport {
    pub progress_file: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub completed_end_date: Option<NaiveDate>,
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
    pub total_tickers: usize,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    pub budget: Option<BudgetSnapshot>,
}

impl StatusReport {
    /// 상태를 표준 출력으로 인쇄.
    pub fn print(&self) {
        println!("{}", "=".repeat(60));
        println!("5분봉 동기화 상태");
        println!("{}", "=".repeat(60));
        println!("체크포인트 파일: {}", self.progress_file);
        println!(
            "마지막 갱신: {}",
            self.last_update
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "N/A".to_string())
        );
        println!("목표 구간: {} ~ {}", self.start_date, self.end_date);
        println!(
            "확정 커버리지: {}",
            self.completed_end_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        );
        println!();
        println!("전체 종목: {}", self.total_tickers);
        println!("완료: {}", self.completed);
        println!("실패: {}", self.failed);
        println!("남은 종목: {}", self.remaining);
        if let Some(budget) = &self.budget {
            println!();
            println!("API 호출 ({}): {}", budget.date, budget.calls_used);
        }
        println!("{}", "=".repeat(60));
    }
}

/// 동기화 orchestrator.
pub struct SyncOrchestrator {
    provider: Arc<dyn KlineProvider>,
    store: Arc<dyn KlineStore>,
    budget: Arc<RateBudget>,
    progress: ProgressStore,
    config: OrchestratorConfig,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<dyn KlineProvider>,
        store: Arc<dyn KlineStore>,
        budget: Arc<RateBudget>,
        progress: ProgressStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            store,
            budget,
            progress,
            config,
        }
    }

    /// 동기화 pass 하나 실행.
    ///
    /// rate 소진은 오류가 아니라 계획된 정지 조건입니다. 어떤
    /// 경로로 끝나든 체크포인트를 저장하고 요약을 남깁니다.
    pub async fn run_pass(&self, mode: PassMode) -> Result<PassSummary> {
        let started = Instant::now();
        let today = Local::now().date_naive();

        // ---- Init ----
        let mut state = self
            .progress
            .load_or_init(self.config.start_date, self.config.end_date)?;
        state.start_date = self.config.start_date;
        state.end_date = self.config.end_date;

        if let Some(snapshot) = state.budget {
            self.budget.restore(snapshot).await;
        }
        if mode == PassMode::Fresh {
            info!("전체 재확인 모드: 완료 목록 초기화");
            state.completed.clear();
            state.completed_end_date = None;
        }

        info!(
            mode = ?mode,
            start_date = %state.start_date,
            end_date = %state.end_date,
            threshold = self.config.threshold,
            remaining_calls = self.budget.remaining(self.config.threshold).await,
            "동기화 pass 시작"
        );

        self.provider
            .connect()
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        let result = self.run_pass_inner(mode, today, &mut state, started).await;

        // 연결 종료는 결과와 무관하게 수행
        self.provider.disconnect().await;
        result
    }

    async fn run_pass_inner(
        &self,
        mode: PassMode,
        today: NaiveDate,
        state: &mut ProgressState,
        started: Instant,
    ) -> Result<PassSummary> {
        // ---- DiscoverUniverse ----
        let universe = self.discover_universe(state).await?;
        state.total_tickers = universe.len();

        let mut tickers: Vec<String> = match mode {
            PassMode::RetryFailed => {
                let failed: Vec<String> = state.failed.iter().cloned().collect();
                info!(count = failed.len(), "실패 종목 재시도 모드");
                failed
            }
            _ => universe,
        };

        if let Some(max) = self.config.max_tickers {
            if tickers.len() > max {
                info!(max, "세션당 종목 수 제한 적용");
                tickers.truncate(max);
            }
        }

        if tickers.is_empty() {
            warn!("처리할 종목이 없습니다");
            let mut stats = PassStats::new();
            stats.elapsed = started.elapsed();
            state.budget = Some(self.budget.snapshot().await);
            self.progress.save_lossy(state);
            return Ok(summary_of(stats, state));
        }

        // ---- Dispatch ----
        let dispatched = tickers.len();
        info!(count = dispatched, "디스패치 시작");

        let checked_today = state.checked_today_set(today);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<SeriesOutcome>(256);
        let sink = WriteSink::spawn(self.store.clone(), outcome_tx.clone());
        let sink_tx = sink.sender();

        let pool = SyncWorkerPool::new(
            self.provider.clone(),
            self.store.clone(),
            self.budget.clone(),
            PoolConfig {
                workers: self.config.workers,
                threshold: self.config.threshold,
            },
        );

        let target_start = state.start_date;
        let target_end = state.end_date;
        let pool_task = tokio::spawn(async move {
            pool.run(
                tickers,
                target_start,
                target_end,
                checked_today,
                outcome_tx,
                sink_tx,
            )
            .await;
            // worker가 모두 끝난 뒤 남은 쓰기 큐를 비우고 종료
            sink.close().await;
        });

        // ---- Drain ----
        let mut stats = PassStats::new();
        let mut processed = 0usize;
        // batch_size 0은 매 종목 저장으로 취급 (나눗셈 0 방지)
        let batch_size = self.config.batch_size.max(1);

        while let Some(outcome) = outcome_rx.recv().await {
            self.apply_outcome(&mut stats, state, outcome, today);
            processed += 1;

            // 주기적 체크포인트: 크래시로 잃는 작업을 한 배치로 제한
            if processed % batch_size == 0 {
                state.budget = Some(self.budget.snapshot().await);
                self.progress.save_lossy(state);
            }
        }

        if let Err(e) = pool_task.await {
            error!(error = %e, "pool task 비정상 종료");
        }

        // ---- Checkpoint ----
        stats.elapsed = started.elapsed();
        if stats.fully_covered() && stats.total == dispatched && mode != PassMode::RetryFailed {
            // 단 한 건이라도 실패/중단이 있으면 커버리지를 전진시키지
            // 않는다. completed_end_date는 항상 참인 하한이어야 한다.
            state.completed_end_date = Some(state.end_date);
            info!(completed_end_date = %state.end_date, "전 종목 커버리지 확정");
        }

        state.budget = Some(self.budget.snapshot().await);
        self.progress.save_lossy(state);

        // ---- Done ----
        stats.log_summary("5분봉 동기화");
        info!(
            completed = state.completed.len(),
            failed = state.failed.len(),
            remaining = state.remaining(),
            "pass 종료"
        );

        Ok(summary_of(stats, state))
    }

    /// universe 발견: 분기 시작일들 + 종료일 시점의 종목 목록 union.
    ///
    /// 발견 호출도 예산을 1건씩 소비합니다. 예산이 소진되면 남은
    /// 샘플 날짜는 건너뜁니다. 날짜 하나의 조회 실패는 경고만
    /// 남기고 계속합니다.
    async fn discover_universe(&self, state: &ProgressState) -> Result<Vec<String>> {
        let dates = sample_dates(state.start_date, state.end_date);
        info!(samples = dates.len(), "종목 universe 샘플링 시작");

        let mut all = BTreeSet::new();
        for date in dates {
            if !self.budget.try_consume(self.config.threshold).await {
                warn!(%date, "예산 소진, 남은 universe 샘플 생략");
                break;
            }
            self.budget.record(1).await;

            match self.provider.list_tickers(date).await {
                Ok(tickers) => {
                    all.extend(tickers);
                }
                Err(e) => {
                    warn!(%date, error = %e, "종목 목록 조회 실패");
                }
            }
        }

        info!(count = all.len(), "universe 확정");
        Ok(all.into_iter().collect())
    }

    /// outcome 하나를 통계와 진행 상태에 반영.
    fn apply_outcome(
        &self,
        stats: &mut PassStats,
        state: &mut ProgressState,
        outcome: SeriesOutcome,
        today: NaiveDate,
    ) {
        stats.total += 1;
        match outcome {
            SeriesOutcome::Written { ticker, kind, rows } => {
                match kind {
                    FetchKind::Full => stats.new_full += 1,
                    FetchKind::Incremental => stats.incremental += 1,
                }
                stats.total_klines += rows;
                state.mark_completed(&ticker);
            }
            SeriesOutcome::NoNewData { ticker, .. } => {
                stats.empty += 1;
                // 오늘은 다시 조회하지 않도록 당일 캐시에 기록
                state.mark_checked_today(&ticker, today);
                state.mark_completed(&ticker);
            }
            SeriesOutcome::AlreadyCurrent { ticker } => {
                stats.up_to_date += 1;
                state.mark_completed(&ticker);
            }
            SeriesOutcome::SkippedCheckedToday { .. } => {
                stats.skipped_today += 1;
            }
            SeriesOutcome::Failed { ticker, error } => {
                stats.failed += 1;
                error!(ticker = %ticker, error = %error, "종목 동기화 실패");
                state.mark_failed(&ticker);
            }
            SeriesOutcome::WriteFailed { ticker, error } => {
                // fetch는 성공했지만 저장 전이므로 완료로 집계하지
                // 않는다. 다음 pass에서 같은 구간을 다시 수집한다.
                stats.write_failed += 1;
                error!(ticker = %ticker, error = %error, "저장 실패");
                state.mark_failed(&ticker);
            }
            SeriesOutcome::Stopped { .. } => {
                stats.stopped += 1;
            }
        }
    }

    /// 목표 구간이 전부 커버될 때까지 pass 반복.
    ///
    /// - 모든 종목이 이미 최신이면 종료
    /// - 진행이 있었으면 즉시 다음 iteration
    /// - 진행이 전혀 없으면 지정 시간 대기 후 재시도
    pub async fn run_converge(
        &self,
        wait: std::time::Duration,
        max_iterations: usize,
    ) -> Result<PassSummary> {
        let mut iteration = 0usize;
        loop {
            iteration += 1;
            info!(iteration, "수렴 루프 iteration 시작");

            let summary = self.run_pass(PassMode::Resume).await?;

            let stats = &summary.stats;
            let all_current =
                stats.total > 0 && stats.up_to_date + stats.skipped_today == stats.total;
            if all_current || summary.completed_end_date == Some(self.config.end_date) {
                info!(iteration, "목표 구간 커버리지 달성, 수렴 루프 종료");
                return Ok(summary);
            }

            if max_iterations > 0 && iteration >= max_iterations {
                warn!(iteration, "최대 iteration 도달, 수렴 루프 종료");
                return Ok(summary);
            }

            if stats.made_progress() {
                info!(iteration, "진행 확인, 다음 iteration 즉시 시작");
                continue;
            }

            info!(
                iteration,
                wait_secs = wait.as_secs(),
                "진행 없음, 대기 후 재시도"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// 읽기 전용 상태 보고 생성 (원격 소스에 접근하지 않음).
    pub fn status(&self) -> Result<StatusReport> {
        status_report(&self.progress, self.config.start_date, self.config.end_date)
    }
}

/// 체크포인트 파일만으로 상태 보고 생성.
pub fn status_report(
    progress: &ProgressStore,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<StatusReport> {
    let state = progress.load_or_init(start_date, end_date)?;

    Ok(StatusReport {
        progress_file: progress.path().display().to_string(),
        start_date: state.start_date,
        end_date: state.end_date,
        completed_end_date: state.completed_end_date,
        last_update: state.last_update,
        total_tickers: state.total_tickers,
        completed: state.completed.len(),
        failed: state.failed.len(),
        remaining: state.remaining(),
        budget: state.budget,
    })
}

fn summary_of(stats: PassStats, state: &ProgressState) -> PassSummary {
    PassSummary {
        stats,
        total_completed: state.completed.len(),
        total_failed: state.failed.len(),
        remaining: state.remaining(),
        completed_end_date: state.completed_end_date,
    }
}

/// universe 샘플 날짜: 구간 내 분기 시작일들 + 구간 종료일.
fn sample_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    let mut year = start.year();
    let mut month = ((start.month0() / 3) * 3) + 1; // 해당 분기 시작 월
    while let Some(quarter_start) = NaiveDate::from_ymd_opt(year, month, 1) {
        if quarter_start > end {
            break;
        }
        if quarter_start >= start {
            dates.push(quarter_start);
        }
        month += 3;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    if dates.last() != Some(&end) {
        dates.push(end);
    }
    dates
}
