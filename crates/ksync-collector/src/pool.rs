//! 동시 fetch worker pool.
//!
//! 종목 목록을 공유 작업 큐에 넣고 worker task N개가 소비합니다.
//! worker는 종목마다 최신성 판정 → (필요 시) 원격 fetch → sink 제출
//! 순서로 처리하며, 결과는 outcome 채널로 orchestrator에 스트리밍
//! 됩니다.
//!
//! 원격 fetch 전에는 반드시 예산을 확인합니다. 예산이 소진되면
//! 공유 stop 플래그를 세워 새 작업 디스패치를 멈추고, 남은 종목은
//! `Stopped`로 보고합니다. 이미 진행 중인 fetch는 끝까지 수행됩니다.
//!
//! 운영 환경에서는 원격 소스가 연결당 rate limit을 걸기 때문에
//! worker 수를 1로 둡니다. 정확성은 worker 수와 무관합니다.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use ksync_data::{KlineProvider, KlineStore};

use crate::budget::RateBudget;
use crate::freshness::{resolve_action, SyncAction};
use crate::sink::WriteTask;

/// fetch 동작의 종류 (통계 집계용).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// 목표 구간 전체 신규 수집
    Full,
    /// watermark 이후 증분 수집
    Incremental,
}

/// 종목 하나의 처리 결과.
///
/// worker와 sink 양쪽에서 생성되어 orchestrator로 전달됩니다.
/// fetch가 성공해도 저장이 끝나기 전에는 완료로 보고하지 않습니다
/// (`Written`은 sink가 append를 마친 뒤에만 발생).
#[derive(Debug)]
pub enum SeriesOutcome {
    /// fetch + append 성공
    Written {
        ticker: String,
        kind: FetchKind,
        rows: usize,
    },
    /// fetch는 성공했으나 append 실패
    WriteFailed { ticker: String, error: String },
    /// 조회 성공, watermark 이후 신규 데이터 없음
    NoNewData { ticker: String, kind: FetchKind },
    /// watermark가 이미 목표 종료일 이상
    AlreadyCurrent { ticker: String },
    /// 당일 캐시로 건너뜀
    SkippedCheckedToday { ticker: String },
    /// fetch 또는 판정 실패
    Failed { ticker: String, error: String },
    /// 예산 소진으로 미처리
    Stopped { ticker: String },
}

impl SeriesOutcome {
    /// 결과가 가리키는 종목.
    pub fn ticker(&self) -> &str {
        match self {
            Self::Written { ticker, .. }
            | Self::WriteFailed { ticker, .. }
            | Self::NoNewData { ticker, .. }
            | Self::AlreadyCurrent { ticker }
            | Self::SkippedCheckedToday { ticker }
            | Self::Failed { ticker, .. }
            | Self::Stopped { ticker } => ticker,
        }
    }
}

/// worker pool 설정.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 동시 worker 수 (운영 기본값 1)
    pub workers: usize,
    /// 이번 pass의 호출 예산 threshold
    pub threshold: u32,
}

/// 동시 fetch worker pool.
pub struct SyncWorkerPool {
    provider: Arc<dyn KlineProvider>,
    store: Arc<dyn KlineStore>,
    budget: Arc<RateBudget>,
    config: PoolConfig,
}

impl SyncWorkerPool {
    pub fn new(
        provider: Arc<dyn KlineProvider>,
        store: Arc<dyn KlineStore>,
        budget: Arc<RateBudget>,
        config: PoolConfig,
    ) -> Self {
        Self {
            provider,
            store,
            budget,
            config,
        }
    }

    /// 종목 목록 전체를 처리.
    ///
    /// 모든 worker가 끝나면 반환합니다. 호출자는 `outcome_tx`와
    /// `sink_tx`의 원본을 이 함수에 넘기고 자신은 수신만 해야
    /// 채널 close가 올바르게 전파됩니다.
    pub async fn run(
        &self,
        tickers: Vec<String>,
        target_start: NaiveDate,
        target_end: NaiveDate,
        checked_today: BTreeSet<String>,
        outcome_tx: mpsc::Sender<SeriesOutcome>,
        sink_tx: mpsc::Sender<WriteTask>,
    ) {
        let queue = Arc::new(Mutex::new(VecDeque::from(tickers)));
        let checked_today = Arc::new(checked_today);
        let stop = Arc::new(AtomicBool::new(false));
        let workers = self.config.workers.max(1);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = WorkerContext {
                worker_id,
                provider: self.provider.clone(),
                store: self.store.clone(),
                budget: self.budget.clone(),
                threshold: self.config.threshold,
                queue: queue.clone(),
                checked_today: checked_today.clone(),
                stop: stop.clone(),
                target_start,
                target_end,
                outcome_tx: outcome_tx.clone(),
                sink_tx: sink_tx.clone(),
            };
            handles.push(tokio::spawn(worker_loop(ctx)));
        }

        // run()이 받은 원본 sender는 여기서 drop 되어야
        // worker 종료 시 채널이 닫힌다
        drop(outcome_tx);
        drop(sink_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task 비정상 종료");
            }
        }

        if stop.load(Ordering::Relaxed) {
            info!("예산 소진으로 pool 조기 종료");
        }
    }
}

struct WorkerContext {
    worker_id: usize,
    provider: Arc<dyn KlineProvider>,
    store: Arc<dyn KlineStore>,
    budget: Arc<RateBudget>,
    threshold: u32,
    queue: Arc<Mutex<VecDeque<String>>>,
    checked_today: Arc<BTreeSet<String>>,
    stop: Arc<AtomicBool>,
    target_start: NaiveDate,
    target_end: NaiveDate,
    outcome_tx: mpsc::Sender<SeriesOutcome>,
    sink_tx: mpsc::Sender<WriteTask>,
}

async fn worker_loop(ctx: WorkerContext) {
    loop {
        let ticker = { ctx.queue.lock().await.pop_front() };
        let Some(ticker) = ticker else {
            break;
        };

        // None이면 sink에 제출된 것이고, 결과는 sink가 보고한다
        if let Some(outcome) = process_one(&ctx, &ticker).await {
            if ctx.outcome_tx.send(outcome).await.is_err() {
                // orchestrator가 사라졌으면 더 진행할 이유가 없다
                warn!(worker = ctx.worker_id, "outcome 채널 닫힘, worker 종료");
                break;
            }
        }
    }
    debug!(worker = ctx.worker_id, "worker 종료");
}

/// 종목 하나 처리.
///
/// sink에 제출한 경우 `None`을 반환하며, 최종 결과(`Written` 또는
/// `WriteFailed`)는 append를 마친 sink가 보고합니다.
async fn process_one(ctx: &WorkerContext, ticker: &str) -> Option<SeriesOutcome> {
    if ctx.stop.load(Ordering::Relaxed) {
        return Some(SeriesOutcome::Stopped {
            ticker: ticker.to_string(),
        });
    }

    let action = match resolve_action(
        ctx.store.as_ref(),
        ticker,
        ctx.target_start,
        ctx.target_end,
        &ctx.checked_today,
    )
    .await
    {
        Ok(action) => action,
        Err(e) => {
            return Some(SeriesOutcome::Failed {
                ticker: ticker.to_string(),
                error: e.to_string(),
            })
        }
    };

    let (kind, start, end) = match action {
        SyncAction::SkipCheckedToday => {
            return Some(SeriesOutcome::SkippedCheckedToday {
                ticker: ticker.to_string(),
            })
        }
        SyncAction::AlreadyCurrent => {
            return Some(SeriesOutcome::AlreadyCurrent {
                ticker: ticker.to_string(),
            })
        }
        SyncAction::FullFetch { start, end } => (FetchKind::Full, start, end),
        SyncAction::IncrementalFetch { start, end } => (FetchKind::Incremental, start, end),
    };

    // 원격 호출 직전 예산 확인. 소진 시 새 디스패치 전면 중단.
    if !ctx.budget.try_consume(ctx.threshold).await {
        ctx.stop.store(true, Ordering::Relaxed);
        return Some(SeriesOutcome::Stopped {
            ticker: ticker.to_string(),
        });
    }

    // 결과와 무관하게 호출 1건으로 계산
    ctx.budget.record(1).await;

    match ctx.provider.fetch_klines(ticker, start, end).await {
        Ok(klines) if klines.is_empty() => Some(SeriesOutcome::NoNewData {
            ticker: ticker.to_string(),
            kind,
        }),
        Ok(klines) => {
            let task = WriteTask {
                ticker: ticker.to_string(),
                kind,
                klines,
            };
            match ctx.sink_tx.send(task).await {
                // 저장 결과는 sink가 Written/WriteFailed로 직접 보고
                Ok(()) => None,
                Err(_) => Some(SeriesOutcome::WriteFailed {
                    ticker: ticker.to_string(),
                    error: "write queue closed".to_string(),
                }),
            }
        }
        Err(e) => Some(SeriesOutcome::Failed {
            ticker: ticker.to_string(),
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::WriteSink;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ksync_data::{DataError, Kline5m};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn kline(ticker: &str) -> Kline5m {
        Kline5m {
            ticker: ticker.to_string(),
            ts: Utc.with_ymd_and_hms(2024, 1, 10, 1, 35, 0).unwrap(),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10.5),
            volume: dec!(1000),
            amount: dec!(10500),
        }
    }

    /// 종목별 응답이 고정된 테스트 provider. fetch 호출 수를 셉니다.
    struct MockProvider {
        /// ticker -> 반환할 봉 수 (None이면 fetch 실패)
        responses: HashMap<String, Option<usize>>,
        fetch_calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(entries: &[(&str, Option<usize>)]) -> Self {
            Self {
                responses: entries
                    .iter()
                    .map(|(t, n)| (t.to_string(), *n))
                    .collect(),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KlineProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn connect(&self) -> std::result::Result<(), DataError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn fetch_klines(
            &self,
            ticker: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> std::result::Result<Vec<Kline5m>, DataError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(ticker) {
                Some(Some(n)) => Ok((0..*n).map(|_| kline(ticker)).collect()),
                Some(None) => Err(DataError::Gateway {
                    code: "1".to_string(),
                    message: "boom".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }

        async fn list_tickers(
            &self,
            _as_of: NaiveDate,
        ) -> std::result::Result<Vec<String>, DataError> {
            Ok(self.responses.keys().cloned().collect())
        }
    }

    /// watermark와 append 기록을 가진 테스트 저장소.
    struct MockStore {
        watermarks: StdMutex<HashMap<String, NaiveDate>>,
        appended: StdMutex<Vec<(String, usize)>>,
    }

    impl MockStore {
        fn empty() -> Self {
            Self {
                watermarks: StdMutex::new(HashMap::new()),
                appended: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KlineStore for MockStore {
        async fn last_date(
            &self,
            ticker: &str,
        ) -> std::result::Result<Option<NaiveDate>, DataError> {
            Ok(self.watermarks.lock().unwrap().get(ticker).copied())
        }

        async fn append(
            &self,
            ticker: &str,
            klines: &[Kline5m],
        ) -> std::result::Result<usize, DataError> {
            self.appended
                .lock()
                .unwrap()
                .push((ticker.to_string(), klines.len()));
            Ok(klines.len())
        }

        async fn known_tickers(&self) -> std::result::Result<Vec<String>, DataError> {
            Ok(Vec::new())
        }
    }

    /// pool 실행 후 outcome을 전부 수집하는 헬퍼.
    async fn run_pool(
        provider: Arc<MockProvider>,
        store: Arc<MockStore>,
        budget: Arc<RateBudget>,
        threshold: u32,
        tickers: Vec<String>,
    ) -> Vec<SeriesOutcome> {
        let pool = SyncWorkerPool::new(
            provider,
            store.clone(),
            budget,
            PoolConfig {
                workers: 1,
                threshold,
            },
        );

        let (outcome_tx, mut outcome_rx) = mpsc::channel(64);
        let sink = WriteSink::spawn(store, outcome_tx.clone());
        let sink_tx = sink.sender();

        let run = pool.run(
            tickers,
            d("2024-01-01"),
            d("2024-01-10"),
            BTreeSet::new(),
            outcome_tx,
            sink_tx,
        );

        let collect = async {
            let mut outcomes = Vec::new();
            while let Some(o) = outcome_rx.recv().await {
                outcomes.push(o);
            }
            outcomes
        };

        let ((), outcomes) = tokio::join!(
            async {
                run.await;
                sink.close().await;
            },
            collect
        );
        outcomes
    }

    #[tokio::test]
    async fn test_budget_threshold_one_stops_remainder() {
        let provider = Arc::new(MockProvider::new(&[
            ("sh.600000", Some(10)),
            ("sz.000001", Some(10)),
            ("sz.300750", Some(10)),
        ]));
        let store = Arc::new(MockStore::empty());
        let budget = Arc::new(RateBudget::new(100_000));

        let outcomes = run_pool(
            provider.clone(),
            store.clone(),
            budget,
            1,
            vec![
                "sh.600000".to_string(),
                "sz.000001".to_string(),
                "sz.300750".to_string(),
            ],
        )
        .await;

        let written = outcomes
            .iter()
            .filter(|o| matches!(o, SeriesOutcome::Written { .. }))
            .count();
        let stopped = outcomes
            .iter()
            .filter(|o| matches!(o, SeriesOutcome::Stopped { .. }))
            .count();

        assert_eq!(written, 1);
        assert_eq!(stopped, 2);
        // threshold를 넘는 fetch는 발생하지 않는다
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_fetch_reports_no_new_data_without_write() {
        let provider = Arc::new(MockProvider::new(&[("sh.600000", Some(0))]));
        let store = Arc::new(MockStore::empty());
        let budget = Arc::new(RateBudget::new(100_000));

        let outcomes = run_pool(
            provider,
            store.clone(),
            budget,
            1000,
            vec!["sh.600000".to_string()],
        )
        .await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0],
            SeriesOutcome::NoNewData {
                kind: FetchKind::Full,
                ..
            }
        ));
        assert!(store.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let provider = Arc::new(MockProvider::new(&[
            ("sh.600000", Some(5)),
            ("sz.000001", None), // fetch 실패
        ]));
        let store = Arc::new(MockStore::empty());
        let budget = Arc::new(RateBudget::new(100_000));

        let outcomes = run_pool(
            provider,
            store.clone(),
            budget.clone(),
            1000,
            vec!["sh.600000".to_string(), "sz.000001".to_string()],
        )
        .await;

        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, SeriesOutcome::Failed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].ticker(), "sz.000001");

        // 실패한 호출도 예산에는 포함
        assert_eq!(budget.snapshot().await.calls_used, 2);
    }

    #[tokio::test]
    async fn test_current_series_issue_zero_fetch_calls() {
        let provider = Arc::new(MockProvider::new(&[("sh.600000", Some(5))]));
        let store = Arc::new(MockStore::empty());
        store
            .watermarks
            .lock()
            .unwrap()
            .insert("sh.600000".to_string(), d("2024-01-10"));
        let budget = Arc::new(RateBudget::new(100_000));

        let outcomes = run_pool(
            provider.clone(),
            store,
            budget,
            1000,
            vec!["sh.600000".to_string()],
        )
        .await;

        assert!(matches!(outcomes[0], SeriesOutcome::AlreadyCurrent { .. }));
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 0);
    }
}
