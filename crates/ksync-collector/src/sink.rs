//! 단일 writer 쓰기 큐.
//!
//! 저장소는 동시 writer에 안전하지 않으므로, 여러 worker가 동시에
//! fetch 하더라도 append는 이 sink의 소비자 task 하나가 FIFO로
//! 직렬화해서 수행합니다.
//!
//! 종료 프로토콜은 sentinel 값 없이 채널 close로 표현합니다:
//! 모든 sender가 drop 되면 소비자는 남은 큐를 비운 뒤 끝납니다.
//! `close()`는 drain이 끝날 때까지 기다립니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use ksync_data::{Kline5m, KlineStore};

use crate::pool::{FetchKind, SeriesOutcome};

/// 쓰기 큐 깊이. 실제로는 pass 크기가 상한입니다.
const QUEUE_CAPACITY: usize = 1024;

/// worker → sink로 전달되는 쓰기 작업. 정확히 한 번 소비됩니다.
#[derive(Debug)]
pub struct WriteTask {
    pub ticker: String,
    pub kind: FetchKind,
    pub klines: Vec<Kline5m>,
}

/// 단일 writer 쓰기 sink.
///
/// `spawn`으로 소비자 task를 시작하고, worker들은 `sender()`의
/// clone으로 작업을 제출합니다. 쓰기 결과(성공/실패)는 outcome
/// 채널을 통해 orchestrator로 직접 보고됩니다.
pub struct WriteSink {
    tx: mpsc::Sender<WriteTask>,
    handle: JoinHandle<()>,
}

impl WriteSink {
    /// 소비자 task를 시작하고 sink를 반환.
    pub fn spawn(
        store: Arc<dyn KlineStore>,
        outcome_tx: mpsc::Sender<SeriesOutcome>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(consume(rx, store, outcome_tx));
        Self { tx, handle }
    }

    /// 작업 제출용 sender. 큐가 가득 찼을 때만 대기합니다.
    pub fn sender(&self) -> mpsc::Sender<WriteTask> {
        self.tx.clone()
    }

    /// 큐를 비우고 소비자 task를 종료.
    ///
    /// 호출 전에 worker 측 sender clone이 모두 drop 되어 있어야
    /// 합니다. 큐에 남은 작업은 버려지지 않습니다.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!(error = %e, "쓰기 소비자 task 종료 실패");
        }
    }
}

/// 소비자 루프: 큐가 닫히고 비워질 때까지 순서대로 append.
async fn consume(
    mut rx: mpsc::Receiver<WriteTask>,
    store: Arc<dyn KlineStore>,
    outcome_tx: mpsc::Sender<SeriesOutcome>,
) {
    while let Some(task) = rx.recv().await {
        let outcome = match store.append(&task.ticker, &task.klines).await {
            Ok(rows) => {
                debug!(ticker = %task.ticker, rows, "append 완료");
                SeriesOutcome::Written {
                    ticker: task.ticker,
                    kind: task.kind,
                    rows,
                }
            }
            // 개별 작업 실패는 격리: sink는 계속 소비한다
            Err(e) => {
                error!(ticker = %task.ticker, error = %e, "append 실패");
                SeriesOutcome::WriteFailed {
                    ticker: task.ticker,
                    error: e.to_string(),
                }
            }
        };

        if outcome_tx.send(outcome).await.is_err() {
            warn!("outcome 채널이 닫힘, 남은 쓰기 결과는 보고되지 않음");
        }
    }
}
