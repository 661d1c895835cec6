//! 5분봉 K-line 동기화 CLI.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ksync_collector::orchestrator::status_report;
use ksync_collector::{
    OrchestratorConfig, PassMode, ProgressStore, RateBudget, SyncConfig, SyncOrchestrator,
};
use ksync_data::{GatewayKlineProvider, PgKlineStore};

#[derive(Parser)]
#[command(name = "ksync-collector")]
#[command(about = "5분봉 K-line 증분 동기화", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 동기화 pass 1회 실행
    Sync {
        /// 목표 구간 시작일 (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// 목표 구간 종료일 (YYYY-MM-DD, 기본: 오늘)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// 이번 세션 API 호출 상한 (threshold 덮어쓰기)
        #[arg(long)]
        max_api_calls: Option<u32>,

        /// 세션당 최대 처리 종목 수
        #[arg(long)]
        max_tickers: Option<usize>,

        /// 완료 목록을 버리고 전 종목 재확인
        #[arg(long)]
        no_resume: bool,
    },

    /// 이전 pass에서 실패한 종목만 재시도
    RetryFailed,

    /// 목표 구간이 전부 커버될 때까지 pass 반복
    Converge {
        /// 진행 없을 때 대기 시간 (분)
        #[arg(long)]
        wait_minutes: Option<u64>,
    },

    /// 체크포인트 기반 진행 상태 출력
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ksync={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = SyncConfig::from_env()?;

    // status는 체크포인트 파일만 읽으므로 DB 연결 없이 처리
    if matches!(cli.command, Commands::Status) {
        let progress = ProgressStore::new(&config.progress_file);
        let report = status_report(&progress, config.start_date, config.end_date)?;
        report.print();
        return Ok(());
    }

    tracing::info!("5분봉 동기화 시작");

    let pool = sqlx::PgPool::connect(&config.database_url).await?;
    tracing::info!("데이터베이스 연결 성공");

    let mut max_tickers = None;
    let mode = match &cli.command {
        Commands::Sync {
            start_date,
            end_date,
            max_api_calls,
            max_tickers: max,
            no_resume,
        } => {
            if let Some(start) = start_date {
                config.start_date = *start;
            }
            if let Some(end) = end_date {
                config.end_date = *end;
            }
            if let Some(calls) = max_api_calls {
                config.safe_threshold = (*calls).min(config.daily_limit);
            }
            max_tickers = *max;
            if *no_resume {
                PassMode::Fresh
            } else {
                PassMode::Resume
            }
        }
        Commands::RetryFailed => PassMode::RetryFailed,
        Commands::Converge { wait_minutes } => {
            if let Some(minutes) = wait_minutes {
                config.converge.wait_minutes = *minutes;
            }
            PassMode::Resume
        }
        Commands::Status => unreachable!(),
    };

    let provider = Arc::new(GatewayKlineProvider::new(&config.gateway_url));
    let store = Arc::new(PgKlineStore::new(pool));
    let budget = Arc::new(RateBudget::new(config.daily_limit));
    let progress = ProgressStore::new(&config.progress_file);

    let orchestrator = SyncOrchestrator::new(
        provider,
        store,
        budget,
        progress,
        OrchestratorConfig {
            start_date: config.start_date,
            end_date: config.end_date,
            threshold: config.safe_threshold,
            batch_size: config.batch_size,
            workers: config.workers,
            max_tickers,
        },
    );

    let summary = match cli.command {
        Commands::Converge { .. } => {
            orchestrator
                .run_converge(config.converge.wait(), config.converge.max_iterations)
                .await?
        }
        _ => orchestrator.run_pass(mode).await?,
    };

    tracing::info!(
        completed = summary.total_completed,
        failed = summary.total_failed,
        remaining = summary.remaining,
        "동기화 종료"
    );

    Ok(())
}
