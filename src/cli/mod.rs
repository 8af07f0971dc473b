//! CLI command implementations

use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::crawler::HttpFetcher;
use crate::engine::{Engine, PushError};
use crate::lock::{DistributedLock, LockError, MemoryLock, RedisLock};
use crate::pipeline::{
    BatchKind, DownloadRequest, Pipeline, PipelineError, RefreshRequest, StockListRequest,
};
use crate::sink::MemorySink;
use crate::telemetry::LogReporter;
use crate::trigger::{cron_enabled_from_env, CronTrigger};

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Pipeline error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] PushError),

    /// Lock backend error
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Trigger rejected the request
    #[error("trigger refused ({code}): {message}")]
    TriggerRefused { code: u16, message: String },
}

impl FromStr for BatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily-close" => Ok(BatchKind::DailyClose),
            "three-primary" => Ok(BatchKind::ThreePrimary),
            "concentration" => Ok(BatchKind::StakeConcentration),
            _ => Err(format!(
                "invalid kind: {s}. Valid options: daily-close, three-primary, concentration"
            )),
        }
    }
}

#[derive(Parser)]
#[command(name = "twstock-ingest")]
#[command(about = "Scrape Taiwan stock-exchange daily datasets", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Worker pool size
    #[arg(long, global = true, default_value_t = 5)]
    pub max_workers: usize,

    /// Job queue capacity
    #[arg(long, global = true, default_value_t = 256)]
    pub queue_capacity: usize,

    /// Scraping proxy prefix; target URLs are escaped and appended
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Redis connection URL for the cron lock
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Arm the cron schedule and serve until interrupted
    Serve {
        /// Cron expression (5 or 6 fields)
        #[arg(long, default_value = "30 17 * * 1-5")]
        schedule: String,
    },
    /// Run one batch download now
    Download {
        /// Days to rewind from today (0 = today only)
        #[arg(long, default_value_t = 0)]
        rewind: u32,
        /// Dataset kinds to download
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<BatchKind>,
    },
    /// Download the exchange stock lists
    Stocks,
    /// Recompute concentration percentages for scraped rows
    Refresh {
        /// Days to rewind from today (0 = today only)
        #[arg(long, default_value_t = 0)]
        rewind: u32,
    },
}

impl Cli {
    pub async fn execute(self, root_cancel: CancellationToken) -> Result<(), CliError> {
        let (queue, engine) = Engine::start(self.max_workers, self.queue_capacity);
        let pipeline = Arc::new(Pipeline::new(
            queue,
            Arc::new(HttpFetcher::new(self.proxy.clone())),
            Arc::new(MemorySink::new()),
            Arc::new(LogReporter),
        ));

        let result = match &self.command {
            Commands::Serve { schedule } => {
                self.serve(pipeline.clone(), schedule, root_cancel.clone())
                    .await
            }
            Commands::Download { rewind, kinds } => {
                let mut request = DownloadRequest {
                    rewind_limit: -i64::from(*rewind),
                    ..DownloadRequest::default()
                };
                if !kinds.is_empty() {
                    request.kinds = kinds.clone();
                }
                let summary = pipeline.batching_download(root_cancel.clone(), request).await?;
                info!(?summary, "download finished");
                Ok(())
            }
            Commands::Stocks => {
                let summary = pipeline
                    .stock_list_download(root_cancel.clone(), StockListRequest::default())
                    .await?;
                info!(?summary, "stock-list download finished");
                Ok(())
            }
            Commands::Refresh { rewind } => {
                let request = RefreshRequest {
                    rewind_limit: -i64::from(*rewind),
                    ..RefreshRequest::default()
                };
                let summary = pipeline
                    .refresh_concentration(root_cancel.clone(), request)
                    .await?;
                info!(?summary, "refresh finished");
                Ok(())
            }
        };

        engine.shutdown().await;
        result
    }

    async fn serve(
        &self,
        pipeline: Arc<Pipeline>,
        schedule: &str,
        root_cancel: CancellationToken,
    ) -> Result<(), CliError> {
        let lock: Arc<dyn DistributedLock> = match &self.redis_url {
            Some(url) => Arc::new(RedisLock::connect(url).await?),
            None => {
                warn!("no redis url configured, falling back to process-local lock");
                Arc::new(MemoryLock::new())
            }
        };

        let trigger = CronTrigger::new(pipeline, lock, cron_enabled_from_env());
        let response = trigger.start(schedule, DownloadRequest::default(), root_cancel.clone());
        if response.code != 200 {
            return Err(CliError::TriggerRefused {
                code: response.code,
                message: response.message,
            });
        }
        info!(message = %response.message, "serving");

        root_cancel.cancelled().await;
        Ok(())
    }
}
