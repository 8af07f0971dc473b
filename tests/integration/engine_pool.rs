//! Integration tests for the job engine: pool concurrency, exactly-once
//! execution, rate limiting, acknowledged shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use twstock_ingest::engine::{DownloadJob, Engine, Job};
use twstock_ingest::source::Source;
use twstock_ingest::Record;

use crate::common::{concentration_page, stock_list_html, ScriptedFetcher};

fn stock_list_job(
    fetcher: Arc<ScriptedFetcher>,
    records_tx: mpsc::Sender<Vec<Record>>,
    rate_limit: Duration,
) -> Job {
    Job::Download(DownloadJob {
        cancel: CancellationToken::new(),
        source: Source::TwseStockList,
        date: None,
        stock_id: None,
        records_tx,
        rate_limit,
        fetcher,
        reporter: Arc::new(twstock_ingest::telemetry::LogReporter),
    })
}

#[tokio::test]
async fn test_pool_concurrency_never_exceeds_worker_count() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .route("C_public.jsp", stock_list_html("2330", "台積電"))
            .with_delay(Duration::from_millis(50)),
    );
    let (queue, engine) = Engine::start(2, 32);
    let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(16);
    let cancel = CancellationToken::new();

    for _ in 0..6 {
        queue
            .push(
                stock_list_job(fetcher.clone(), records_tx.clone(), Duration::ZERO),
                &cancel,
            )
            .await
            .unwrap();
    }
    drop(records_tx);

    // every job delivers exactly one batch
    let mut batches = 0;
    while records_rx.recv().await.is_some() {
        batches += 1;
    }
    assert_eq!(batches, 6);
    assert_eq!(fetcher.calls(), 6);
    assert!(
        fetcher.max_in_flight() <= 2,
        "in-flight fetches {} exceeded the pool size",
        fetcher.max_in_flight()
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_spaces_fetches() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().route("C_public.jsp", stock_list_html("2330", "台積電")),
    );
    let (queue, engine) = Engine::start(1, 16);
    let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(16);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        queue
            .push(
                stock_list_job(
                    fetcher.clone(),
                    records_tx.clone(),
                    Duration::from_millis(100),
                ),
                &cancel,
            )
            .await
            .unwrap();
    }
    drop(records_tx);
    while records_rx.recv().await.is_some() {}

    let gap = fetcher.min_gap().expect("at least two fetches");
    assert!(
        gap >= Duration::from_millis(95),
        "fetches only {gap:?} apart"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_pauses_after_result_delivery() {
    // one fragment matches all five ranking pages of a stock
    let fetcher = Arc::new(
        ScriptedFetcher::new().route("zco_2330_", concentration_page("2330", 100, 50)),
    );
    let (queue, engine) = Engine::start(1, 16);
    let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(16);
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        queue
            .push(
                Job::Download(DownloadJob {
                    cancel: cancel.clone(),
                    source: Source::StakeConcentration,
                    date: Some("2022-01-05".to_string()),
                    stock_id: Some("2330".to_string()),
                    records_tx: records_tx.clone(),
                    rate_limit: Duration::from_millis(300),
                    fetcher: fetcher.clone(),
                    reporter: Arc::new(twstock_ingest::telemetry::LogReporter),
                }),
                &cancel,
            )
            .await
            .unwrap();
    }
    drop(records_tx);

    let mut deliveries: Vec<Instant> = Vec::new();
    while records_rx.recv().await.is_some() {
        deliveries.push(Instant::now());
    }
    assert_eq!(deliveries.len(), 2);

    let fetches = fetcher.timestamps();
    assert_eq!(fetches.len(), 10);

    // a job's five pages run back to back, not one pause apart
    let span = fetches[4].duration_since(fetches[0]);
    assert!(span < Duration::from_millis(250), "pages paced individually: {span:?}");

    // the single pause sits between a job's result write and the worker's
    // next fetch
    let gap = fetches[5].duration_since(deliveries[0]);
    assert!(
        gap >= Duration::from_millis(250),
        "next job started only {gap:?} after the result write"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .route("C_public.jsp", stock_list_html("2330", "台積電"))
            .with_delay(Duration::from_millis(150)),
    );
    let (queue, engine) = Engine::start(1, 16);
    let (records_tx, _records_rx) = mpsc::channel::<Vec<Record>>(16);
    let cancel = CancellationToken::new();

    queue
        .push(
            stock_list_job(fetcher.clone(), records_tx, Duration::ZERO),
            &cancel,
        )
        .await
        .unwrap();
    // let the worker pick the job up
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), engine.shutdown())
        .await
        .expect("shutdown acknowledged");
    // the in-flight fetch ran to completion before shutdown resolved
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_queued_jobs_dropped_on_shutdown_close_result_channel() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .route("C_public.jsp", stock_list_html("2330", "台積電"))
            .with_delay(Duration::from_millis(100)),
    );
    let (queue, engine) = Engine::start(1, 32);
    let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(32);
    let cancel = CancellationToken::new();

    for _ in 0..8 {
        queue
            .push(
                stock_list_job(fetcher.clone(), records_tx.clone(), Duration::ZERO),
                &cancel,
            )
            .await
            .unwrap();
    }
    drop(records_tx);
    drop(queue);

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown().await;

    // dropped queued jobs released their result senders, so the drain
    // terminates instead of hanging
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        let mut count = 0;
        while records_rx.recv().await.is_some() {
            count += 1;
        }
        count
    })
    .await
    .expect("result channel closed");
    assert!(drained < 8, "expected some queued jobs to be dropped");
}
