//! Full runs against a mock indicator API, a shell transform job, and a local store.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use datapipe_api_client::ApiClient;
use datapipe_core::{IndicatorSpec, RunStatus, StageKind};
use datapipe_runner::config::StorageBackend;
use datapipe_runner::{Config, Fetcher, Pipeline, Publisher, RetryPolicy, Transformer};
use datapipe_storage::LocalStore;
use datapipe_transform::JobExecutor;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const CONCAT_JOB: &str =
    "mkdir -p data_final && cat $(echo \"$DATAPIPE_INPUTS\" | tr ':' ' ') > data_final/world_data.csv";

async fn indicator(
    UrlPath(code): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let page = params.get("page").cloned().unwrap_or_else(|| "1".to_string());
    let value = if code == "SP.POP.TOTL" { 37_000_000.0 } else { 89.5 };
    Json(json!([
        {"page": page, "pages": "1", "per_page": "1000", "total": 2},
        [
            {
                "indicator": {"id": code, "value": "x"},
                "country": {"id": "AF", "value": "Afghanistan"},
                "countryiso3code": "AFG",
                "date": "2020",
                "value": value
            },
            {
                "indicator": {"id": code, "value": "x"},
                "country": {"id": "AF", "value": "Afghanistan"},
                "countryiso3code": "AFG",
                "date": "1990",
                "value": 1.0
            }
        ]
    ]))
}

async fn mock_api() -> String {
    let router = Router::new().route("/v2/indicators/:code", get(indicator));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/v2/indicators", addr)
}

fn indicators(dir: &Path) -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::new("SP.POP.TOTL", dir.join("data_source/api_population_data.csv")),
        IndicatorSpec::new("EG.ELC.ACCS.ZS", dir.join("data_source/api_electricity_access_data.csv")),
    ]
}

#[tokio::test]
async fn test_full_run_publishes_under_date_key() {
    let base_url = mock_api().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("remote"), "world-data"));

    let pipeline = Pipeline::new(
        Fetcher::new(ApiClient::new(&base_url), indicators(dir.path())),
        Transformer::new(
            JobExecutor::new("sh")
                .with_args(["-c", CONCAT_JOB])
                .with_working_dir(dir.path())
                .with_timeout(Duration::from_secs(10)),
        ),
        Publisher::new(store.clone()),
    )
    .with_retry_policy(RetryPolicy::new(1, Duration::ZERO));

    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let first = pipeline.run_on(date).await;
    assert_eq!(first.run.status, RunStatus::Succeeded);
    for kind in StageKind::ALL {
        assert_eq!(first.run.stage(kind).unwrap().attempts, 1);
    }
    let stored = first.into_result().unwrap();
    assert_eq!(stored.bucket, "world-data");
    assert_eq!(stored.key, "04-03-2024/world_data.csv");

    let published = std::fs::read_to_string(store.object_path(&stored.key)).unwrap();
    assert!(published.contains("Afghanistan,AFG,,,37000000,,,"));
    assert!(published.contains("Afghanistan,AFG,,,89.5,,,"));
    assert!(!published.contains("1990"));

    // Same day, same key, still one object.
    let second = pipeline.run_on(date).await.into_result().unwrap();
    assert_eq!(second.key, stored.key);
    let day_dir = dir.path().join("remote/world-data/04-03-2024");
    assert_eq!(std::fs::read_dir(day_dir).unwrap().count(), 1);
}

#[tokio::test]
async fn test_pipeline_from_config() {
    let base_url = mock_api().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.api.base_url = base_url;
    config.indicators = indicators(dir.path());
    config.transform.program = "sh".to_string();
    config.transform.args = vec!["-c".to_string(), CONCAT_JOB.to_string()];
    config.transform.working_dir = dir.path().to_path_buf();
    config.storage.backend = StorageBackend::Local;
    config.storage.bucket = Some("bucket".to_string());
    config.storage.root = dir.path().join("published");
    config.validate().unwrap();

    let date = NaiveDate::from_ymd_opt(2025, 1, 13).unwrap();
    let report = config.build_pipeline().unwrap().run_on(date).await;
    let stored = report.into_result().unwrap();

    let object = dir.path().join("published/bucket/13-01-2025/world_data.csv");
    assert_eq!(stored.key, "13-01-2025/world_data.csv");
    assert_eq!(std::fs::metadata(object).unwrap().len(), stored.size_bytes);
}

#[tokio::test]
async fn test_transform_failure_stops_before_publish() {
    let base_url = mock_api().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("remote"), "bucket"));

    let pipeline = Pipeline::new(
        Fetcher::new(ApiClient::new(&base_url), indicators(dir.path())),
        Transformer::new(
            JobExecutor::new("sh")
                .with_args(["-c", "echo 'notebook cell failed' >&2; exit 1"])
                .with_working_dir(dir.path()),
        ),
        Publisher::new(store),
    )
    .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));

    let report = pipeline
        .run_on(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap())
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    let failed = report.run.failed_stage().unwrap();
    assert_eq!(failed.stage, StageKind::Transform);
    assert_eq!(failed.attempts, 2);
    assert!(report.run.stage(StageKind::Publish).is_none());
    assert!(!dir.path().join("remote").exists());
}
