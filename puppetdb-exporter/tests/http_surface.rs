//! The scrape surface served to Prometheus, end to end over HTTP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use puppetdb_devkit::test_utils::wait_until;
use puppetdb_devkit::{report_metric, NodeFixture, TestHarness};
use puppetdb_exporter::exposition::{BuildInfo, CONTENT_TYPE};
use puppetdb_exporter::http::{build_router, AppState};
use puppetdb_exporter::{
    Aggregator, CategoryFilter, PuppetDbClient, PuppetDbOptions, Scheduler, ScrapeMode,
};
use serde_json::Value;
use tokio::net::TcpListener;

const HOURLY: ScrapeMode = ScrapeMode::Background(Duration::from_secs(3600));
const FAILED: &str = r#"status="failed""#;

struct Exporter {
    base_url: String,
    scheduler: Arc<Scheduler>,
}

async fn start_exporter(harness: &TestHarness, mode: ScrapeMode, keep_on_outage: bool) -> Exporter {
    let client = PuppetDbClient::new(PuppetDbOptions {
        url: harness.puppetdb.base_url().parse().unwrap(),
        cert_file: PathBuf::new(),
        key_file: PathBuf::new(),
        ca_file: PathBuf::new(),
        ssl_verify: false,
    })
    .unwrap();
    // Far enough in the past that nothing seeded below is stale.
    let aggregator = Aggregator::new(
        CategoryFilter::parse("resources,events"),
        Duration::from_secs(100 * 365 * 24 * 3600),
    );
    let scheduler = Arc::new(
        Scheduler::new(aggregator, Arc::new(client), mode).keep_snapshot_on_outage(keep_on_outage),
    );

    let app = build_router(AppState {
        scheduler: scheduler.clone(),
        build: BuildInfo::current(),
        telemetry_path: "/metrics".to_string(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Exporter {
        base_url: format!("http://{}", addr),
        scheduler,
    }
}

fn seed(harness: &TestHarness) {
    harness.puppetdb.set_nodes(vec![
        NodeFixture::active("web-01")
            .reported("2024-01-01T11:00:00Z", "failed", "h1")
            .build(),
        NodeFixture::active("web-02")
            .reported("2024-01-01T11:05:00Z", "failed", "h2")
            .build(),
    ]);
    harness.puppetdb.set_report_metrics(
        "h1",
        vec![
            report_metric("resources", "failed_to_restart", 1.0),
            report_metric("events", "failure", 3.0),
        ],
    );
    harness.puppetdb.set_report_metrics("h2", vec![]);
}

/// Value of the first sample whose line starts with `family` and
/// contains every label fragment.
fn sample(body: &str, family: &str, labels: &[&str]) -> Option<f64> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.starts_with(&format!("{family}{{")) || line.starts_with(&format!("{family} "))
        })
        .find(|line| labels.iter().all(|label| line.contains(label)))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

#[tokio::test]
async fn test_metrics_unavailable_before_first_snapshot() {
    let harness = TestHarness::start().await.unwrap();
    seed(&harness);
    let exporter = start_exporter(&harness, HOURLY, false).await;

    let response = reqwest::get(format!("{}/metrics", exporter.base_url)).await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(harness.puppetdb.count_requests("/v4/nodes"), 0);
}

#[tokio::test]
async fn test_background_snapshot_is_served() {
    let harness = TestHarness::start().await.unwrap();
    seed(&harness);
    let exporter = start_exporter(&harness, HOURLY, false).await;
    let _loop = exporter.scheduler.spawn().unwrap();

    let scheduler = exporter.scheduler.clone();
    assert!(wait_until(Duration::from_secs(5), || {
        let scheduler = scheduler.clone();
        async move { scheduler.store().current().is_some() }
    })
    .await);

    let response = reqwest::get(format!("{}/metrics", exporter.base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        CONTENT_TYPE
    );
    let body = response.text().await.unwrap();

    assert_eq!(sample(&body, "puppetdb_node_report_status_count", &[FAILED]), Some(2.0));
    assert_eq!(
        sample(
            &body,
            "puppet_report_resources",
            &[r#"name="Failed to restart""#, r#"host="web-01""#]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &body,
            "puppet_report_events",
            &[r#"name="Failure""#, r#"environment="production""#]
        ),
        Some(3.0)
    );
    assert_eq!(
        sample(&body, "puppet_report", &[r#"host="web-02""#, r#"deactivated="false""#]),
        Some(1_704_107_100.0)
    );
    assert_eq!(sample(&body, "puppetdb_exporter_build_info", &[]), Some(1.0));

    // Scrapes read the snapshot, they do not query PuppetDB.
    reqwest::get(format!("{}/metrics", exporter.base_url)).await.unwrap();
    assert_eq!(harness.puppetdb.count_requests("/v4/nodes"), 1);
}

#[tokio::test]
async fn test_on_scrape_mode_runs_a_cycle_per_request() {
    let harness = TestHarness::start().await.unwrap();
    seed(&harness);
    let exporter = start_exporter(&harness, ScrapeMode::OnScrape, false).await;
    assert!(exporter.scheduler.spawn().is_none());

    for expected in 1..=2 {
        let response = reqwest::get(format!("{}/metrics", exporter.base_url)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(harness.puppetdb.count_requests("/v4/nodes"), expected);
    }
}

#[tokio::test]
async fn test_outage_behaviour_and_health() {
    let harness = TestHarness::start().await.unwrap();
    seed(&harness);
    let exporter = start_exporter(&harness, ScrapeMode::OnScrape, true).await;

    let body = reqwest::get(format!("{}/metrics", exporter.base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(sample(&body, "puppetdb_node_report_status_count", &[FAILED]), Some(2.0));

    harness.puppetdb.fail_nodes(500);
    let body = reqwest::get(format!("{}/metrics", exporter.base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    // previous snapshot kept
    assert_eq!(sample(&body, "puppetdb_node_report_status_count", &[FAILED]), Some(2.0));

    let health: Value = reqwest::get(format!("{}/health", exporter.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["cycles_completed"], 2);
    assert_eq!(health["cycles_degraded"], 1);
    assert_eq!(health["snapshot_cycle"], 1);
    assert!(health["last_node_error"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn test_landing_page_links_metrics() {
    let harness = TestHarness::start().await.unwrap();
    let exporter = start_exporter(&harness, HOURLY, false).await;

    let response = reqwest::get(format!("{}/", exporter.base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Prometheus PuppetDB Exporter"));
    assert!(body.contains("href='/metrics'"));
}
