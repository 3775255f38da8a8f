//! Black-box tests for the fetch API: the real router on an ephemeral
//! port, backed by the in-memory store, queried both with a plain HTTP
//! client and with the production `HttpFetcher`.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use reqwest::StatusCode;

use ledgerd_engine::{Engine, Policy};
use ledgerd_fetch::{AccountStatus, AccountStatusFetcher, FetcherConfig, HttpFetcher, StubFetcher};
use ledgerd_protocol::{ConfigureAccount, InboundMessage};
use ledgerd_server::routes::{build_router, ApiState};
use ledgerd_store::InMemoryStore;

struct TestServer {
    base_url: String,
    store: Arc<InMemoryStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let app = build_router(ApiState { store: store.clone() });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, store, handle }
    }

    fn engine(&self) -> Engine {
        Engine::new(
            self.store.clone(),
            Arc::new(StubFetcher::new()),
            Arc::new(Policy::default()),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn configure_account(engine: &Engine, creditor_id: i64, config_flags: i32, config_data: &str) {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    engine
        .process_message(
            &InboundMessage::ConfigureAccount(ConfigureAccount {
                debtor_id: 1,
                creditor_id,
                ts,
                seqnum: 0,
                negligible_amount: 2.0,
                config_flags,
                config_data: config_data.to_string(),
            }),
            ts,
        )
        .await
        .expect("configure failed");
}

#[tokio::test]
async fn reachability_statuses() {
    let srv = TestServer::spawn().await;
    let engine = srv.engine();
    configure_account(&engine, 2, 0, "").await;
    configure_account(&engine, 3, 1, "").await;

    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/accounts/1/2/reachable", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "reachable");

    let res = client
        .get(format!("{}/accounts/1/3/reachable", srv.base_url))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "scheduled_for_deletion");

    let res = client
        .get(format!("{}/accounts/1/99/reachable", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_fetcher_round_trip() {
    let srv = TestServer::spawn().await;
    let engine = srv.engine();
    configure_account(&engine, 0, 0, r#"{"type": "RootConfigData", "rate": 3.5}"#).await;
    configure_account(&engine, 2, 0, "").await;

    let fetcher = HttpFetcher::new(FetcherConfig::new(srv.base_url.clone())).unwrap();

    assert_eq!(fetcher.account_status(1, 2).await.unwrap(), AccountStatus::Reachable);
    assert_eq!(fetcher.account_status(1, 42).await.unwrap(), AccountStatus::Nonexistent);

    let config = fetcher.root_config(1).await.unwrap().expect("known currency");
    assert_eq!(config.interest_rate_target, 3.5);
    assert_eq!(fetcher.root_config(5).await.unwrap(), None);
}

#[tokio::test]
async fn health_endpoint() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
