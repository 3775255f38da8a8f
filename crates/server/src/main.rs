use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use ledgerd_engine::{Engine, Policy};
use ledgerd_fetch::{AccountStatusFetcher, FetcherConfig, HttpFetcher, StubFetcher};
use ledgerd_server::consumer::{run_chores_consumer, run_protocol_consumer, ConsumerConfig, StdinSource};
use ledgerd_server::flusher::{run_flusher, FlusherConfig};
use ledgerd_server::routes::{build_router, ApiState};
use ledgerd_server::sink::StdoutSink;
use ledgerd_store::{LedgerStore, PgStore};

#[derive(Parser)]
#[command(name = "ledgerd", about = "Accounting authority node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume protocol messages (JSON lines on stdin).
    Consume,
    /// Consume chore messages (JSON lines on stdin).
    ConsumeChores,
    /// Flush the outbox queues to the broker sink (stdout).
    Flush,
    /// Sweep accounts: heartbeats, maintenance chores, purges.
    ScanAccounts,
    /// Sweep prepared transfers: finalization reminders.
    ScanPreparedTransfers,
    /// Garbage-collect the registered-balance-change archive.
    ScanBalanceChanges,
    /// Serve the fetch API over HTTP.
    ServeFetchApi {
        #[arg(long, env = "LEDGERD_FETCH_API_LISTEN", default_value = "0.0.0.0:8080")]
        listen: String,
    },
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| panic!("invalid value for {key}: {raw:?}")),
        Err(_) => default,
    }
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        handler_timeout: std::time::Duration::from_secs_f64(env_parsed(
            "LEDGERD_HANDLER_TIMEOUT_SECONDS",
            30.0,
        )),
    }
}

fn flusher_config() -> FlusherConfig {
    FlusherConfig {
        period: std::time::Duration::from_secs_f64(env_parsed(
            "LEDGERD_FLUSH_PERIOD_SECONDS",
            2.0,
        )),
        batch_size: env_parsed("LEDGERD_FLUSH_BATCH_SIZE", 10_000),
    }
}

/// Flips to `true` on ctrl-c / SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

fn build_fetcher() -> Arc<dyn AccountStatusFetcher> {
    let base_url = std::env::var("LEDGERD_FETCH_API_URL")
        .expect("LEDGERD_FETCH_API_URL must be set for this command");
    let mut config = FetcherConfig::new(base_url);
    config.timeout =
        std::time::Duration::from_secs_f64(env_parsed("LEDGERD_FETCH_TIMEOUT_SECONDS", 5.0));
    config.cache_ttl =
        std::time::Duration::from_secs_f64(env_parsed("LEDGERD_FETCH_CACHE_SECONDS", 10.0));
    let fetcher = HttpFetcher::new(config).expect("failed to build the fetch client");
    Arc::new(fetcher)
}

#[tokio::main]
async fn main() {
    ledgerd_observability::init();
    let cli = Cli::parse();

    let policy = Arc::new(Policy::from_env().expect("invalid configuration"));
    let database_url =
        std::env::var("LEDGERD_DATABASE_URL").expect("LEDGERD_DATABASE_URL must be set");
    let store: Arc<dyn LedgerStore> = Arc::new(
        PgStore::connect(&database_url, 10)
            .await
            .expect("failed to connect to the database"),
    );
    let shutdown = shutdown_channel();

    match cli.command {
        Command::Consume => {
            let engine = Engine::new(store, build_fetcher(), policy);
            run_protocol_consumer(engine, StdinSource::new(), consumer_config(), shutdown)
                .await;
        }
        Command::ConsumeChores => {
            let engine = Engine::new(store, build_fetcher(), policy);
            run_chores_consumer(engine, StdinSource::new(), consumer_config(), shutdown)
                .await;
        }
        Command::Flush => {
            run_flusher(store, Arc::new(StdoutSink), flusher_config(), shutdown).await;
        }
        Command::ScanAccounts => {
            let engine = Engine::new(store, build_fetcher(), policy);
            engine.run_account_scanner(shutdown).await;
        }
        Command::ScanPreparedTransfers => {
            // This sweep never talks to the fetch API.
            let engine = Engine::new(store, Arc::new(StubFetcher::new()), policy);
            engine.run_prepared_transfer_scanner(shutdown).await;
        }
        Command::ScanBalanceChanges => {
            let engine = Engine::new(store, Arc::new(StubFetcher::new()), policy);
            engine.run_balance_change_scanner(shutdown).await;
        }
        Command::ServeFetchApi { listen } => {
            let app = build_router(ApiState { store });
            let listener = tokio::net::TcpListener::bind(&listen)
                .await
                .unwrap_or_else(|err| panic!("failed to bind {listen}: {err}"));
            tracing::info!(listen = %listen, "fetch API listening");
            axum::serve(listener, app).await.expect("fetch API server failed");
        }
    }
}
