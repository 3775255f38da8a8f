//! HTTP implementation of the fetch client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use ledgerd_protocol::{parse_root_config_data, RootConfigData};

use crate::{AccountStatus, AccountStatusFetcher, FetchError};

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Base URL of the fetch API, e.g. `http://accounts-fetch:8080`.
    pub base_url: String,
    pub timeout: Duration,
    /// How long a fetched answer may be served from the cache.
    pub cache_ttl: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl FetcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(10),
            max_attempts: 4,
            backoff_base: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
enum Cached {
    Status(AccountStatus),
    Config(Option<RootConfigData>),
}

#[derive(PartialEq, Eq, Hash)]
enum CacheKey {
    Status(i64, i64),
    Config(i64),
}

pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    cache: DashMap<CacheKey, (Instant, Cached)>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;
        Ok(Self { client, config, cache: DashMap::new() })
    }

    fn cache_get(&self, key: &CacheKey) -> Option<Cached> {
        let entry = self.cache.get(key)?;
        let (stored_at, value) = entry.value();
        if stored_at.elapsed() <= self.config.cache_ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    fn cache_put(&self, key: CacheKey, value: Cached) {
        self.cache.insert(key, (Instant::now(), value));
    }

    /// GETs `url`, retrying transport failures and 5xx answers with
    /// exponential backoff. `Ok(None)` is a definite 404.
    async fn get_with_retries(&self, url: &str) -> Result<Option<reqwest::Response>, FetchError> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let delay = self.config.backoff_base * 2u32.saturating_pow(attempt - 2);
                tokio::time::sleep(delay).await;
            }
            match self.client.get(url).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None);
                }
                Ok(response) if response.status().is_success() => {
                    return Ok(Some(response));
                }
                Ok(response) => {
                    last_error = format!("unexpected status {}", response.status());
                    if response.status().is_client_error() {
                        // 4xx other than 404 will not get better on retry.
                        return Err(FetchError::Malformed(last_error));
                    }
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
            debug!(url, attempt, error = %last_error, "fetch attempt failed");
        }
        warn!(url, error = %last_error, "fetch retry budget exhausted");
        Err(FetchError::Unavailable(last_error))
    }
}

#[async_trait]
impl AccountStatusFetcher for HttpFetcher {
    async fn account_status(
        &self,
        debtor_id: i64,
        creditor_id: i64,
    ) -> Result<AccountStatus, FetchError> {
        let key = CacheKey::Status(debtor_id, creditor_id);
        if let Some(Cached::Status(status)) = self.cache_get(&key) {
            return Ok(status);
        }

        let url = format!(
            "{}/accounts/{}/{}/reachable",
            self.config.base_url, debtor_id, creditor_id
        );
        let status = match self.get_with_retries(&url).await? {
            None => AccountStatus::Nonexistent,
            Some(response) => {
                let body: StatusResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;
                AccountStatus::parse(&body.status)
                    .ok_or_else(|| FetchError::Malformed(format!("unknown status {:?}", body.status)))?
            }
        };
        self.cache_put(key, Cached::Status(status));
        Ok(status)
    }

    async fn root_config(&self, debtor_id: i64) -> Result<Option<RootConfigData>, FetchError> {
        let key = CacheKey::Config(debtor_id);
        if let Some(Cached::Config(config)) = self.cache_get(&key) {
            return Ok(config);
        }

        let url = format!("{}/debtors/{}/config", self.config.base_url, debtor_id);
        let config = match self.get_with_retries(&url).await? {
            None => None,
            Some(response) => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;
                Some(
                    parse_root_config_data(&body)
                        .map_err(|e| FetchError::Malformed(e.to_string()))?,
                )
            }
        };
        self.cache_put(key, Cached::Config(config.clone()));
        Ok(config)
    }
}
