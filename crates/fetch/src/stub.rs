//! Programmable fetcher, used by tests and by process roles that never
//! actually fetch (the prepared-transfer and balance-change scanners).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use ledgerd_protocol::RootConfigData;

use crate::{AccountStatus, AccountStatusFetcher, FetchError};

/// Answers account-status and root-config queries from in-memory maps.
/// Unknown accounts are `Nonexistent`; unknown debtors have no config.
#[derive(Default)]
pub struct StubFetcher {
    statuses: Mutex<HashMap<(i64, i64), AccountStatus>>,
    configs: Mutex<HashMap<i64, RootConfigData>>,
    fail: Mutex<bool>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, debtor_id: i64, creditor_id: i64, status: AccountStatus) {
        self.statuses.lock().unwrap().insert((debtor_id, creditor_id), status);
    }

    pub fn set_root_config(&self, debtor_id: i64, config: RootConfigData) {
        self.configs.lock().unwrap().insert(debtor_id, config);
    }

    /// Makes every subsequent call fail with `FetchError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.fail.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<(), FetchError> {
        if *self.fail.lock().unwrap() {
            Err(FetchError::Unavailable("stub is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountStatusFetcher for StubFetcher {
    async fn account_status(
        &self,
        debtor_id: i64,
        creditor_id: i64,
    ) -> Result<AccountStatus, FetchError> {
        self.check_available()?;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&(debtor_id, creditor_id))
            .copied()
            .unwrap_or(AccountStatus::Nonexistent))
    }

    async fn root_config(&self, debtor_id: i64) -> Result<Option<RootConfigData>, FetchError> {
        self.check_available()?;
        Ok(self.configs.lock().unwrap().get(&debtor_id).cloned())
    }
}
