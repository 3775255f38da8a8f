//! The engine façade: one serializable transaction per message, with
//! bounded-exponential-backoff retries on serialization conflicts.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ledgerd_fetch::AccountStatusFetcher;
use ledgerd_protocol::{ChoreMessage, InboundMessage};
use ledgerd_store::LedgerStore;

use crate::error::EngineError;
use crate::policy::Policy;
use crate::{balance, chores, configure, finalize, prepare};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn LedgerStore>,
    fetcher: Arc<dyn AccountStatusFetcher>,
    policy: Arc<Policy>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        fetcher: Arc<dyn AccountStatusFetcher>,
        policy: Arc<Policy>,
    ) -> Self {
        Self { store, fetcher, policy }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Handles one protocol message. Messages for accounts outside this
    /// node's shard are dropped with a warning (a topology misbinding,
    /// not a business error).
    pub async fn process_message(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (debtor_id, creditor_id) = message.shard_account();
        if !self.policy.realm.owns(debtor_id, creditor_id) {
            warn!(
                debtor_id,
                creditor_id,
                message_type = message.type_name(),
                "dropping a message for an account this shard does not own"
            );
            return Ok(());
        }
        self.with_retries(|| self.try_process_message(message, now)).await
    }

    /// Handles one chore message.
    pub async fn process_chore(
        &self,
        chore: &ChoreMessage,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (debtor_id, creditor_id) = chore.account();
        if !self.policy.realm.owns(debtor_id, creditor_id) {
            warn!(
                debtor_id,
                creditor_id,
                chore_type = chore.type_name(),
                "dropping a chore for an account this shard does not own"
            );
            return Ok(());
        }
        self.with_retries(|| self.try_process_chore(chore, now)).await
    }

    async fn with_retries<F, Fut>(&self, mut operation: F) -> Result<(), EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let retry = self.policy.retry;
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(err) if err.is_retriable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after a serialization conflict");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_process_message(
        &self,
        message: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut tx = self.store.begin().await?;
        let result = match message {
            InboundMessage::ConfigureAccount(m) => {
                configure::handle(tx.as_mut(), &self.policy, m, now).await
            }
            InboundMessage::PrepareTransfer(m) => {
                prepare::handle(tx.as_mut(), &self.policy, self.fetcher.as_ref(), m, now).await
            }
            InboundMessage::FinalizeTransfer(m) => {
                finalize::handle(tx.as_mut(), &self.policy, m, now).await
            }
            InboundMessage::PendingBalanceChange(m) => {
                balance::handle(tx.as_mut(), &self.policy, m, now).await
            }
        };
        match result {
            Ok(()) => Ok(tx.commit().await?),
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    async fn try_process_chore(
        &self,
        chore: &ChoreMessage,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut tx = self.store.begin().await?;
        let result = match chore {
            ChoreMessage::ChangeInterestRate { debtor_id, creditor_id, interest_rate, ts } => {
                chores::change_interest_rate(
                    tx.as_mut(),
                    &self.policy,
                    *debtor_id,
                    *creditor_id,
                    *interest_rate,
                    *ts,
                    now,
                )
                .await
            }
            ChoreMessage::UpdateDebtorInfo {
                debtor_id,
                creditor_id,
                debtor_info_iri,
                debtor_info_content_type,
                debtor_info_sha256,
                ts,
            } => {
                chores::update_debtor_info(
                    tx.as_mut(),
                    &self.policy,
                    *debtor_id,
                    *creditor_id,
                    debtor_info_iri,
                    debtor_info_content_type,
                    debtor_info_sha256.as_deref(),
                    *ts,
                    now,
                )
                .await
            }
            ChoreMessage::CapitalizeInterest { debtor_id, creditor_id } => {
                chores::capitalize_interest(tx.as_mut(), &self.policy, *debtor_id, *creditor_id, now)
                    .await
            }
            ChoreMessage::TryToDeleteAccount { debtor_id, creditor_id } => {
                chores::try_to_delete_account(
                    tx.as_mut(),
                    &self.policy,
                    *debtor_id,
                    *creditor_id,
                    now,
                )
                .await
            }
        };
        match result {
            Ok(()) => Ok(tx.commit().await?),
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    pub(crate) fn fetcher(&self) -> &dyn AccountStatusFetcher {
        self.fetcher.as_ref()
    }
}
