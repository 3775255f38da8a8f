//! Transactional store façade over three logical tables (accounts,
//! prepared transfers, registered balance changes) and the per-type outbox
//! queues.
//!
//! Two implementations: `PgStore` (sqlx/Postgres, serializable
//! transactions) for production, `InMemoryStore` for tests. The engine only
//! ever talks to the `LedgerStore`/`LedgerTx` traits, so the protocol logic
//! can be exercised without a database.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use store::{LedgerStore, LedgerTx, StoreError, StoreResult};
pub use types::{
    AccountRow, OutboxRow, PreparedTransferRow, CONFIG_SCHEDULED_FOR_DELETION_FLAG,
    STATUS_OVERFLOWN_FLAG, STATUS_UNREACHABLE_FLAG,
};
