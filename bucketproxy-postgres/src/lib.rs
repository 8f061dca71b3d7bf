//! PostgreSQL backends for `bucketproxy` (companion crate).
//! Bring your own `sqlx::PgPool`; bucket state lives in one row per key.
//!
//! - [`AdvisoryLockBackend`] serializes cycles with `pg_advisory_xact_lock` and runs each
//!   transition exactly once.
//! - [`SelectForUpdateBackend`] locks the row itself and retries serialization failures.
//!
//! Both share a [`SqlProxyConfiguration`]:
//!
//! ```rust,no_run
//! use bucketproxy::{ClientSideConfig, ProxyManager};
//! use bucketproxy_postgres::{
//!     AdvisoryLockBackend, PrimaryKeyType, SqlProxyConfiguration, TableSettings,
//! };
//! use std::time::Duration;
//!
//! # async fn run(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SqlProxyConfiguration::builder()
//!     .with_table_settings(TableSettings::custom("buckets_string_key", "id", "state")?)
//!     .with_primary_key_type(PrimaryKeyType::Varchar)
//!     .build(pool)?;
//! let manager = ProxyManager::builder(AdvisoryLockBackend::new(config))
//!     .with_client_side_config(ClientSideConfig::new().with_request_timeout(Duration::from_secs(3))?)
//!     .build()?;
//! let state = manager.read("user:1").await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```
//!
//! Lock waits are bounded by setting `lock_timeout` for the cycle's transaction to what is left
//! of the request timeout. SQLSTATEs map onto [`bucketproxy::ProxyError`] as follows:
//! `55P03`/`57014` become `Timeout`, `40001`/`40P01` become `Conflict` (retried by the
//! select-for-update backend), everything else is `StoreUnavailable`.

mod advisory;
mod select_for_update;
mod settings;
mod sql;

pub use advisory::AdvisoryLockBackend;
pub use select_for_update::SelectForUpdateBackend;
pub use settings::{
    create_table_sql, PrimaryKeyType, SqlProxyConfiguration, SqlProxyConfigurationBuilder,
    TableSettings,
};
