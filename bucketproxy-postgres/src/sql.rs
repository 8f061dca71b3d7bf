//! SQL text, parameter binding, and driver-error classification.

use crate::settings::{SqlProxyConfiguration, TableSettings};
use bucketproxy::{
    ConfigError, CycleContext, ExpirationPolicy, KeyRef, ProxyError, ProxyResult, TimeoutGuard,
};
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

pub(crate) const BACKEND: &str = "postgres";

/// Server time in epoch milliseconds. `clock_timestamp()` keeps advancing inside a
/// transaction, unlike `now()`.
const NOW_MS: &str = "(EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT";

/// Statements for one table layout, rendered once per configuration.
#[derive(Debug, Clone)]
pub(crate) struct Queries {
    pub select: String,
    pub select_for_update: String,
    pub upsert: String,
    pub insert_placeholder: String,
    pub delete: String,
    pub remove_expired: Option<String>,
    tracks_expiry: bool,
}

impl Queries {
    pub fn new(t: &TableSettings) -> Self {
        let (table, id, state) = (t.table(), t.id_column(), t.state_column());
        // `live` is false for rows past their expiry; such rows read as absent.
        let live = match t.expires_at_column() {
            Some(exp) => format!("({exp} IS NULL OR {exp} > {NOW_MS})"),
            None => "TRUE".to_string(),
        };
        let select = format!("SELECT {state}, {live} AS live FROM {table} WHERE {id} = $1");
        // One upsert covers absent, expired, placeholder, and concurrently deleted rows.
        let upsert = match t.expires_at_column() {
            // $3 is the TTL in milliseconds; NULL clears the expiry.
            Some(exp) => format!(
                "INSERT INTO {table} ({id}, {state}, {exp}) VALUES ($1, $2, {NOW_MS} + $3::BIGINT) \
                 ON CONFLICT ({id}) DO UPDATE SET {state} = EXCLUDED.{state}, {exp} = EXCLUDED.{exp}"
            ),
            None => format!(
                "INSERT INTO {table} ({id}, {state}) VALUES ($1, $2) \
                 ON CONFLICT ({id}) DO UPDATE SET {state} = EXCLUDED.{state}"
            ),
        };
        let remove_expired = t.expires_at_column().map(|exp| {
            format!(
                "DELETE FROM {table} WHERE {id} IN \
                 (SELECT {id} FROM {table} WHERE {exp} <= {NOW_MS} LIMIT $1 FOR UPDATE SKIP LOCKED)"
            )
        });
        Self {
            select_for_update: format!("{select} FOR UPDATE"),
            select,
            upsert,
            insert_placeholder: format!(
                "INSERT INTO {table} ({id}, {state}) VALUES ($1, NULL) ON CONFLICT ({id}) DO NOTHING"
            ),
            delete: format!(
                "DELETE FROM {table} WHERE {id} = $1 RETURNING ({state} IS NOT NULL AND {live}) AS live"
            ),
            remove_expired,
            tracks_expiry: t.expires_at_column().is_some(),
        }
    }

    /// Persist `state` under `key` whether or not a row is still there, refreshing the expiry
    /// when the table tracks one.
    pub fn write<'q>(
        &'q self,
        key: KeyRef<'q>,
        state: Vec<u8>,
        expiration: &ExpirationPolicy,
    ) -> Query<'q, Postgres, PgArguments> {
        let query = bind_key(sqlx::query(&self.upsert), key).bind(state);
        if self.tracks_expiry {
            let ttl = expiration.ttl_millis().map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));
            query.bind(ttl)
        } else {
            query
        }
    }
}

pub(crate) fn bind_key<'q>(
    query: Query<'q, Postgres, PgArguments>,
    key: KeyRef<'q>,
) -> Query<'q, Postgres, PgArguments> {
    match key {
        KeyRef::Integer(v) => query.bind(v),
        KeyRef::Text(s) => query.bind(s),
        KeyRef::Bytes(b) => query.bind(b),
    }
}

/// A stored row as seen by one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Stored {
    /// Whether any row exists, live or not.
    pub exists: bool,
    /// State visible to the transition: `None` for placeholders and expired rows.
    pub state: Option<Vec<u8>>,
}

impl Stored {
    pub fn from_row(row: Option<PgRow>) -> Result<Self, sqlx::Error> {
        let Some(row) = row else {
            return Ok(Self { exists: false, state: None });
        };
        let live: bool = row.try_get("live")?;
        let state: Option<Vec<u8>> = row.try_get(0)?;
        Ok(Self { exists: true, state: state.filter(|_| live) })
    }
}

pub(crate) fn validate_expiration(
    config: &SqlProxyConfiguration,
    expiration: &ExpirationPolicy,
) -> Result<(), ConfigError> {
    if expiration.is_none() || config.table_settings().expires_at_column().is_some() {
        return Ok(());
    }
    Err(ConfigError::Unsupported(format!(
        "time-to-live expiration needs an expires-at column on table {}",
        config.table_settings().table()
    )))
}

/// Lock-free read of the live state under `key`.
pub(crate) async fn read_state(
    config: &SqlProxyConfiguration,
    key: KeyRef<'_>,
    ctx: &CycleContext,
) -> ProxyResult<Option<Vec<u8>>> {
    config.check_key(key)?;
    let guard = ctx.guard();
    let row = bind_key(sqlx::query(&config.queries().select), key)
        .fetch_optional(config.pool())
        .await
        .map_err(|e| classify(e, guard))?;
    Ok(Stored::from_row(row).map_err(|e| classify(e, guard))?.state)
}

/// Delete the row under `key`; reports `true` only if it held live state.
pub(crate) async fn delete_state(
    config: &SqlProxyConfiguration,
    key: KeyRef<'_>,
    ctx: &CycleContext,
) -> ProxyResult<bool> {
    config.check_key(key)?;
    let guard = ctx.guard();
    let row = bind_key(sqlx::query(&config.queries().delete), key)
        .fetch_optional(config.pool())
        .await
        .map_err(|e| classify(e, guard))?;
    match row {
        Some(row) => row.try_get::<bool, _>("live").map_err(|e| classify(e, guard)),
        None => Ok(false),
    }
}

pub(crate) async fn remove_expired(
    config: &SqlProxyConfiguration,
    batch_size: i64,
) -> ProxyResult<u64> {
    let Some(statement) = config.queries().remove_expired.as_deref() else {
        return Ok(0);
    };
    let result = sqlx::query(statement)
        .bind(batch_size)
        .execute(config.pool())
        .await
        .map_err(|e| ProxyError::unavailable(BACKEND, e))?;
    let removed = result.rows_affected();
    tracing::debug!(target: "bucketproxy::postgres", removed, "expired rows removed");
    Ok(removed)
}

/// Limit how long lock waits inside the current transaction may block to what is left of the
/// guard's budget. Without a timeout the server's own setting applies.
pub(crate) async fn apply_lock_timeout(
    conn: &mut PgConnection,
    guard: &TimeoutGuard,
) -> ProxyResult<()> {
    let Some(remaining) = guard.remaining() else {
        return Ok(());
    };
    if remaining.is_zero() {
        return Err(guard.expired_error());
    }
    let millis = remaining.as_millis().max(1);
    sqlx::query("SELECT set_config('lock_timeout', $1, true)")
        .bind(format!("{}ms", millis))
        .execute(conn)
        .await
        .map_err(|e| classify(e, guard))?;
    Ok(())
}

/// SQLSTATEs reported when a lock wait or statement was cut short.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
/// SQLSTATEs for conflicts that a fresh attempt can resolve.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

pub(crate) fn classify(err: sqlx::Error, guard: &TimeoutGuard) -> ProxyError {
    let code = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    };
    match code.as_deref() {
        Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
            tracing::warn!(
                target: "bucketproxy::postgres",
                elapsed_ms = guard.elapsed().as_millis() as u64,
                error = %err,
                "lock wait abandoned"
            );
            guard.expired_error()
        }
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
            ProxyError::Conflict(err.to_string())
        }
        _ => ProxyError::unavailable(BACKEND, err),
    }
}
