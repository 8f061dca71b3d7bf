//! Table layout and key typing for the relational backends.

use bucketproxy::{ConfigError, KeyKind, KeyRef, ProxyError, ProxyResult};
use sqlx::PgPool;
use std::sync::Arc;

use crate::sql::Queries;

/// Where bucket state lives: table, primary-key column, state column, and an optional
/// expires-at column (epoch milliseconds, `BIGINT`) used by time-to-live expiration.
///
/// Names are validated as plain SQL identifiers (optionally schema-qualified for the table)
/// and interpolated unquoted, so they follow PostgreSQL's case folding.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableSettings {
    table: String,
    id_column: String,
    state_column: String,
    #[cfg_attr(feature = "serde", serde(default))]
    expires_at_column: Option<String>,
}

impl Default for TableSettings {
    /// Table `bucket` with columns `id` and `state`, no expiry column.
    fn default() -> Self {
        Self {
            table: "bucket".to_string(),
            id_column: "id".to_string(),
            state_column: "state".to_string(),
            expires_at_column: None,
        }
    }
}

impl TableSettings {
    pub fn custom(
        table: impl Into<String>,
        id_column: impl Into<String>,
        state_column: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let settings = Self {
            table: table.into(),
            id_column: id_column.into(),
            state_column: state_column.into(),
            expires_at_column: None,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Track expiry in `column`. Required for [`bucketproxy::ExpirationPolicy::FixedTimeToLive`].
    pub fn with_expires_at_column(mut self, column: impl Into<String>) -> Result<Self, ConfigError> {
        let column = column.into();
        check_identifier(&column)?;
        self.expires_at_column = Some(column);
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn state_column(&self) -> &str {
        &self.state_column
    }

    pub fn expires_at_column(&self) -> Option<&str> {
        self.expires_at_column.as_deref()
    }

    /// Re-check every name; settings built through serde skip the constructor checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut parts = self.table.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => check_identifier(name)?,
            (Some(schema), Some(name), None) => {
                check_identifier(schema)?;
                check_identifier(name)?;
            }
            _ => return Err(ConfigError::InvalidIdentifier(self.table.clone())),
        }
        check_identifier(&self.id_column)?;
        check_identifier(&self.state_column)?;
        if let Some(column) = &self.expires_at_column {
            check_identifier(column)?;
        }
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

/// SQL type of the primary-key column; decides which [`KeyRef`] kinds are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimaryKeyType {
    /// `BIGINT`, for integer keys.
    #[default]
    BigInt,
    /// `VARCHAR`/`TEXT`, for string keys.
    Varchar,
    /// `BYTEA`, for raw byte keys.
    Bytea,
}

impl PrimaryKeyType {
    pub fn key_kind(&self) -> KeyKind {
        match self {
            PrimaryKeyType::BigInt => KeyKind::Integer,
            PrimaryKeyType::Varchar => KeyKind::Text,
            PrimaryKeyType::Bytea => KeyKind::Bytes,
        }
    }

    fn column_type(&self) -> &'static str {
        match self {
            PrimaryKeyType::BigInt => "BIGINT",
            PrimaryKeyType::Varchar => "VARCHAR",
            PrimaryKeyType::Bytea => "BYTEA",
        }
    }
}

/// Connection pool, table layout, and key typing shared by both relational backends.
#[derive(Debug, Clone)]
pub struct SqlProxyConfiguration {
    pool: PgPool,
    table: TableSettings,
    key_type: PrimaryKeyType,
    queries: Arc<Queries>,
}

impl SqlProxyConfiguration {
    pub fn builder() -> SqlProxyConfigurationBuilder {
        SqlProxyConfigurationBuilder::default()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table_settings(&self) -> &TableSettings {
        &self.table
    }

    pub fn primary_key_type(&self) -> PrimaryKeyType {
        self.key_type
    }

    pub(crate) fn queries(&self) -> &Queries {
        &self.queries
    }

    /// Reject keys whose kind does not match the primary-key column before touching the store.
    pub fn check_key(&self, key: KeyRef<'_>) -> ProxyResult<()> {
        let expected = self.key_type.key_kind();
        if key.kind() == expected {
            Ok(())
        } else {
            Err(ProxyError::InvalidKey(format!(
                "table {} has a {:?} primary key, got {} key {}",
                self.table.table,
                self.key_type,
                key.kind(),
                key
            )))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlProxyConfigurationBuilder {
    table: TableSettings,
    key_type: PrimaryKeyType,
}

impl SqlProxyConfigurationBuilder {
    pub fn with_table_settings(mut self, table: TableSettings) -> Self {
        self.table = table;
        self
    }

    pub fn with_primary_key_type(mut self, key_type: PrimaryKeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn build(self, pool: PgPool) -> Result<SqlProxyConfiguration, ConfigError> {
        self.table.validate()?;
        let queries = Arc::new(Queries::new(&self.table));
        Ok(SqlProxyConfiguration { pool, table: self.table, key_type: self.key_type, queries })
    }
}

/// DDL for a table matching `settings`. The state column is nullable so row-lock placeholders
/// can exist before the first write.
pub fn create_table_sql(settings: &TableSettings, key_type: PrimaryKeyType) -> String {
    let expires = settings
        .expires_at_column()
        .map(|column| format!(", {} BIGINT", column))
        .unwrap_or_default();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({} {} PRIMARY KEY, {} BYTEA{})",
        settings.table(),
        settings.id_column(),
        key_type.column_type(),
        settings.state_column(),
        expires
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_layout() {
        let settings = TableSettings::default();
        assert_eq!(settings.table(), "bucket");
        assert_eq!(settings.id_column(), "id");
        assert_eq!(settings.state_column(), "state");
        assert_eq!(settings.expires_at_column(), None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn custom_names_are_validated() {
        assert!(TableSettings::custom("buckets_String_key", "id", "state").is_ok());
        assert!(TableSettings::custom("rl.buckets", "id", "state").is_ok());
        for bad in ["", "1table", "bucket; DROP TABLE x", "a.b.c", "sp ace", "quo\"te"] {
            assert!(
                matches!(
                    TableSettings::custom(bad, "id", "state"),
                    Err(ConfigError::InvalidIdentifier(_))
                ),
                "{:?} accepted",
                bad
            );
        }
        assert!(TableSettings::default().with_expires_at_column("expires-at").is_err());
    }

    #[test]
    fn ddl_follows_settings() {
        let settings = TableSettings::custom("buckets_string_key", "id", "state")
            .unwrap()
            .with_expires_at_column("expires_at")
            .unwrap();
        assert_eq!(
            create_table_sql(&settings, PrimaryKeyType::Varchar),
            "CREATE TABLE IF NOT EXISTS buckets_string_key \
             (id VARCHAR PRIMARY KEY, state BYTEA, expires_at BIGINT)"
        );
        assert_eq!(
            create_table_sql(&TableSettings::default(), PrimaryKeyType::BigInt),
            "CREATE TABLE IF NOT EXISTS bucket (id BIGINT PRIMARY KEY, state BYTEA)"
        );
    }

    #[test]
    fn key_kinds_follow_primary_key_type() {
        assert_eq!(PrimaryKeyType::BigInt.key_kind(), KeyKind::Integer);
        assert_eq!(PrimaryKeyType::Varchar.key_kind(), KeyKind::Text);
        assert_eq!(PrimaryKeyType::Bytea.key_kind(), KeyKind::Bytes);
    }
}
