//! PostgreSQL change source.
//!
//! Holds one client for the process lifetime and reconnects lazily when
//! the connection has dropped. Every table lives in the configured schema,
//! selected through `search_path` at connect time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use etl_types::{ChangedRow, JoinRow, PostgresSettings, RowCursor, Table};

use super::{ChangeSource, SourceError};

const FILM_ROWS_QUERY: &str = "
    SELECT
        fw.id,
        fw.title,
        fw.description,
        fw.rating::float8 AS rating,
        pfw.role,
        p.id AS person_id,
        p.full_name,
        g.name AS genre_name
    FROM film_work fw
    LEFT JOIN person_film_work pfw ON pfw.film_work_id = fw.id
    LEFT JOIN person p ON p.id = pfw.person_id
    LEFT JOIN genre_film_work gfw ON gfw.film_work_id = fw.id
    LEFT JOIN genre g ON g.id = gfw.genre_id
    WHERE fw.id = ANY($1)";

/// Connection settings for [`PostgresSource`].
#[derive(Debug, Clone)]
pub struct PostgresSourceConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: SecretString,
    /// Schema holding the watched tables
    pub schema: String,
    pub connect_timeout: Duration,
}

impl From<&PostgresSettings> for PostgresSourceConfig {
    fn from(settings: &PostgresSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            dbname: settings.dbname.clone(),
            user: settings.user.clone(),
            password: SecretString::from(settings.password.clone()),
            schema: settings.schema.clone(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PostgresSourceConfig {
    fn pg_config(&self) -> PgConfig {
        let mut pg = PgConfig::new();
        pg.host(&self.host);
        pg.port(self.port);
        pg.user(&self.user);
        let password = self.password.expose_secret();
        if !password.is_empty() {
            pg.password(password);
        }
        pg.dbname(&self.dbname);
        pg.options(&format!("-c search_path={}", self.schema));
        pg.connect_timeout(self.connect_timeout);
        pg.application_name("movies-etl");
        pg
    }
}

/// `ChangeSource` backed by tokio-postgres.
pub struct PostgresSource {
    config: PostgresSourceConfig,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresSource {
    /// Create the source. No connection is made until the first query.
    pub fn new(config: PostgresSourceConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    /// Current client, connecting if there is none or the old one closed.
    async fn client(&self) -> Result<Arc<Client>, SourceError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            warn!("PostgreSQL connection closed, reconnecting");
        }

        let (client, connection) = self
            .config
            .pg_config()
            .connect(NoTls)
            .await
            .map_err(classify)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection error");
            }
        });

        info!(
            host = %self.config.host,
            dbname = %self.config.dbname,
            schema = %self.config.schema,
            "Connected to PostgreSQL"
        );
        let client = Arc::new(client);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, SourceError> {
        let client = self.client().await?;
        client.query(sql, params).await.map_err(classify)
    }
}

/// Map a driver error onto the source taxonomy.
fn classify(e: tokio_postgres::Error) -> SourceError {
    let io_cause = std::error::Error::source(&e).is_some_and(|cause| cause.is::<std::io::Error>());
    let sqlstate = e.code().map(SqlState::code);
    if is_connection_failure(e.is_closed(), sqlstate, io_cause) {
        SourceError::Unavailable(e.to_string())
    } else {
        SourceError::Query(e.to_string())
    }
}

/// Whether a failure came from the connection rather than the statement.
///
/// Transient: a closed client, an I/O cause (refused, reset, timed out),
/// connection exceptions (SQLSTATE class 08), server shutdown (57P01-03)
/// and too many connections (53300). Parameter encoding, row decoding and
/// every other SQLSTATE are not.
fn is_connection_failure(closed: bool, sqlstate: Option<&str>, io_cause: bool) -> bool {
    if closed || io_cause {
        return true;
    }
    match sqlstate {
        Some(code) => {
            code.starts_with("08")
                || code == SqlState::ADMIN_SHUTDOWN.code()
                || code == SqlState::CRASH_SHUTDOWN.code()
                || code == SqlState::CANNOT_CONNECT_NOW.code()
                || code == SqlState::TOO_MANY_CONNECTIONS.code()
        }
        None => false,
    }
}

fn parse_ids(ids: &[String]) -> Result<Vec<Uuid>, SourceError> {
    ids.iter()
        .map(|id| Uuid::parse_str(id).map_err(|_| SourceError::InvalidId(id.clone())))
        .collect()
}

fn scan_query(table: Table, with_cursor: bool) -> String {
    let keyset = if with_cursor {
        "AND (t.modified, t.id) > ($2, $3)"
    } else {
        ""
    };
    let limit = if with_cursor { "$4" } else { "$2" };
    format!(
        "SELECT t.id, t.modified, to_jsonb(t) AS columns
         FROM {table} t
         WHERE t.modified > $1 {keyset}
         ORDER BY t.modified, t.id
         LIMIT {limit}",
        table = table.as_str(),
    )
}

fn resolve_query(table: Table, association: &str) -> String {
    format!(
        "SELECT DISTINCT fw.id, fw.modified
         FROM film_work fw
         JOIN {association} a ON a.film_work_id = fw.id
         WHERE a.{table}_id = ANY($1)
         ORDER BY fw.modified, fw.id",
        table = table.as_str(),
    )
}

fn changed_row(table: Table, row: &Row) -> Result<ChangedRow, SourceError> {
    let id: Uuid = row
        .try_get("id")
        .map_err(|e| SourceError::InvalidRow(e.to_string()))?;
    let modified: DateTime<Utc> = row
        .try_get("modified")
        .map_err(|e| SourceError::InvalidRow(e.to_string()))?;
    let columns: Value = row
        .try_get("columns")
        .map_err(|e| SourceError::InvalidRow(e.to_string()))?;

    let columns: Map<String, Value> = match columns {
        Value::Object(map) => map,
        other => {
            return Err(SourceError::InvalidRow(format!(
                "expected JSON object for {} row, got {}",
                table, other
            )))
        }
    };

    Ok(ChangedRow {
        table,
        id: id.to_string(),
        modified,
        columns,
    })
}

fn join_row(row: &Row) -> Result<JoinRow, SourceError> {
    let get_err = |e: tokio_postgres::Error| SourceError::InvalidRow(e.to_string());
    let id: Uuid = row.try_get("id").map_err(get_err)?;
    let person_id: Option<Uuid> = row.try_get("person_id").map_err(get_err)?;

    Ok(JoinRow {
        id: id.to_string(),
        title: row.try_get("title").map_err(get_err)?,
        description: row.try_get("description").map_err(get_err)?,
        rating: row.try_get("rating").map_err(get_err)?,
        role: row.try_get("role").map_err(get_err)?,
        person_id: person_id.map(|p| p.to_string()),
        full_name: row.try_get("full_name").map_err(get_err)?,
        genre_name: row.try_get("genre_name").map_err(get_err)?,
    })
}

#[async_trait]
impl ChangeSource for PostgresSource {
    async fn scan_table(
        &self,
        table: Table,
        since: DateTime<Utc>,
        after: Option<&RowCursor>,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match after {
            Some(cursor) => {
                let after_id = Uuid::parse_str(&cursor.id)
                    .map_err(|_| SourceError::InvalidId(cursor.id.clone()))?;
                self.query(
                    &scan_query(table, true),
                    &[&since, &cursor.modified, &after_id, &limit],
                )
                .await?
            }
            None => self.query(&scan_query(table, false), &[&since, &limit]).await?,
        };

        debug!(table = %table, rows = rows.len(), "Scanned table page");
        rows.iter().map(|row| changed_row(table, row)).collect()
    }

    async fn resolve_root_ids(
        &self,
        table: Table,
        ids: &[String],
    ) -> Result<Vec<String>, SourceError> {
        let association = table
            .association_table()
            .ok_or(SourceError::UnsupportedTable {
                operation: "resolve_root_ids",
                table,
            })?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = parse_ids(ids)?;
        let rows = self.query(&resolve_query(table, association), &[&ids]).await?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, Uuid>("id")
                    .map(|id| id.to_string())
                    .map_err(|e| SourceError::InvalidRow(e.to_string()))
            })
            .collect()
    }

    async fn fetch_join_rows(&self, root_ids: &[String]) -> Result<Vec<JoinRow>, SourceError> {
        if root_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = parse_ids(root_ids)?;
        let rows = self.query(FILM_ROWS_QUERY, &[&ids]).await?;
        debug!(roots = ids.len(), rows = rows.len(), "Fetched join rows");
        rows.iter().map(join_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failures_are_transient() {
        assert!(is_connection_failure(true, None, false));
        assert!(is_connection_failure(false, None, true));
        assert!(is_connection_failure(false, Some("08006"), false));
        assert!(is_connection_failure(false, Some("08001"), false));
        assert!(is_connection_failure(false, Some("57P01"), false));
        assert!(is_connection_failure(false, Some("57P03"), false));
        assert!(is_connection_failure(false, Some("53300"), false));
    }

    #[test]
    fn test_statement_failures_are_fatal() {
        // Parameter encoding and row decoding carry no SQLSTATE and no I/O cause
        assert!(!is_connection_failure(false, None, false));
        // undefined_table, undefined_column, syntax_error
        assert!(!is_connection_failure(false, Some("42P01"), false));
        assert!(!is_connection_failure(false, Some("42703"), false));
        assert!(!is_connection_failure(false, Some("42601"), false));
        // deadlock_detected is not a connection problem either
        assert!(!is_connection_failure(false, Some("40P01"), false));
    }

    #[test]
    fn test_scan_query_first_page() {
        let sql = scan_query(Table::Person, false);
        assert!(sql.contains("FROM person t"));
        assert!(sql.contains("LIMIT $2"));
        assert!(!sql.contains("$3"));
    }

    #[test]
    fn test_scan_query_with_cursor() {
        let sql = scan_query(Table::FilmWork, true);
        assert!(sql.contains("FROM film_work t"));
        assert!(sql.contains("(t.modified, t.id) > ($2, $3)"));
        assert!(sql.contains("LIMIT $4"));
    }

    #[test]
    fn test_resolve_query_uses_association() {
        let sql = resolve_query(Table::Genre, "genre_film_work");
        assert!(sql.contains("JOIN genre_film_work a"));
        assert!(sql.contains("a.genre_id = ANY($1)"));
        assert!(sql.contains("ORDER BY fw.modified"));
    }

    #[test]
    fn test_parse_ids_rejects_garbage() {
        let ok = parse_ids(&["6f2b5c1e-0a52-4c4f-9a7e-0b3b8d1c2e11".to_string()]).unwrap();
        assert_eq!(ok.len(), 1);
        let err = parse_ids(&["not-a-uuid".to_string()]).unwrap_err();
        assert!(matches!(err, SourceError::InvalidId(ref id) if id == "not-a-uuid"));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = PostgresSettings::default();
        let config = PostgresSourceConfig::from(&settings);
        assert_eq!(config.schema, "content");
        assert_eq!(config.password.expose_secret(), "postgres");

        let pg = config.pg_config();
        assert_eq!(pg.get_dbname(), Some("cinemax_database"));
        assert_eq!(pg.get_options(), Some("-c search_path=content"));
    }

    #[tokio::test]
    async fn test_resolve_root_table_is_unsupported() {
        let source = PostgresSource::new(PostgresSourceConfig::from(&PostgresSettings::default()));
        let err = source
            .resolve_root_ids(Table::FilmWork, &["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedTable { .. }));
    }
}
