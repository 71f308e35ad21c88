use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

use crate::config::Pacing;
use crate::pacing::pause;
use crate::record::{PersistedRow, RunMetadata};
use crate::{StoreError, COURSE_SLOTS, STORE_ATTEMPTS};

const BASE_COLUMNS: [(&str, &str); 23] = [
    ("handle", "TEXT"),
    ("page", "BIGINT"),
    ("page_seq", "BIGINT"),
    ("global_seq", "BIGINT"),
    ("member", "TEXT"),
    ("level", "TEXT"),
    ("email", "TEXT"),
    ("last_active", "TEXT"),
    ("joined", "TEXT"),
    ("value", "TEXT"),
    ("contribution", "TEXT"),
    ("renews", "TEXT"),
    ("phrase", "TEXT"),
    ("location", "TEXT"),
    ("invited_by", "TEXT"),
    ("invitation", "TEXT"),
    ("script", "TEXT"),
    ("output_file", "TEXT"),
    ("tenure_days", "BIGINT"),
    ("tenure_months", "BIGINT"),
    ("total_courses", "BIGINT"),
    ("progress_total", "BIGINT"),
    ("progress_average", "DOUBLE PRECISION"),
];

/// One bound value of an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    BigInt(Option<i64>),
    Double(Option<f64>),
    Timestamp(NaiveDateTime),
}

impl Cell {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Cell::Text(value) => value,
            Cell::BigInt(value) => value,
            Cell::Double(value) => value,
            Cell::Timestamp(value) => value,
        }
    }
}

/// Somewhere rows can be inserted in one statement.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Cell>],
    ) -> Result<u64, StoreError>;
}

/// Postgres through `tokio-postgres`. Every call opens its own connection.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    url: String,
}

impl PostgresStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn connect(&self) -> Result<Client, StoreError> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!("Postgres connection error: {err}");
            }
        });
        Ok(client)
    }

    /// Connectivity check at startup.
    pub async fn probe(&self) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    pub async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client.execute(&create_table_sql(table), &[]).await?;
        info!("Table `{table}` is ready.");
        Ok(())
    }
}

impl RowStore for PostgresStore {
    async fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Cell>],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let client = self.connect().await?;
        let sql = insert_sql(table, columns, rows.len());
        let params: Vec<&(dyn ToSql + Sync)> =
            rows.iter().flatten().map(Cell::as_sql).collect();
        Ok(client.execute(&sql, &params).await?)
    }
}

/// Best-effort secondary storage. Retries connection failures only.
pub struct RelationalSink<S> {
    store: S,
    table: String,
    metadata: RunMetadata,
    pacing: Pacing,
}

impl<S: RowStore> RelationalSink<S> {
    pub fn new(store: S, table: impl Into<String>, metadata: RunMetadata, pacing: Pacing) -> Self {
        Self {
            store,
            table: table.into(),
            metadata,
            pacing,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Inserts the page in a single statement. Connection failures are retried up
    /// to [`STORE_ATTEMPTS`] times with a fixed delay; anything else gives up at
    /// once.
    pub async fn write_page(&mut self, rows: &[PersistedRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let executed_at = Local::now().naive_local();
        let columns = store_columns();
        let values: Vec<Vec<Cell>> = rows
            .iter()
            .map(|row| store_row(row, &self.metadata, executed_at))
            .collect();

        let mut attempt = 1;
        loop {
            match self.store.insert_rows(&self.table, &columns, &values).await {
                Ok(inserted) => {
                    info!("Saved {inserted} rows to Postgres.");
                    return Ok(inserted);
                }
                Err(err) if err.is_connection() && attempt < STORE_ATTEMPTS => {
                    warn!("Postgres connection error (attempt {attempt}/{STORE_ATTEMPTS}): {err}");
                    info!("Waiting {:?} before retrying...", self.pacing.store_retry);
                    pause(self.pacing.store_retry).await;
                    attempt += 1;
                }
                Err(err) if err.is_connection() => {
                    error!("Couldn't save to Postgres after {STORE_ATTEMPTS} attempts: {err}");
                    return Err(err);
                }
                Err(err) => {
                    error!("Couldn't save the page to Postgres: {err}");
                    return Err(err);
                }
            }
        }
    }
}

pub fn store_columns() -> Vec<String> {
    let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|(name, _)| name.to_string()).collect();
    for i in 1..=COURSE_SLOTS {
        columns.push(format!("course_{i}_title"));
        columns.push(format!("course_{i}_label"));
        columns.push(format!("course_{i}_progress"));
    }
    columns.push("executed_at".into());
    columns
}

pub fn store_row(row: &PersistedRow, metadata: &RunMetadata, executed_at: NaiveDateTime) -> Vec<Cell> {
    let record = &row.record;
    let summary = record.course_summary();
    let text = |value: &str| Cell::Text(Some(value.to_string()));

    let mut cells = vec![
        text(&record.handle),
        Cell::BigInt(Some(i64::from(row.page))),
        Cell::BigInt(Some(row.page_seq as i64)),
        Cell::BigInt(Some(row.global_seq as i64)),
        text(&record.display_name),
        text(&record.level),
        text(&record.email),
        text(&record.active_since),
        text(&record.joined_on),
        text(&record.membership_value),
        text(&record.contribution),
        text(&record.renews_on),
        text(&record.phrase),
        text(&record.location_or_inviter),
        text(&record.invited_by),
        text(&record.invitation),
        text(&metadata.script),
        text(&metadata.output_file),
        Cell::BigInt(record.tenure_days()),
        Cell::BigInt(record.tenure_months()),
        Cell::BigInt(Some(summary.total_courses as i64)),
        Cell::BigInt(Some(summary.progress_total as i64)),
        Cell::Double(Some(summary.progress_average)),
    ];

    for slot in 0..COURSE_SLOTS {
        match record.courses.get(slot) {
            Some(course) => {
                cells.push(text(&course.title));
                cells.push(text(&course.progress_label));
                cells.push(Cell::BigInt(Some(i64::from(course.progress_percent))));
            }
            None => cells.extend([Cell::Text(None), Cell::Text(None), Cell::BigInt(None)]),
        }
    }
    cells.push(Cell::Timestamp(executed_at));
    cells
}

fn insert_sql(table: &str, columns: &[String], rows: usize) -> String {
    let width = columns.len();
    let values = (0..rows)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES {values}",
        columns.join(", ")
    )
}

fn create_table_sql(table: &str) -> String {
    let mut columns: Vec<String> = BASE_COLUMNS
        .iter()
        .map(|(name, sql_type)| format!("{name} {sql_type}"))
        .collect();
    for i in 1..=COURSE_SLOTS {
        columns.push(format!("course_{i}_title TEXT"));
        columns.push(format!("course_{i}_label TEXT"));
        columns.push(format!("course_{i}_progress BIGINT"));
    }
    columns.push("executed_at TIMESTAMP NOT NULL".into());
    format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "))
}
