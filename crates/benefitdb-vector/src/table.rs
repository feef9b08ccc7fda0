//! LanceDB connection and table helpers.
use std::path::Path;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use lancedb::database::CreateTableMode;
use lancedb::{connect, Connection, Table};

use benefitdb_core::{Error, Result};

pub async fn open_db(dir: &Path) -> Result<Connection> {
    connect(dir.to_string_lossy().as_ref()).execute().await.map_err(Error::dense)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::dense)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn open_table(conn: &Connection, name: &str) -> Result<Table> {
    conn.open_table(name).execute().await.map_err(Error::dense)
}

/// Creates `name` holding `batch`, or no rows when `batch` is `None`. With
/// `overwrite`, an existing table is replaced by a new version in one commit;
/// handles opened on the old version keep reading it.
pub async fn create_table(
    conn: &Connection,
    name: &str,
    schema: Arc<arrow_schema::Schema>,
    batch: Option<RecordBatch>,
    overwrite: bool,
) -> Result<Table> {
    let iter = RecordBatchIterator::new(batch.map(Ok).into_iter(), schema);
    let mode = if overwrite { CreateTableMode::Overwrite } else { CreateTableMode::Create };
    conn.create_table(name, Box::new(iter)).mode(mode).execute().await.map_err(Error::dense)
}
