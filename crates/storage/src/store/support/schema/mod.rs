#![forbid(unsafe_code)]

mod sql;

use super::super::StoreError;
use rusqlite::Connection;

pub(in crate::store) fn install_store_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sql::store_schema_sql())?;
    Ok(())
}

pub(in crate::store) fn install_queue_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sql::queue_schema_sql())?;
    Ok(())
}
