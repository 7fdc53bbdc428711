use crate::core::error::SwitchyardError;
use rusqlite::Connection;
use std::time::Duration;

/// Busy timeout applied to every connection.
const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, SwitchyardError> {
    let conn = Connection::open(db_path).map_err(|e| {
        SwitchyardError::StoreUnavailable(format!("cannot open {}: {}", db_path, e))
    })?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

// Schemas are applied by the owning subsystem on open; see `schemas`.
