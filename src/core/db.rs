use crate::core::error;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

/// How the connection ended up being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Opened with `SQLITE_OPEN_READ_ONLY`; the engine refuses writes.
    ReadOnly,
    /// Read-only open failed; only `query_only` and the validator guard writes.
    QueryOnlyFallback,
}

/// Open `db_path` for the agent.
///
/// Read-only mode is tried first. `PRAGMA query_only` is switched on in
/// both cases as a second layer.
pub fn open_read_only(
    db_path: &Path,
    busy_timeout: Duration,
) -> Result<(Connection, AccessMode), error::ScoutError> {
    if !db_path.exists() {
        return Err(error::ScoutError::NotFound(format!(
            "database file {}",
            db_path.display()
        )));
    }

    let (conn, mode) = match Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) {
        Ok(conn) => (conn, AccessMode::ReadOnly),
        Err(_) => (Connection::open(db_path)?, AccessMode::QueryOnlyFallback),
    };

    conn.busy_timeout(busy_timeout)
        .map_err(error::ScoutError::RusqliteError)?;
    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(error::ScoutError::RusqliteError)?;
    Ok((conn, mode))
}
