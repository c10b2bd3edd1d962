//! Embedded-SQL WAL backend.
//!
//! One table, append = INSERT, replay = a rowid-ordered scan. SQLite's
//! own journal gives per-append durability, so this backend needs no
//! background flusher. The heavier write path buys simpler operational
//! semantics: the log is a single queryable file.

use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use bytes::Bytes;
use rusqlite::{params, Connection};

use crate::{WalError, WalRecord, WalSink};

const DB_FILE: &str = "ripple-wal.db";

fn sql_err(e: rusqlite::Error) -> WalError {
    WalError::Fatal(e.to_string())
}

/// WAL backed by an embedded SQLite database.
pub struct SqliteWal {
    conn: Mutex<Connection>,
}

impl SqliteWal {
    /// Opens (creating if needed) the log database under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, WalError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| WalError::Fatal(e.to_string()))?;
        let conn = Connection::open(dir.join(DB_FILE)).map_err(sql_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sql_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl WalSink for SqliteWal {
    fn init(&self, _now: SystemTime) -> Result<(), WalError> {
        let conn = self.conn.lock().expect("wal mutex");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wal_log (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                shard_id INTEGER NOT NULL,
                seq      INTEGER NOT NULL,
                command  BLOB NOT NULL
            );",
        )
        .map_err(sql_err)
    }

    fn append(&self, shard_id: u16, seq: u64, command: &[u8]) -> Result<(), WalError> {
        let conn = self.conn.lock().expect("wal mutex");
        conn.execute(
            "INSERT INTO wal_log (shard_id, seq, command) VALUES (?1, ?2, ?3)",
            params![shard_id as i64, seq as i64, command],
        )
        .map(|_| ())
        .map_err(sql_err)
    }

    fn replay(
        &self,
        visitor: &mut dyn FnMut(WalRecord) -> Result<(), WalError>,
    ) -> Result<(), WalError> {
        let conn = self.conn.lock().expect("wal mutex");
        let mut stmt = conn
            .prepare("SELECT shard_id, seq, command FROM wal_log ORDER BY id ASC")
            .map_err(sql_err)?;
        let mut rows = stmt.query([]).map_err(sql_err)?;
        while let Some(row) = rows.next().map_err(sql_err)? {
            let shard_id: i64 = row.get(0).map_err(sql_err)?;
            let seq: i64 = row.get(1).map_err(sql_err)?;
            let command: Vec<u8> = row.get(2).map_err(sql_err)?;
            visitor(WalRecord {
                shard_id: shard_id as u16,
                seq: seq as u64,
                command: Bytes::from(command),
            })?;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), WalError> {
        let conn = self.conn.lock().expect("wal mutex");
        // best effort: fold the sqlite WAL back into the main file
        let _ = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
        Ok(())
    }
}

impl std::fmt::Debug for SqliteWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWal").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = SqliteWal::open(dir.path()).unwrap();
            wal.init(SystemTime::now()).unwrap();
            wal.append(3, 7, b"persisted").unwrap();
            wal.shutdown().unwrap();
        }

        let wal = SqliteWal::open(dir.path()).unwrap();
        wal.init(SystemTime::now()).unwrap();
        let mut records = Vec::new();
        wal.replay(&mut |r| {
            records.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            records,
            vec![WalRecord {
                shard_id: 3,
                seq: 7,
                command: Bytes::from_static(b"persisted"),
            }]
        );
    }

    #[test]
    fn visitor_error_aborts_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = SqliteWal::open(dir.path()).unwrap();
        wal.init(SystemTime::now()).unwrap();
        wal.append(0, 1, b"a").unwrap();
        wal.append(0, 2, b"b").unwrap();

        let mut seen = 0;
        let result = wal.replay(&mut |_| {
            seen += 1;
            Err(WalError::Fatal("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
