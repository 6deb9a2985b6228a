//! SQLite schema DDL and the schema version stamp.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::errors::{CodebookError, CodebookResult};

/// Version written into `store_meta` by this release. Databases stamped
/// with a higher version are refused.
pub const SCHEMA_VERSION: i32 = 1;

/// Tables and indexes, all `IF NOT EXISTS` so they can be replayed.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS codebooks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        name TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS codes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code_id INTEGER NOT NULL REFERENCES codes(id),
        language_id INTEGER NOT NULL,
        label TEXT NOT NULL,
        UNIQUE(code_id, language_id)
    );",
    "CREATE TABLE IF NOT EXISTS codebook_codes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        codebook_id INTEGER NOT NULL REFERENCES codebooks(id),
        code_id INTEGER NOT NULL REFERENCES codes(id),
        parent_id INTEGER REFERENCES codes(id),
        hide BOOLEAN NOT NULL DEFAULT FALSE,
        validfrom TEXT,
        validto TEXT,
        ordernr INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE INDEX IF NOT EXISTS idx_codebooks_project ON codebooks(project_id);",
    "CREATE INDEX IF NOT EXISTS idx_labels_code ON labels(code_id, language_id);",
    "CREATE INDEX IF NOT EXISTS idx_codebook_codes_codebook
        ON codebook_codes(codebook_id, ordernr, code_id);",
    "CREATE INDEX IF NOT EXISTS idx_codebook_codes_code ON codebook_codes(code_id);",
    "CREATE INDEX IF NOT EXISTS idx_codebook_codes_parent
        ON codebook_codes(codebook_id, parent_id);",
];

/// Version stored in `store_meta`, `None` on a database never stamped.
pub fn stored_schema_version(conn: &Connection) -> CodebookResult<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'schema_version';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| {
            v.parse::<i32>().map_err(|_| {
                CodebookError::Database(format!("unreadable schema version '{v}'"))
            })
        })
        .transpose()
}

/// Stamp an unstamped database with [`SCHEMA_VERSION`]. A database written
/// by a newer release is rejected before anything touches its tables.
pub fn check_schema_version(conn: &Connection) -> CodebookResult<()> {
    match stored_schema_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1);",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!(version = SCHEMA_VERSION, "stamped codebook schema");
            Ok(())
        }
        Some(found) if found > SCHEMA_VERSION => Err(CodebookError::Database(format!(
            "schema version {found} is newer than supported version {SCHEMA_VERSION}"
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn fresh_database_gets_stamped_once() {
        let conn = fresh();
        assert_eq!(stored_schema_version(&conn).unwrap(), None);
        check_schema_version(&conn).unwrap();
        check_schema_version(&conn).unwrap();
        assert_eq!(stored_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn newer_database_is_refused() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1);",
            params![(SCHEMA_VERSION + 1).to_string()],
        )
        .unwrap();
        let err = check_schema_version(&conn).unwrap_err();
        assert!(matches!(err, CodebookError::Database(_)));
    }

    #[test]
    fn garbage_version_is_an_error() {
        let conn = fresh();
        conn.execute_batch("INSERT INTO store_meta(key, value) VALUES('schema_version', 'v2');")
            .unwrap();
        assert!(matches!(
            stored_schema_version(&conn),
            Err(CodebookError::Database(_))
        ));
    }
}
