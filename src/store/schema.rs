//! SQLite DDL for the roost config store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Complete DDL for the config store.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Typed settings, NVS entries, and opaque config blobs.
-- config_type: 'config' | 'nvs' | 'multinet' | 'was'
-- config_namespace: NVS namespace ('WAS' | 'WIFI'), NULL otherwise.
CREATE TABLE IF NOT EXISTS fleet_config (
    id               INTEGER PRIMARY KEY,
    config_type      TEXT NOT NULL,
    config_name      TEXT NOT NULL,
    config_namespace TEXT,
    config_value     TEXT,
    UNIQUE(config_type, config_name)
);

CREATE INDEX IF NOT EXISTS idx_fleet_config_type ON fleet_config(config_type);

-- Per-device labels keyed by canonical MAC address.
CREATE TABLE IF NOT EXISTS client_labels (
    mac_addr TEXT PRIMARY KEY,
    label    TEXT
);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times — all statements use `IF NOT EXISTS`.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_schema_creates_tables() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"fleet_config".to_owned()));
        assert!(tables.contains(&"client_labels".to_owned()));
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");
        apply_schema(&conn).expect("second apply_schema (idempotent)");
    }

    #[test]
    fn config_type_and_name_are_unique() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply_schema");

        conn.execute(
            "INSERT INTO fleet_config (config_type, config_name, config_value) VALUES ('config', 'wake_word', '\"alexa\"')",
            [],
        )
        .expect("first insert");

        let dup = conn.execute(
            "INSERT INTO fleet_config (config_type, config_name, config_value) VALUES ('config', 'wake_word', '\"hiesp\"')",
            [],
        );
        assert!(dup.is_err());
    }
}
