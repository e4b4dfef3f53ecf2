//! SQLite-backed config store.
//!
//! Persists the typed satellite config, the NVS record, opaque config blobs
//! (`was`, `multinet`), and per-device labels. Writers are serialized through
//! an internal mutex; readers tolerate an unreadable store by returning an
//! empty record.

mod schema;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{NvsConfig, SatelliteConfig};
use crate::error::{Result, RoostError};

/// A persisted `(mac_addr, label)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLabel {
    pub mac_addr: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// SQLite-backed config store.
///
/// Thread-safe via an internal `Mutex<Connection>`. All writes are
/// serialized; reads acquire the same mutex (WAL mode keeps them cheap).
pub struct ConfigStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish_non_exhaustive()
    }
}

/// Legacy JSON files ingested by [`ConfigStore::migrate_legacy`].
const LEGACY_CONFIG: &str = "user_config.json";
const LEGACY_NVS: &str = "user_nvs.json";
const LEGACY_MULTINET: &str = "user_multinet.json";
const LEGACY_WAS: &str = "user_was.json";
const LEGACY_CLIENTS: &str = "user_client_config.json";

impl ConfigStore {
    /// Open (or create) the store at `db_path` and apply the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(store_err)?;
        schema::apply_schema(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        schema::apply_schema(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// True when no config rows and no labels exist (fresh install).
    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.lock();
        let configs: i64 = conn
            .query_row("SELECT COUNT(*) FROM fleet_config", [], |row| row.get(0))
            .map_err(store_err)?;
        let labels: i64 = conn
            .query_row("SELECT COUNT(*) FROM client_labels", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(configs == 0 && labels == 0)
    }

    // ── typed config ────────────────────────────────────────────────────────

    /// Read the stored config as a JSON object (only non-empty fields).
    ///
    /// Never errors: an unreadable store yields an empty object.
    pub fn read_config_json(&self) -> Value {
        match self.rows_for_type("config") {
            Ok(rows) => {
                let mut object = Map::new();
                for (name, raw) in rows {
                    let value = decode_value(&raw);
                    if matches!(&value, Value::String(s) if s.is_empty()) {
                        continue;
                    }
                    object.insert(name, value);
                }
                Value::Object(object)
            }
            Err(e) => {
                tracing::warn!("config store unreadable, returning empty config: {e}");
                Value::Object(Map::new())
            }
        }
    }

    /// Read the stored config as a typed record.
    ///
    /// Never errors: unreadable or unparseable stores yield the empty record.
    pub fn read_config(&self) -> SatelliteConfig {
        match serde_json::from_value(self.read_config_json()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("stored config does not parse as a typed record: {e}");
                SatelliteConfig::default()
            }
        }
    }

    /// Upsert a (possibly partial) config record.
    ///
    /// A `null` incoming value clears the field. Writes equal to the current
    /// value are no-ops; a failed transaction leaves the store unchanged.
    pub fn write_config(&self, partial: &Value) -> Result<()> {
        let object = partial
            .as_object()
            .ok_or_else(|| RoostError::Store("config record must be a JSON object".to_owned()))?;
        let mut conn = self.lock();
        let txn = conn.transaction().map_err(store_err)?;
        for (name, value) in object {
            upsert_row(&txn, "config", None, name, value)?;
        }
        txn.commit().map_err(store_err)
    }

    // ── NVS ─────────────────────────────────────────────────────────────────

    /// Read the stored NVS record as a JSON object.
    pub fn read_nvs_json(&self) -> Value {
        let rows = match self.nvs_rows() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("config store unreadable, returning empty NVS: {e}");
                return Value::Object(Map::new());
            }
        };
        let mut namespaces: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for (namespace, name, raw) in rows {
            namespaces
                .entry(namespace)
                .or_default()
                .insert(name, decode_value(&raw));
        }
        let mut object = Map::new();
        for (namespace, entries) in namespaces {
            object.insert(namespace, Value::Object(entries));
        }
        Value::Object(object)
    }

    /// Read the stored NVS record as a typed record.
    pub fn read_nvs(&self) -> NvsConfig {
        match serde_json::from_value(self.read_nvs_json()) {
            Ok(nvs) => nvs,
            Err(e) => {
                tracing::warn!("stored NVS does not parse as a typed record: {e}");
                NvsConfig::default()
            }
        }
    }

    /// Upsert a (possibly partial) NVS record of `{namespace: {key: value}}`.
    pub fn write_nvs(&self, partial: &Value) -> Result<()> {
        let object = partial
            .as_object()
            .ok_or_else(|| RoostError::Store("NVS record must be a JSON object".to_owned()))?;
        let mut conn = self.lock();
        let txn = conn.transaction().map_err(store_err)?;
        for (namespace, entries) in object {
            let entries = entries.as_object().ok_or_else(|| {
                RoostError::Store(format!("NVS namespace {namespace} must be a JSON object"))
            })?;
            for (name, value) in entries {
                upsert_row(&txn, "nvs", Some(namespace), name, value)?;
            }
        }
        txn.commit().map_err(store_err)
    }

    // ── opaque blobs ────────────────────────────────────────────────────────

    /// Read an opaque config blob (`was`, `multinet`).
    pub fn read_blob(&self, kind: &str) -> Value {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT config_value FROM fleet_config WHERE config_type = ?1 AND config_name = 'json'",
                params![kind],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_default()
            .flatten();
        match raw {
            Some(raw) => decode_value(&raw),
            None => Value::Object(Map::new()),
        }
    }

    /// Write an opaque config blob without interpreting its schema.
    pub fn write_blob(&self, kind: &str, value: &Value) -> Result<()> {
        let mut conn = self.lock();
        let txn = conn.transaction().map_err(store_err)?;
        upsert_row(&txn, kind, None, "json", value)?;
        txn.commit().map_err(store_err)
    }

    // ── client labels ───────────────────────────────────────────────────────

    /// All stored `(mac, label)` pairs, ordered by MAC.
    pub fn list_client_labels(&self) -> Result<Vec<ClientLabel>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT mac_addr, label FROM client_labels ORDER BY mac_addr")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ClientLabel {
                    mac_addr: row.get(0)?,
                    label: row.get(1)?,
                })
            })
            .map_err(store_err)?;

        let mut labels = Vec::new();
        for row in rows {
            labels.push(row.map_err(store_err)?);
        }
        Ok(labels)
    }

    /// The label stored for one MAC, if any.
    pub fn label_for_mac(&self, mac: &str) -> Option<String> {
        let conn = self.lock();
        conn.query_row(
            "SELECT label FROM client_labels WHERE mac_addr = ?1",
            params![mac],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or_default()
        .flatten()
    }

    /// Insert or update the label for one MAC.
    pub fn upsert_client_label(&self, mac: &str, label: Option<&str>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO client_labels (mac_addr, label) VALUES (?1, ?2) \
             ON CONFLICT(mac_addr) DO UPDATE SET label = excluded.label",
            params![mac, label],
        )
        .map_err(store_err)?;
        Ok(())
    }

    // ── legacy migration ────────────────────────────────────────────────────

    /// One-shot startup migration of legacy JSON files into the store.
    ///
    /// Only runs when the store is empty. Each file is ingested
    /// independently; a malformed file is logged and skipped.
    pub fn migrate_legacy(&self, dir: &Path) -> Result<()> {
        if !self.is_empty()? {
            return Ok(());
        }

        if let Some(config) = read_legacy_json(&dir.join(LEGACY_CONFIG)) {
            tracing::info!("migrating legacy config file into the store");
            self.write_config(&config)?;
        }
        if let Some(nvs) = read_legacy_json(&dir.join(LEGACY_NVS)) {
            tracing::info!("migrating legacy NVS file into the store");
            self.write_nvs(&nvs)?;
        }
        if let Some(multinet) = read_legacy_json(&dir.join(LEGACY_MULTINET)) {
            self.write_blob("multinet", &multinet)?;
        }
        if let Some(was) = read_legacy_json(&dir.join(LEGACY_WAS)) {
            self.write_blob("was", &was)?;
        }
        if let Some(Value::Array(devices)) = read_legacy_json(&dir.join(LEGACY_CLIENTS)) {
            for device in devices {
                let Some(mac) = device.get("mac_addr").and_then(Value::as_str) else {
                    continue;
                };
                let label = device.get("label").and_then(Value::as_str);
                self.upsert_client_label(mac, label)?;
            }
        }
        Ok(())
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn rows_for_type(&self, config_type: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT config_name, config_value FROM fleet_config \
                 WHERE config_type = ?1 AND config_value IS NOT NULL",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![config_type], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(store_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(store_err)?);
        }
        Ok(out)
    }

    fn nvs_rows(&self) -> Result<Vec<(String, String, String)>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT config_namespace, config_name, config_value FROM fleet_config \
                 WHERE config_type = 'nvs' AND config_namespace IS NOT NULL \
                 AND config_value IS NOT NULL",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(store_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(store_err)?);
        }
        Ok(out)
    }
}

/// Upsert one row, clearing it when the incoming value is `null` and
/// skipping writes that match the current value.
fn upsert_row(
    txn: &rusqlite::Transaction<'_>,
    config_type: &str,
    namespace: Option<&str>,
    name: &str,
    value: &Value,
) -> Result<()> {
    if value.is_null() {
        txn.execute(
            "DELETE FROM fleet_config WHERE config_type = ?1 AND config_name = ?2",
            params![config_type, name],
        )
        .map_err(store_err)?;
        return Ok(());
    }

    let encoded = encode_value(value);
    let current: Option<String> = txn
        .query_row(
            "SELECT config_value FROM fleet_config WHERE config_type = ?1 AND config_name = ?2",
            params![config_type, name],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)?
        .flatten();
    if current.as_deref() == Some(encoded.as_str()) {
        return Ok(());
    }

    txn.execute(
        "INSERT INTO fleet_config (config_type, config_name, config_namespace, config_value) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(config_type, config_name) DO UPDATE SET \
         config_namespace = excluded.config_namespace, \
         config_value = excluded.config_value",
        params![config_type, name, namespace, encoded],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Canonical textual form for stored values: JSON text.
fn encode_value(value: &Value) -> String {
    value.to_string()
}

/// Decode a stored value, tolerating pre-migration plain strings.
fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn read_legacy_json(path: &Path) -> Option<Value> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|raw| {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    }) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("skipping malformed legacy file {}: {e}", path.display());
            None
        }
    }
}

fn store_err(e: rusqlite::Error) -> RoostError {
    RoostError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_write_read_round_trip() {
        let store = ConfigStore::open_in_memory().expect("open");
        let record = json!({
            "command_endpoint": "Home Assistant",
            "hass_host": "ha.local",
            "hass_port": 8123,
            "hass_tls": false,
            "hass_token": "abc123",
            "speaker_volume": 60,
            "was_mode": true,
            "wis_url": "http://stt.local:19000/api/listen",
        });
        store.write_config(&record).expect("write");

        assert_eq!(store.read_config_json(), record);

        let typed = store.read_config();
        assert_eq!(typed.hass_host.as_deref(), Some("ha.local"));
        assert_eq!(typed.hass_port, Some(8123));
        assert_eq!(typed.was_mode, Some(true));
    }

    #[test]
    fn null_clears_a_field() {
        let store = ConfigStore::open_in_memory().expect("open");
        store
            .write_config(&json!({"hass_token": "abc", "hass_host": "ha.local"}))
            .expect("write");
        store
            .write_config(&json!({"hass_token": null}))
            .expect("clear");

        let config = store.read_config_json();
        assert!(config.get("hass_token").is_none());
        assert_eq!(config["hass_host"], "ha.local");
    }

    #[test]
    fn empty_strings_are_treated_as_unset_on_read() {
        let store = ConfigStore::open_in_memory().expect("open");
        store
            .write_config(&json!({"ntp_host": "", "hass_host": "ha.local"}))
            .expect("write");

        let config = store.read_config_json();
        assert!(config.get("ntp_host").is_none());
        assert_eq!(config["hass_host"], "ha.local");
    }

    #[test]
    fn rewriting_the_same_value_is_a_no_op() {
        let store = ConfigStore::open_in_memory().expect("open");
        store.write_config(&json!({"wake_word": "alexa"})).expect("first");
        store.write_config(&json!({"wake_word": "alexa"})).expect("second");
        assert_eq!(store.read_config_json()["wake_word"], "alexa");
    }

    #[test]
    fn nvs_round_trip() {
        let store = ConfigStore::open_in_memory().expect("open");
        let record = json!({
            "WAS": {"URL": "ws://roost.local:8502/ws"},
            "WIFI": {"PSK": "hunter2hunter2", "SSID": "perch"},
        });
        store.write_nvs(&record).expect("write");
        assert_eq!(store.read_nvs_json(), record);

        let typed = store.read_nvs();
        assert_eq!(
            typed.was.and_then(|w| w.url).as_deref(),
            Some("ws://roost.local:8502/ws")
        );
    }

    #[test]
    fn blobs_are_opaque() {
        let store = ConfigStore::open_in_memory().expect("open");
        let blob = json!({"anything": {"nested": [1, 2, 3]}});
        store.write_blob("was", &blob).expect("write");
        assert_eq!(store.read_blob("was"), blob);
        assert_eq!(store.read_blob("multinet"), json!({}));
    }

    #[test]
    fn client_labels_upsert_and_list() {
        let store = ConfigStore::open_in_memory().expect("open");
        store
            .upsert_client_label("aa:bb:cc:dd:ee:ff", Some("Kitchen"))
            .expect("insert");
        store
            .upsert_client_label("aa:bb:cc:dd:ee:ff", Some("Living Room"))
            .expect("update");

        let labels = store.list_client_labels().expect("list");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label.as_deref(), Some("Living Room"));
        assert_eq!(
            store.label_for_mac("aa:bb:cc:dd:ee:ff").as_deref(),
            Some("Living Room")
        );
        assert_eq!(store.label_for_mac("00:00:00:00:00:00"), None);
    }

    #[test]
    fn migrate_legacy_ingests_files_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("user_config.json"),
            r#"{"wake_word": "hiesp", "speaker_volume": 70}"#,
        )
        .expect("write config");
        std::fs::write(
            dir.path().join("user_client_config.json"),
            r#"[{"mac_addr": "aa:bb:cc:dd:ee:ff", "label": "Hall"}]"#,
        )
        .expect("write clients");

        let store = ConfigStore::open_in_memory().expect("open");
        store.migrate_legacy(dir.path()).expect("migrate");

        assert_eq!(store.read_config_json()["wake_word"], "hiesp");
        assert_eq!(store.label_for_mac("aa:bb:cc:dd:ee:ff").as_deref(), Some("Hall"));

        // A populated store never re-ingests.
        std::fs::write(
            dir.path().join("user_config.json"),
            r#"{"wake_word": "alexa"}"#,
        )
        .expect("rewrite config");
        store.migrate_legacy(dir.path()).expect("second migrate");
        assert_eq!(store.read_config_json()["wake_word"], "hiesp");
    }
}
