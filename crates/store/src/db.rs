use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::error::Result;

pub(crate) const META_KEY_SALT: &str = "key_salt";
pub(crate) const META_KEY_HASH: &str = "key_hash";
const META_STORAGE_VERSION: &str = "storage_version";

/// Current on-disk layout: individual `config_items` rows.
/// Version 1 is the legacy layout: one encrypted JSON blob in a `configs`
/// table.
pub(crate) const STORAGE_VERSION: i64 = 2;

const LEGACY_TABLE: &str = "configs";
const LEGACY_ROW: &str = "active";

/// One staged configuration item ready for persistence. `value` is either
/// plaintext bytes or a sealed `nonce || ciphertext` blob depending on
/// `encrypted`.
pub(crate) struct ItemRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub encrypted: bool,
}

#[derive(Debug)]
pub(crate) struct Db {
    conn: Connection,
}

impl Db {
    /// Opens the backing file, creating directories and schema as needed,
    /// and stamps the storage version if this is the first open by a
    /// version-aware build.
    ///
    /// # Errors
    /// Returns a persistence error if the file cannot be created or the
    /// schema statements fail.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.migrate()?;
        db.stamp_storage_version()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout=5000;

        CREATE TABLE IF NOT EXISTS config_items (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            encrypted INTEGER NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );
        ",
        )?;
        Ok(())
    }

    /// Writes the `storage_version` metadata row exactly once. A database
    /// that predates version tagging is stamped 1 when the legacy blob
    /// table is present, otherwise it starts at the current version. This
    /// is the only place the legacy table name is consulted.
    fn stamp_storage_version(&mut self) -> Result<()> {
        if self.metadata_value(META_STORAGE_VERSION)?.is_some() {
            return Ok(());
        }
        let version = if self.legacy_table_exists()? { 1 } else { STORAGE_VERSION };
        self.conn.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)",
            params![META_STORAGE_VERSION, version.to_string().into_bytes()],
        )?;
        Ok(())
    }

    fn legacy_table_exists(&self) -> Result<bool> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?",
                params![LEGACY_TABLE],
                |r| r.get(0),
            )
            .optional()?;
        Ok(name.is_some())
    }

    pub(crate) fn storage_version(&self) -> Result<i64> {
        let value = self.metadata_value(META_STORAGE_VERSION)?;
        let version = value
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(STORAGE_VERSION);
        Ok(version)
    }

    pub(crate) fn metadata_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", params![key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    pub(crate) fn has_items(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM config_items", [], |r| r.get(0))?;
        Ok(count > 0)
    }

    /// Writes the password salt and verifier hash in one transaction.
    /// Plain INSERTs: this is only legal while no password row exists, and
    /// a concurrent duplicate attempt fails on the primary key.
    pub(crate) fn insert_password_meta(&mut self, salt: &[u8], hash: &[u8]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)",
            params![META_KEY_SALT, salt],
        )?;
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)",
            params![META_KEY_HASH, hash],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Replaces the password salt/hash and rewrites the given re-encrypted
    /// item values in a single transaction. Used by password rotation so
    /// that old ciphertexts never outlive the key that can open them.
    pub(crate) fn rotate_password_meta(
        &mut self,
        salt: &[u8],
        hash: &[u8],
        reencrypted: &[(String, Vec<u8>)],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![META_KEY_SALT, salt],
        )?;
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![META_KEY_HASH, hash],
        )?;
        for (key, value) in reencrypted {
            tx.execute(
                "UPDATE config_items SET value = ?, updated_at = ? WHERE key = ?",
                params![value, now, key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Full replacement of the item set in one transaction: upsert every
    /// staged item, then delete any stored key absent from the new set.
    /// A failure at any step rolls the whole operation back.
    pub(crate) fn replace_items(&mut self, items: &[ItemRecord]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for item in items {
            tx.execute(
                "INSERT INTO config_items(key, value, encrypted, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                   value=excluded.value,
                   encrypted=excluded.encrypted,
                   updated_at=excluded.updated_at",
                params![item.key, item.value, i64::from(item.encrypted), now],
            )?;
        }
        if items.is_empty() {
            tx.execute("DELETE FROM config_items", [])?;
        } else {
            let placeholders = vec!["?"; items.len()].join(",");
            let sql = format!("DELETE FROM config_items WHERE key NOT IN ({placeholders})");
            tx.execute(&sql, params_from_iter(items.iter().map(|i| i.key.as_str())))?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn load_items(&self) -> Result<Vec<ItemRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value, encrypted FROM config_items")?;
        let rows = stmt.query_map([], |r| {
            Ok(ItemRecord {
                key: r.get(0)?,
                value: r.get(1)?,
                encrypted: r.get::<_, i64>(2)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Reads the legacy single-blob payload, if the legacy table and row
    /// still exist.
    pub(crate) fn legacy_blob(&self) -> Result<Option<Vec<u8>>> {
        if !self.legacy_table_exists()? {
            return Ok(None);
        }
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                &format!("SELECT payload FROM {LEGACY_TABLE} WHERE name = ?"),
                params![LEGACY_ROW],
                |r| r.get(0),
            )
            .optional()?;
        Ok(blob.filter(|b| !b.is_empty()))
    }

    /// Completes the declared 1 -> 2 migration: writes the decomposed
    /// items, drops the legacy table and bumps the stored version, all in
    /// one transaction.
    pub(crate) fn finish_legacy_migration(&mut self, items: &[ItemRecord]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for item in items {
            tx.execute(
                "INSERT INTO config_items(key, value, encrypted, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                   value=excluded.value,
                   encrypted=excluded.encrypted,
                   updated_at=excluded.updated_at",
                params![item.key, item.value, i64::from(item.encrypted), now],
            )?;
        }
        tx.execute(&format!("DROP TABLE IF EXISTS {LEGACY_TABLE}"), [])?;
        tx.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![META_STORAGE_VERSION, STORAGE_VERSION.to_string().into_bytes()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Marks the store as current without moving data. Used when the
    /// version predates item storage but there is nothing to migrate.
    pub(crate) fn mark_storage_current(&mut self) -> Result<()> {
        self.conn.execute(
            "INSERT INTO metadata(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![META_STORAGE_VERSION, STORAGE_VERSION.to_string().into_bytes()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (Db, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = Db::open(&dir.path().join("store.sqlite3")).expect("open db");
        (db, dir)
    }

    fn record(key: &str, value: &[u8], encrypted: bool) -> ItemRecord {
        ItemRecord {
            key: key.to_string(),
            value: value.to_vec(),
            encrypted,
        }
    }

    #[test]
    fn test_open_is_idempotent_and_stamps_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");

        let db = Db::open(&path).unwrap();
        assert_eq!(db.storage_version().unwrap(), STORAGE_VERSION);
        assert!(!db.has_items().unwrap());
        drop(db);

        let db = Db::open(&path).unwrap();
        assert_eq!(db.storage_version().unwrap(), STORAGE_VERSION);
    }

    #[test]
    fn test_open_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("store.sqlite3");
        Db::open(&nested).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_password_meta_roundtrip() {
        let (mut db, _dir) = open_temp();
        assert!(db.metadata_value(META_KEY_SALT).unwrap().is_none());

        db.insert_password_meta(&[1u8; 16], &[2u8; 32]).unwrap();
        assert_eq!(db.metadata_value(META_KEY_SALT).unwrap().unwrap(), vec![1u8; 16]);
        assert_eq!(db.metadata_value(META_KEY_HASH).unwrap().unwrap(), vec![2u8; 32]);

        // A second insert must fail; the salt is the has-password signal.
        assert!(db.insert_password_meta(&[3u8; 16], &[4u8; 32]).is_err());
    }

    #[test]
    fn test_replace_items_upserts_and_prunes() {
        let (mut db, _dir) = open_temp();

        db.replace_items(&[
            record("alpha", b"one", false),
            record("beta", b"two", true),
            record("gamma", b"three", false),
        ])
        .unwrap();
        assert_eq!(db.load_items().unwrap().len(), 3);

        // A smaller replacement set deletes the keys it no longer carries.
        db.replace_items(&[record("alpha", b"one-updated", false)]).unwrap();
        let items = db.load_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "alpha");
        assert_eq!(items[0].value, b"one-updated");
        assert!(!items[0].encrypted);

        db.replace_items(&[]).unwrap();
        assert!(!db.has_items().unwrap());
    }

    #[test]
    fn test_rotate_password_meta_updates_values() {
        let (mut db, _dir) = open_temp();
        db.insert_password_meta(&[1u8; 16], &[2u8; 32]).unwrap();
        db.replace_items(&[record("token", b"old-cipher", true)]).unwrap();

        db.rotate_password_meta(&[9u8; 16], &[8u8; 32], &[("token".to_string(), b"new-cipher".to_vec())])
            .unwrap();

        assert_eq!(db.metadata_value(META_KEY_SALT).unwrap().unwrap(), vec![9u8; 16]);
        assert_eq!(db.metadata_value(META_KEY_HASH).unwrap().unwrap(), vec![8u8; 32]);
        let items = db.load_items().unwrap();
        assert_eq!(items[0].value, b"new-cipher");
        assert!(items[0].encrypted);
    }

    #[test]
    fn test_legacy_database_detected_and_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.sqlite3");

        // Simulate a database written by a legacy build: blob table
        // present, no version row.
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r"
                CREATE TABLE metadata (key TEXT PRIMARY KEY, value BLOB NOT NULL);
                CREATE TABLE configs (name TEXT PRIMARY KEY, payload BLOB NOT NULL);
                ",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO configs(name, payload) VALUES(?, ?)",
                params![LEGACY_ROW, b"blob".to_vec()],
            )
            .unwrap();
        }

        let mut db = Db::open(&path).unwrap();
        assert_eq!(db.storage_version().unwrap(), 1);
        assert_eq!(db.legacy_blob().unwrap().unwrap(), b"blob");

        db.finish_legacy_migration(&[record("listen", b"127.0.0.1:8080", false)])
            .unwrap();
        assert_eq!(db.storage_version().unwrap(), STORAGE_VERSION);
        assert!(db.legacy_blob().unwrap().is_none());
        assert!(db.has_items().unwrap());
    }
}
