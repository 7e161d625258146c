//! Password-gated, field-level-encrypted configuration storage.
//!
//! The store persists the console's configuration document as individual
//! SQLite rows. Fields classified sensitive (bearer token, cookie header,
//! destination platform keys) are sealed with AES-256-GCM under a key
//! derived from the operator's password via scrypt; everything else is
//! stored as plaintext. The cryptographic state machine has three states:
//!
//! ```text
//! NoPassword --set_password--> Unlocked
//! Locked     --unlock(ok)----> Unlocked
//! Locked     --unlock(fail)--> Locked
//! ```
//!
//! `Unlocked` is terminal for the process lifetime; locking only happens
//! across restarts. `update_password` keeps the store unlocked with a
//! rotated key and re-encrypts every stored ciphertext under it.

pub mod document;

mod crypto;
mod db;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use crate::db::{Db, ItemRecord, META_KEY_HASH, META_KEY_SALT, STORAGE_VERSION};
use crate::document::ConfigDocument;

pub use crate::error::{Result, StoreError};

const MIN_PASSWORD_BYTES: usize = 8;

enum StoreState {
    NoPassword,
    Locked,
    Unlocked(crypto::KeyMaterial),
}

struct StoreInner {
    db: Db,
    state: StoreState,
}

impl StoreInner {
    /// Returns the unlocked key or the precise state error. The password
    /// salt row is the sole has-password signal, mirrored into the state.
    fn require_unlocked(&self) -> Result<&crypto::KeyMaterial> {
        match &self.state {
            StoreState::Unlocked(key) => Ok(key),
            StoreState::Locked => Err(StoreError::Locked),
            StoreState::NoPassword => Err(StoreError::PasswordNotSet),
        }
    }
}

/// Durable, password-gated configuration store.
///
/// All access to the backing file is serialized through one internal
/// critical section, so a shared reference can be used concurrently from
/// many request handlers. Raw key material never leaves this type.
pub struct SecretStore {
    inner: Mutex<StoreInner>,
    path: PathBuf,
}

impl SecretStore {
    /// Opens (or creates) the store at `path` and loads its metadata.
    /// The initial state is `Locked` when a password salt exists,
    /// otherwise `NoPassword`.
    ///
    /// # Errors
    /// Returns a persistence error if the file or schema cannot be set up.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Db::open(path)?;
        let state = if db.metadata_value(META_KEY_SALT)?.is_some() {
            StoreState::Locked
        } else {
            StoreState::NoPassword
        };
        Ok(Self {
            inner: Mutex::new(StoreInner { db, state }),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn has_password(&self) -> bool {
        let inner = self.lock();
        !matches!(inner.state, StoreState::NoPassword)
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        let inner = self.lock();
        matches!(inner.state, StoreState::Unlocked(_))
    }

    /// True once any configuration items have been persisted, regardless
    /// of lock state. Used by first-run bootstrap.
    ///
    /// # Errors
    /// Returns a persistence error if the count query fails.
    pub fn has_config_items(&self) -> Result<bool> {
        let inner = self.lock();
        inner.db.has_items()
    }

    /// Sets the initial password. Only legal from the `NoPassword` state.
    ///
    /// Generates a fresh random salt, derives the key, and writes salt and
    /// key hash in one transaction: either both metadata rows land or
    /// neither does. On success the store transitions to `Unlocked`.
    ///
    /// # Errors
    /// `Validation` for passwords shorter than 8 bytes,
    /// `PasswordAlreadySet` when a password exists, persistence and crypto
    /// errors otherwise.
    pub fn set_password(&self, password: &str) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(inner.state, StoreState::NoPassword) {
            return Err(StoreError::PasswordAlreadySet);
        }
        let password = password.trim();
        if password.len() < MIN_PASSWORD_BYTES {
            return Err(StoreError::Validation(format!(
                "password must be at least {MIN_PASSWORD_BYTES} bytes"
            )));
        }

        let mut salt = [0u8; crypto::SALT_LEN];
        crypto::fill_random(&mut salt)?;
        let key = crypto::derive_key(password, &salt)?;
        let hash = key.fingerprint();

        inner.db.insert_password_meta(&salt, &hash)?;
        inner.state = StoreState::Unlocked(key);
        Ok(())
    }

    /// Unlocks the store with the operator's password.
    ///
    /// Derives a key from the stored salt, compares its SHA-256 digest to
    /// the stored hash in constant time, and caches the key on success.
    /// On mismatch the state is unchanged. The error carries no detail: a
    /// wrong password and a corrupted metadata row look identical.
    ///
    /// # Errors
    /// `PasswordNotSet` when no password exists, `InvalidPassword` on
    /// mismatch or missing verifier rows.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let mut inner = self.lock();
        if matches!(inner.state, StoreState::NoPassword) {
            return Err(StoreError::PasswordNotSet);
        }
        let key = Self::check_password(&inner, password)?;
        inner.state = StoreState::Unlocked(key);
        Ok(())
    }

    /// Verifies a password against the stored salt and hash without
    /// changing the lock state.
    ///
    /// # Errors
    /// Same contract as [`SecretStore::unlock`].
    pub fn verify_password(&self, password: &str) -> Result<()> {
        let inner = self.lock();
        if matches!(inner.state, StoreState::NoPassword) {
            return Err(StoreError::PasswordNotSet);
        }
        Self::check_password(&inner, password).map(|_| ())
    }

    fn check_password(inner: &StoreInner, password: &str) -> Result<crypto::KeyMaterial> {
        let password = password.trim();
        if password.is_empty() {
            return Err(StoreError::InvalidPassword);
        }
        let Some(salt) = inner.db.metadata_value(META_KEY_SALT)? else {
            return Err(StoreError::InvalidPassword);
        };
        let Some(stored_hash) = inner.db.metadata_value(META_KEY_HASH)? else {
            return Err(StoreError::InvalidPassword);
        };
        let key = crypto::derive_key(password, &salt)?;
        if !crypto::constant_time_eq(&key.fingerprint(), &stored_hash) {
            return Err(StoreError::InvalidPassword);
        }
        Ok(key)
    }

    /// Rotates the password. Only legal while `Unlocked`.
    ///
    /// Every already-stored encrypted item is decrypted under the current
    /// key and re-encrypted under the new one; the new salt, new hash and
    /// all rewritten ciphertexts commit in a single transaction, so old
    /// ciphertexts never become permanently unreadable. The store stays
    /// `Unlocked` with the rotated key.
    ///
    /// # Errors
    /// `Validation` for short passwords, `Locked`/`PasswordNotSet` in the
    /// wrong state, crypto errors if an existing ciphertext fails to
    /// decrypt, persistence errors on commit failure.
    pub fn update_password(&self, new_password: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.require_unlocked()?;
        let new_password = new_password.trim();
        if new_password.len() < MIN_PASSWORD_BYTES {
            return Err(StoreError::Validation(format!(
                "password must be at least {MIN_PASSWORD_BYTES} bytes"
            )));
        }

        let mut salt = [0u8; crypto::SALT_LEN];
        crypto::fill_random(&mut salt)?;
        let new_key = crypto::derive_key(new_password, &salt)?;
        let hash = new_key.fingerprint();

        let reencrypted = {
            let old_key = inner.require_unlocked()?;
            let mut out = Vec::new();
            for item in inner.db.load_items()? {
                if item.encrypted && !item.value.is_empty() {
                    let plain = crypto::open(old_key, &item.value)?;
                    out.push((item.key, crypto::seal(&new_key, &plain)?));
                }
            }
            out
        };

        inner.db.rotate_password_meta(&salt, &hash, &reencrypted)?;
        inner.state = StoreState::Unlocked(new_key);
        Ok(())
    }

    /// Persists `doc` as a full replacement of the stored document. Only
    /// legal while `Unlocked`.
    ///
    /// Sensitive fields with non-empty values are sealed under the current
    /// key with a fresh nonce per field; everything else is stored as
    /// plaintext bytes. Keys absent from `doc` are deleted. The write is
    /// one transaction.
    ///
    /// # Errors
    /// `Locked`/`PasswordNotSet` in the wrong state, crypto errors if
    /// sealing fails, persistence errors on commit failure.
    pub fn save_config(&self, doc: &ConfigDocument) -> Result<()> {
        let mut inner = self.lock();
        let staged = {
            let key = inner.require_unlocked()?;
            Self::stage_items(doc, Some(key))?
        };
        inner.db.replace_items(&staged)
    }

    /// Loads and reassembles the stored document. Only legal while
    /// `Unlocked`. Runs the one-time legacy-layout migration before the
    /// first successful read.
    ///
    /// # Errors
    /// `Locked`/`PasswordNotSet` in the wrong state, crypto errors on
    /// undecryptable items, persistence errors otherwise.
    pub fn load_config(&self) -> Result<ConfigDocument> {
        let mut inner = self.lock();
        inner.require_unlocked()?;
        Self::migrate_legacy(&mut inner)?;

        let rows = inner.db.load_items()?;
        let key = inner.require_unlocked()?;
        let mut doc = ConfigDocument::default();
        for row in rows {
            let text = if row.encrypted && !row.value.is_empty() {
                let plain = crypto::open(key, &row.value)?;
                String::from_utf8(plain)
                    .map_err(|_| StoreError::Crypto(format!("item {} is not valid UTF-8", row.key)))?
            } else {
                String::from_utf8_lossy(&row.value).into_owned()
            };
            doc.apply_item(&row.key, &text);
        }
        doc.normalize();
        Ok(doc)
    }

    /// Writes the first-run defaults while no password exists yet.
    ///
    /// This is the only write legal in the `NoPassword` state. Because no
    /// key exists, the document must not carry sensitive values; they
    /// would otherwise be persisted in the clear.
    ///
    /// # Errors
    /// `PasswordAlreadySet` once a password exists, `Validation` when the
    /// store already holds items or the document carries sensitive values.
    pub fn bootstrap_defaults(&self, doc: &ConfigDocument) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(inner.state, StoreState::NoPassword) {
            return Err(StoreError::PasswordAlreadySet);
        }
        if inner.db.has_items()? {
            return Err(StoreError::Validation("store already holds configuration".into()));
        }
        if doc.has_sensitive_values() {
            return Err(StoreError::Validation(
                "sensitive values cannot be stored before a password is set".into(),
            ));
        }
        let staged = Self::stage_items(doc, None)?;
        inner.db.replace_items(&staged)
    }

    fn stage_items(doc: &ConfigDocument, key: Option<&crypto::KeyMaterial>) -> Result<Vec<ItemRecord>> {
        let mut staged = Vec::new();
        for (item_key, value, sensitive) in doc.to_items() {
            let (bytes, encrypted) = if sensitive && !value.is_empty() {
                let key = key.ok_or_else(|| {
                    StoreError::Validation("sensitive values require an unlocked store".into())
                })?;
                (crypto::seal(key, value.as_bytes())?, true)
            } else {
                (value.into_bytes(), false)
            };
            staged.push(ItemRecord {
                key: item_key.to_string(),
                value: bytes,
                encrypted,
            });
        }
        Ok(staged)
    }

    /// Declared storage migration, version 1 -> 2: decrypt the legacy
    /// single-blob document, decompose it into items and drop the legacy
    /// representation. Idempotent; runs at most once per store.
    fn migrate_legacy(inner: &mut StoreInner) -> Result<()> {
        if inner.db.storage_version()? >= STORAGE_VERSION {
            return Ok(());
        }
        if inner.db.has_items()? {
            return inner.db.mark_storage_current();
        }
        let Some(blob) = inner.db.legacy_blob()? else {
            return inner.db.mark_storage_current();
        };

        let staged = {
            let key = inner.require_unlocked()?;
            let plain = crypto::open(key, &blob)?;
            let mut doc: ConfigDocument = serde_json::from_slice(&plain)
                .map_err(|e| StoreError::Crypto(format!("legacy payload did not decode: {e}")))?;
            doc.normalize();
            Self::stage_items(&doc, Some(key))?
        };
        info!("migrating legacy configuration layout to item storage");
        inner.db.finish_legacy_migration(&staged)
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("config store mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::document::{ConfigDocument, DEFAULT_BASE_URL};
    use rusqlite::Connection;
    use tempfile::TempDir;

    const PASSWORD: &str = "longenough1";

    fn temp_store() -> (SecretStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::open(&dir.path().join("config.db")).unwrap();
        (store, dir)
    }

    fn doc_with_token() -> ConfigDocument {
        let mut doc = ConfigDocument {
            token: "abc".into(),
            page_size: 20,
            ..ConfigDocument::default()
        };
        doc.normalize();
        doc
    }

    #[test]
    fn test_fresh_store_state() {
        let (store, _dir) = temp_store();
        assert!(!store.has_password());
        assert!(!store.is_unlocked());
        assert!(!store.has_config_items().unwrap());
        assert!(matches!(store.load_config(), Err(StoreError::PasswordNotSet)));
        assert!(matches!(
            store.save_config(&ConfigDocument::default()),
            Err(StoreError::PasswordNotSet)
        ));
    }

    #[test]
    fn test_set_password_validation() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.set_password("short"), Err(StoreError::Validation(_))));

        store.set_password(PASSWORD).unwrap();
        assert!(store.has_password());
        assert!(store.is_unlocked());

        assert!(matches!(
            store.set_password("anotherlong1"),
            Err(StoreError::PasswordAlreadySet)
        ));
    }

    #[test]
    fn test_unlock_requires_password_set() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.unlock("whatever8"), Err(StoreError::PasswordNotSet)));
    }

    #[test]
    fn test_save_load_roundtrip_and_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");

        {
            let store = SecretStore::open(&path).unwrap();
            store.set_password(PASSWORD).unwrap();
            store.save_config(&doc_with_token()).unwrap();

            let loaded = store.load_config().unwrap();
            assert_eq!(loaded.token, "abc");
            assert_eq!(loaded.page_size, 20);
            assert_eq!(loaded.base_url, DEFAULT_BASE_URL);
        }

        // Simulated restart: a new store over the same file starts locked.
        let store = SecretStore::open(&path).unwrap();
        assert!(store.has_password());
        assert!(!store.is_unlocked());
        assert!(matches!(store.load_config(), Err(StoreError::Locked)));

        assert!(matches!(store.unlock("wrong-password"), Err(StoreError::InvalidPassword)));
        assert!(!store.is_unlocked());

        store.unlock(PASSWORD).unwrap();
        let loaded = store.load_config().unwrap();
        assert_eq!(loaded, doc_with_token());
    }

    #[test]
    fn test_wrong_password_leaves_metadata_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");
        let store = SecretStore::open(&path).unwrap();
        store.set_password(PASSWORD).unwrap();

        let read_meta = |key: &str| -> Vec<u8> {
            let conn = Connection::open(&path).unwrap();
            conn.query_row("SELECT value FROM metadata WHERE key = ?", [key], |r| r.get(0))
                .unwrap()
        };
        let salt_before = read_meta("key_salt");
        let hash_before = read_meta("key_hash");

        assert!(store.unlock("not-the-password").is_err());
        assert_eq!(read_meta("key_salt"), salt_before);
        assert_eq!(read_meta("key_hash"), hash_before);
    }

    #[test]
    fn test_sensitive_fields_are_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");
        let store = SecretStore::open(&path).unwrap();
        store.set_password(PASSWORD).unwrap();

        let mut doc = doc_with_token();
        doc.cookie = "session=topsecret".into();
        store.save_config(&doc).unwrap();

        let conn = Connection::open(&path).unwrap();
        let fetch = |key: &str| -> (Vec<u8>, i64) {
            conn.query_row(
                "SELECT value, encrypted FROM config_items WHERE key = ?",
                [key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
        };

        for (key, plain) in [("token", "abc"), ("cookie", "session=topsecret")] {
            let (value, encrypted) = fetch(key);
            assert_eq!(encrypted, 1);
            assert_ne!(value, plain.as_bytes());
            // nonce(12) plus at least the GCM tag
            assert!(value.len() >= 12 + 16);
        }

        // Non-sensitive fields stay readable plaintext.
        let (value, encrypted) = fetch("base_url");
        assert_eq!(encrypted, 0);
        assert_eq!(value, DEFAULT_BASE_URL.as_bytes());

        // Empty sensitive fields are not encrypted.
        let (value, encrypted) = fetch("notion_token");
        assert_eq!(encrypted, 0);
        assert!(value.is_empty());
    }

    #[test]
    fn test_update_password_reencrypts_existing_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");

        {
            let store = SecretStore::open(&path).unwrap();
            store.set_password(PASSWORD).unwrap();
            store.save_config(&doc_with_token()).unwrap();
            store.update_password("rotated-pass-2").unwrap();
            assert!(store.is_unlocked());

            // Data written before rotation stays readable with the new key.
            assert_eq!(store.load_config().unwrap().token, "abc");
        }

        let store = SecretStore::open(&path).unwrap();
        assert!(matches!(store.unlock(PASSWORD), Err(StoreError::InvalidPassword)));
        store.unlock("rotated-pass-2").unwrap();
        assert_eq!(store.load_config().unwrap().token, "abc");
    }

    #[test]
    fn test_update_password_requires_unlocked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");
        {
            let store = SecretStore::open(&path).unwrap();
            store.set_password(PASSWORD).unwrap();
        }
        let store = SecretStore::open(&path).unwrap();
        assert!(matches!(
            store.update_password("rotated-pass-2"),
            Err(StoreError::Locked)
        ));
    }

    #[test]
    fn test_verify_password_does_not_unlock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");
        {
            let store = SecretStore::open(&path).unwrap();
            store.set_password(PASSWORD).unwrap();
        }
        let store = SecretStore::open(&path).unwrap();
        store.verify_password(PASSWORD).unwrap();
        assert!(!store.is_unlocked());
        assert!(store.verify_password("nope-nope").is_err());
    }

    #[test]
    fn test_bootstrap_defaults() {
        let (store, _dir) = temp_store();

        let sensitive = ConfigDocument {
            token: "abc".into(),
            ..ConfigDocument::default()
        };
        assert!(matches!(
            store.bootstrap_defaults(&sensitive),
            Err(StoreError::Validation(_))
        ));

        store.bootstrap_defaults(&ConfigDocument::default()).unwrap();
        assert!(store.has_config_items().unwrap());

        // Bootstrap refuses to run twice.
        assert!(matches!(
            store.bootstrap_defaults(&ConfigDocument::default()),
            Err(StoreError::Validation(_))
        ));

        // After a password is set, the bootstrapped defaults load back.
        store.set_password(PASSWORD).unwrap();
        let loaded = store.load_config().unwrap();
        assert_eq!(loaded, ConfigDocument::default());
    }

    #[test]
    fn test_legacy_blob_migrates_on_first_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");

        let mut legacy_doc = ConfigDocument {
            token: "legacy-token".into(),
            page_size: 42,
            timezone: "Europe/Helsinki".into(),
            ..ConfigDocument::default()
        };
        legacy_doc.normalize();

        // Build a database the way a legacy build would have left it:
        // password metadata plus one encrypted JSON blob, no version row.
        let salt = [7u8; crypto::SALT_LEN];
        let key = crypto::derive_key(PASSWORD, &salt).unwrap();
        let blob = crypto::seal(&key, &serde_json::to_vec(&legacy_doc).unwrap()).unwrap();
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
                "INSERT INTO metadata(key, value) VALUES('key_salt', ?)",
                [salt.to_vec()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO metadata(key, value) VALUES('key_hash', ?)",
                [key.fingerprint().to_vec()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO configs(name, payload) VALUES('active', ?)",
                [blob],
            )
            .unwrap();
        }

        let store = SecretStore::open(&path).unwrap();
        assert!(store.has_password());
        store.unlock(PASSWORD).unwrap();

        let loaded = store.load_config().unwrap();
        assert_eq!(loaded.token, "legacy-token");
        assert_eq!(loaded.page_size, 42);
        assert_eq!(loaded.timezone, "Europe/Helsinki");

        // The legacy table is gone and the migration does not run again.
        let conn = Connection::open(&path).unwrap();
        let legacy: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='configs'",
                [],
                |r| r.get(0),
            )
            .ok();
        assert!(legacy.is_none());
        assert_eq!(store.load_config().unwrap().token, "legacy-token");
    }
}
