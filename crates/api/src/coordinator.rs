//! The single authoritative in-memory configuration snapshot and the
//! invalidation fan-out that keeps dependents consistent with it.

use std::sync::{Arc, RwLock};

use chrono_tz::Tz;
use recap_export::resolve_timezone;
use recap_store::document::{ConfigDocument, ConfigPatch};
use recap_store::{SecretStore, StoreError};
use tracing::warn;

use crate::cache::ConversationCache;
use crate::clients::ClientPool;

struct Snapshot {
    doc: ConfigDocument,
    tz: Tz,
}

/// Owns the live configuration.
///
/// Readers get immutable copies under a shared lock; `update` applies a
/// partial patch under the exclusive lock, then persists and fans out
/// invalidation with the lock released, so no downstream component ever
/// waits on a lock the coordinator still holds.
pub struct ConfigCoordinator {
    store: Arc<SecretStore>,
    cache: Arc<ConversationCache>,
    pool: Arc<ClientPool>,
    snapshot: RwLock<Snapshot>,
}

impl ConfigCoordinator {
    #[must_use]
    pub fn new(
        initial: ConfigDocument,
        store: Arc<SecretStore>,
        cache: Arc<ConversationCache>,
        pool: Arc<ClientPool>,
    ) -> Self {
        let mut doc = initial;
        doc.normalize();
        let tz = resolve_timezone(&doc.timezone);
        Self {
            store,
            cache,
            pool,
            snapshot: RwLock::new(Snapshot { doc, tz }),
        }
    }

    /// Returns a deep copy of the current document. Never blocks on I/O.
    #[must_use]
    pub fn document(&self) -> ConfigDocument {
        self.read().doc.clone()
    }

    /// The timezone resolved from the current document.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.read().tz
    }

    /// Applies a partial patch: fields present in `patch` overwrite the
    /// snapshot, omitted fields stay untouched. The merged document is
    /// normalized, published, persisted as a full replacement, and then
    /// caches and destination clients are invalidated.
    ///
    /// Persistence failures caused purely by the store's lock state are
    /// logged and do not fail the update; the configuration keeps working
    /// for this process, it simply is not durable yet.
    ///
    /// # Errors
    /// Any other persistence or crypto failure from the store.
    pub fn update(&self, patch: &ConfigPatch) -> Result<ConfigDocument, StoreError> {
        let doc = {
            let mut snapshot = self.write();
            patch.apply(&mut snapshot.doc);
            snapshot.doc.normalize();
            snapshot.tz = resolve_timezone(&snapshot.doc.timezone);
            snapshot.doc.clone()
        };

        self.persist_and_invalidate(&doc)?;
        Ok(doc)
    }

    /// Replaces the whole snapshot, typically with the document loaded
    /// from the store right after an unlock. Triggers the same
    /// invalidation as `update` since anything cached may have been
    /// fetched under the superseded configuration.
    pub fn replace(&self, doc: ConfigDocument) {
        let mut doc = doc;
        doc.normalize();
        {
            let mut snapshot = self.write();
            snapshot.tz = resolve_timezone(&doc.timezone);
            snapshot.doc = doc;
        }
        self.cache.invalidate_all();
        self.pool.reset();
    }

    fn persist_and_invalidate(&self, doc: &ConfigDocument) -> Result<(), StoreError> {
        match self.store.save_config(doc) {
            Ok(()) => {}
            Err(err) if err.is_lock_state() => {
                warn!("configuration not persisted: {err}");
            }
            Err(err) => return Err(err),
        }
        self.cache.invalidate_all();
        self.pool.reset();
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().expect("config snapshot lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().expect("config snapshot lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageKey;
    use recap_export::ConversationPage;
    use tempfile::TempDir;

    const PASSWORD: &str = "longenough1";

    struct Fixture {
        coordinator: ConfigCoordinator,
        store: Arc<SecretStore>,
        cache: Arc<ConversationCache>,
        _dir: TempDir,
        path: std::path::PathBuf,
    }

    fn fixture(unlock: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.db");
        let store = Arc::new(SecretStore::open(&path).unwrap());
        if unlock {
            store.set_password(PASSWORD).unwrap();
        }
        let cache = Arc::new(ConversationCache::new());
        let pool = Arc::new(ClientPool::new(reqwest::Client::new()));
        let coordinator = ConfigCoordinator::new(
            ConfigDocument::default(),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&pool),
        );
        Fixture {
            coordinator,
            store,
            cache,
            _dir: dir,
            path,
        }
    }

    #[test]
    fn test_update_applies_partial_patch() {
        let fx = fixture(true);

        let patch = ConfigPatch {
            token: Some("tok-1".into()),
            page_size: Some(250),
            ..ConfigPatch::default()
        };
        let updated = fx.coordinator.update(&patch).unwrap();

        assert_eq!(updated.token, "tok-1");
        assert_eq!(updated.page_size, 100, "page size is clamped");
        assert_eq!(updated.order, "updated", "untouched fields keep defaults");

        // A second patch leaves the first one's fields alone.
        let patch = ConfigPatch {
            order: Some("created".into()),
            ..ConfigPatch::default()
        };
        let updated = fx.coordinator.update(&patch).unwrap();
        assert_eq!(updated.token, "tok-1");
        assert_eq!(updated.order, "created");
    }

    #[test]
    fn test_update_persists_through_store() {
        let fx = fixture(true);
        fx.coordinator
            .update(&ConfigPatch {
                token: Some("durable-token".into()),
                ..ConfigPatch::default()
            })
            .unwrap();

        // A fresh store over the same file sees the persisted document
        // after unlocking.
        drop(fx.coordinator);
        drop(fx.store);
        let reopened = SecretStore::open(&fx.path).unwrap();
        reopened.unlock(PASSWORD).unwrap();
        assert_eq!(reopened.load_config().unwrap().token, "durable-token");
    }

    #[test]
    fn test_update_invalidates_caches_even_without_ttl_expiry() {
        let fx = fixture(true);
        let key = PageKey { offset: 0, limit: 20 };
        fx.cache.put_page(key, ConversationPage::default());
        fx.cache.put_detail("c1", recap_export::ExportConversation::default());

        fx.coordinator
            .update(&ConfigPatch {
                page_size: Some(10),
                ..ConfigPatch::default()
            })
            .unwrap();

        assert!(fx.cache.get_page(key, false).is_none());
        assert!(fx.cache.get_detail("c1", false).is_none());
    }

    #[test]
    fn test_update_without_password_applies_in_memory_only() {
        let fx = fixture(false);
        let updated = fx
            .coordinator
            .update(&ConfigPatch {
                timezone: Some("Europe/Helsinki".into()),
                ..ConfigPatch::default()
            })
            .expect("lock-state persistence failures are non-fatal");

        assert_eq!(updated.timezone, "Europe/Helsinki");
        assert_eq!(fx.coordinator.document().timezone, "Europe/Helsinki");
        assert_eq!(fx.coordinator.timezone(), chrono_tz::Europe::Helsinki);
        assert!(!fx.store.has_config_items().unwrap(), "nothing was persisted");
    }

    #[test]
    fn test_replace_installs_loaded_document() {
        let fx = fixture(true);
        let key = PageKey { offset: 0, limit: 20 };
        fx.cache.put_page(key, ConversationPage::default());

        let mut doc = ConfigDocument::default();
        doc.timezone = "utc".into();
        doc.token = "from-disk".into();
        fx.coordinator.replace(doc);

        assert_eq!(fx.coordinator.document().token, "from-disk");
        assert_eq!(fx.coordinator.timezone(), chrono_tz::Tz::UTC);
        assert!(fx.cache.get_page(key, false).is_none());
    }

    #[test]
    fn test_document_returns_independent_copies() {
        let fx = fixture(true);
        let mut copy = fx.coordinator.document();
        copy.token = "mutated".into();
        assert_eq!(fx.coordinator.document().token, "");
    }
}
