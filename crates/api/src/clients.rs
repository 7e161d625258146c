//! Lazily constructed, credential-bound destination clients.

use std::sync::{Arc, Mutex};

use recap_export::{AnytypeClient, NotionClient, Result};
use recap_store::document::ConfigDocument;

/// Holds at most one client instance per destination platform, built on
/// first use from the configuration snapshot the caller passes in.
/// `reset` drops the instances; the next request rebuilds them from the
/// then-current (possibly rotated) credentials.
pub struct ClientPool {
    http: reqwest::Client,
    anytype: Mutex<Option<Arc<AnytypeClient>>>,
    notion: Mutex<Option<Arc<NotionClient>>>,
}

impl ClientPool {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            anytype: Mutex::new(None),
            notion: Mutex::new(None),
        }
    }

    /// Returns the cached Anytype client or builds one from `cfg`.
    ///
    /// # Errors
    /// Propagates the client's construction validation (missing API key,
    /// space id, type key or base URL).
    pub fn anytype(&self, cfg: &ConfigDocument) -> Result<Arc<AnytypeClient>> {
        let mut slot = self.lock_anytype();
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(AnytypeClient::from_config(cfg, self.http.clone())?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Returns the cached Notion client or builds one from `cfg`.
    ///
    /// # Errors
    /// Propagates the client's construction validation (missing API key
    /// or parent id, unsupported parent type).
    pub fn notion(&self, cfg: &ConfigDocument) -> Result<Arc<NotionClient>> {
        let mut slot = self.lock_notion();
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(NotionClient::from_config(cfg, self.http.clone())?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Drops both cached instances.
    pub fn reset(&self) {
        self.lock_anytype().take();
        self.lock_notion().take();
    }

    #[allow(clippy::expect_used)]
    fn lock_anytype(&self) -> std::sync::MutexGuard<'_, Option<Arc<AnytypeClient>>> {
        self.anytype.lock().expect("anytype client mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_notion(&self) -> std::sync::MutexGuard<'_, Option<Arc<NotionClient>>> {
        self.notion.lock().expect("notion client mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anytype_cfg() -> ConfigDocument {
        ConfigDocument {
            anytype_token: "key".into(),
            anytype_space_id: "space".into(),
            anytype_type_key: "ot-note".into(),
            ..ConfigDocument::default()
        }
    }

    #[test]
    fn test_missing_credentials_fail_lazily() {
        let pool = ClientPool::new(reqwest::Client::new());
        assert!(pool.anytype(&ConfigDocument::default()).is_err());
        assert!(pool.notion(&ConfigDocument::default()).is_err());
    }

    #[test]
    fn test_instances_are_cached_until_reset() {
        let pool = ClientPool::new(reqwest::Client::new());

        let first = pool.anytype(&anytype_cfg()).unwrap();
        let second = pool.anytype(&anytype_cfg()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        pool.reset();
        let third = pool.anytype(&anytype_cfg()).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_failed_build_leaves_slot_empty() {
        let pool = ClientPool::new(reqwest::Client::new());
        assert!(pool.anytype(&ConfigDocument::default()).is_err());
        // A later call with valid configuration succeeds.
        assert!(pool.anytype(&anytype_cfg()).is_ok());
    }
}
