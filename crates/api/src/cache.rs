//! TTL-bounded read caches for the browse/export flow.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use recap_export::{ConversationPage, ConversationSummary, ExportConversation};

/// Paged listings change often and are cheap to refetch.
pub const PAGE_TTL: Duration = Duration::from_secs(30);
/// Details are expensive to refetch and change rarely.
pub const DETAIL_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub offset: i64,
    pub limit: i64,
}

struct Entry<T> {
    value: T,
    fetched: Instant,
}

impl<T> Entry<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            fetched: Instant::now(),
        }
    }

    fn is_live(&self, ttl: Duration) -> bool {
        self.fetched.elapsed() < ttl
    }
}

/// Two independent lookup caches: one for paged conversation listings,
/// one for per-conversation detail. Values are deep-copied across the
/// lock boundary so concurrent readers never share a copy, and the whole
/// cache drops on any configuration change because entries may have been
/// fetched under superseded credentials.
pub struct ConversationCache {
    page_ttl: Duration,
    detail_ttl: Duration,
    pages: Mutex<HashMap<PageKey, Entry<ConversationPage>>>,
    details: Mutex<HashMap<String, Entry<ExportConversation>>>,
}

impl ConversationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(PAGE_TTL, DETAIL_TTL)
    }

    #[must_use]
    pub fn with_ttls(page_ttl: Duration, detail_ttl: Duration) -> Self {
        Self {
            page_ttl,
            detail_ttl,
            pages: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a copy of an unexpired page entry, or `None` to signal a
    /// miss. `force` always misses so the caller refetches.
    #[must_use]
    pub fn get_page(&self, key: PageKey, force: bool) -> Option<ConversationPage> {
        if force {
            return None;
        }
        let pages = self.lock_pages();
        pages
            .get(&key)
            .filter(|entry| entry.is_live(self.page_ttl))
            .map(|entry| entry.value.clone())
    }

    /// Stores a fresh page entry, always overwriting.
    pub fn put_page(&self, key: PageKey, page: ConversationPage) {
        self.lock_pages().insert(key, Entry::fresh(page));
    }

    /// Returns a copy of an unexpired detail entry. A forced read also
    /// evicts any stale copy so a failed refetch cannot resurrect it.
    #[must_use]
    pub fn get_detail(&self, id: &str, force: bool) -> Option<ExportConversation> {
        let mut details = self.lock_details();
        if force {
            details.remove(id);
            return None;
        }
        details
            .get(id)
            .filter(|entry| entry.is_live(self.detail_ttl))
            .map(|entry| entry.value.clone())
    }

    pub fn put_detail(&self, id: &str, value: ExportConversation) {
        self.lock_details().insert(id.to_string(), Entry::fresh(value));
    }

    /// Explicit eviction, used after the conversation is deleted upstream.
    pub fn remove_detail(&self, id: &str) {
        self.lock_details().remove(id);
    }

    /// Drops both maps entirely.
    pub fn invalidate_all(&self) {
        self.lock_pages().clear();
        self.lock_details().clear();
    }

    /// Scans unexpired page entries for a conversation's listing summary.
    /// Used to back-fill a title the detail endpoint did not return.
    #[must_use]
    pub fn lookup_summary(&self, id: &str) -> Option<ConversationSummary> {
        if id.trim().is_empty() {
            return None;
        }
        let pages = self.lock_pages();
        for entry in pages.values() {
            if !entry.is_live(self.page_ttl) {
                continue;
            }
            if let Some(item) = entry.value.items.iter().find(|item| item.id == id) {
                return Some(item.clone());
            }
        }
        None
    }

    #[allow(clippy::expect_used)]
    fn lock_pages(&self) -> std::sync::MutexGuard<'_, HashMap<PageKey, Entry<ConversationPage>>> {
        self.pages.lock().expect("page cache mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_details(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<ExportConversation>>> {
        self.details.lock().expect("detail cache mutex poisoned")
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}
