use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api";
pub const DEFAULT_USER_AGENT: &str = "recap/0.1";
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const TARGET_ANYTYPE: &str = "anytype";
pub const TARGET_NOTION: &str = "notion";

pub const ORDER_UPDATED: &str = "updated";
pub const ORDER_CREATED: &str = "created";

pub const DEFAULT_ANYTYPE_BASE_URL: &str = "http://127.0.0.1:31009";
pub const DEFAULT_NOTION_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const NOTION_DATABASE_TITLE_PROPERTY: &str = "Name";
pub const NOTION_PAGE_TITLE_PROPERTY: &str = "title";

/// Keys whose values are always stored encrypted when non-empty,
/// regardless of what the caller asks for.
const SENSITIVE_KEYS: [&str; 4] = ["token", "cookie", "anytype_token", "notion_token"];

#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.contains(&key)
}

/// The full, merged configuration document.
///
/// Exactly one live instance exists per running server (the coordinator's
/// snapshot); everything else works on clones. Field names double as the
/// persisted item keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub listen: String,
    pub timezone: String,
    pub target: String,
    pub base_url: String,
    pub order: String,
    pub page_size: i64,
    pub max_conversations: i64,
    pub initial_offset: i64,
    pub include_archived: bool,
    pub token: String,
    pub device_id: String,
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    pub cookie: String,
    pub origin: String,
    pub language: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
    pub sec_fetch_dest: String,
    pub sec_fetch_mode: String,
    pub sec_fetch_site: String,
    pub account_id: String,
    pub client_version: String,
    pub priority: String,
    pub log_path: String,
    pub anytype_base_url: String,
    pub anytype_version: String,
    pub anytype_space_id: String,
    pub anytype_type_key: String,
    pub anytype_token: String,
    pub notion_base_url: String,
    pub notion_version: String,
    pub notion_token: String,
    pub notion_parent_type: String,
    pub notion_parent_id: String,
    pub notion_title_property: String,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            timezone: String::new(),
            target: TARGET_ANYTYPE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            order: ORDER_UPDATED.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_conversations: 0,
            initial_offset: 0,
            include_archived: false,
            token: String::new(),
            device_id: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: String::new(),
            referer: String::new(),
            cookie: String::new(),
            origin: String::new(),
            language: String::new(),
            sec_ch_ua: String::new(),
            sec_ch_ua_mobile: String::new(),
            sec_ch_ua_platform: String::new(),
            sec_fetch_dest: String::new(),
            sec_fetch_mode: String::new(),
            sec_fetch_site: String::new(),
            account_id: String::new(),
            client_version: String::new(),
            priority: String::new(),
            log_path: String::new(),
            anytype_base_url: DEFAULT_ANYTYPE_BASE_URL.to_string(),
            anytype_version: String::new(),
            anytype_space_id: String::new(),
            anytype_type_key: String::new(),
            anytype_token: String::new(),
            notion_base_url: DEFAULT_NOTION_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            notion_token: String::new(),
            notion_parent_type: String::new(),
            notion_parent_id: String::new(),
            notion_title_property: String::new(),
        }
    }
}

impl ConfigDocument {
    /// Decomposes the document into `(key, value, sensitive)` triples for
    /// persistence. The key set is closed: every save writes exactly these
    /// keys and the store deletes anything else.
    pub(crate) fn to_items(&self) -> Vec<(&'static str, String, bool)> {
        vec![
            ("listen", self.listen.clone(), false),
            ("timezone", self.timezone.clone(), false),
            ("target", self.target.clone(), false),
            ("base_url", self.base_url.clone(), false),
            ("order", self.order.clone(), false),
            ("page_size", self.page_size.to_string(), false),
            ("max_conversations", self.max_conversations.to_string(), false),
            ("initial_offset", self.initial_offset.to_string(), false),
            ("include_archived", self.include_archived.to_string(), false),
            ("token", self.token.clone(), true),
            ("device_id", self.device_id.clone(), false),
            ("user_agent", self.user_agent.clone(), false),
            ("accept_language", self.accept_language.clone(), false),
            ("referer", self.referer.clone(), false),
            ("cookie", self.cookie.clone(), true),
            ("origin", self.origin.clone(), false),
            ("language", self.language.clone(), false),
            ("sec_ch_ua", self.sec_ch_ua.clone(), false),
            ("sec_ch_ua_mobile", self.sec_ch_ua_mobile.clone(), false),
            ("sec_ch_ua_platform", self.sec_ch_ua_platform.clone(), false),
            ("sec_fetch_dest", self.sec_fetch_dest.clone(), false),
            ("sec_fetch_mode", self.sec_fetch_mode.clone(), false),
            ("sec_fetch_site", self.sec_fetch_site.clone(), false),
            ("account_id", self.account_id.clone(), false),
            ("client_version", self.client_version.clone(), false),
            ("priority", self.priority.clone(), false),
            ("log_path", self.log_path.clone(), false),
            ("anytype_base_url", self.anytype_base_url.clone(), false),
            ("anytype_version", self.anytype_version.clone(), false),
            ("anytype_space_id", self.anytype_space_id.clone(), false),
            ("anytype_type_key", self.anytype_type_key.clone(), false),
            ("anytype_token", self.anytype_token.clone(), true),
            ("notion_base_url", self.notion_base_url.clone(), false),
            ("notion_version", self.notion_version.clone(), false),
            ("notion_token", self.notion_token.clone(), true),
            ("notion_parent_type", self.notion_parent_type.clone(), false),
            ("notion_parent_id", self.notion_parent_id.clone(), false),
            ("notion_title_property", self.notion_title_property.clone(), false),
        ]
    }

    /// Applies one persisted item back onto the document. Unknown keys and
    /// unparsable numeric/boolean values are ignored.
    pub(crate) fn apply_item(&mut self, key: &str, value: &str) {
        let text = value.trim();
        match key {
            "listen" => self.listen = text.to_string(),
            "timezone" => self.timezone = text.to_string(),
            "target" => self.target = text.to_string(),
            "base_url" => self.base_url = text.to_string(),
            "order" => self.order = text.to_string(),
            "page_size" => {
                if let Ok(v) = text.parse() {
                    self.page_size = v;
                }
            }
            "max_conversations" => {
                if let Ok(v) = text.parse() {
                    self.max_conversations = v;
                }
            }
            "initial_offset" => {
                if let Ok(v) = text.parse() {
                    self.initial_offset = v;
                }
            }
            "include_archived" => {
                if let Ok(v) = text.parse() {
                    self.include_archived = v;
                }
            }
            "token" => self.token = text.to_string(),
            "device_id" => self.device_id = text.to_string(),
            "user_agent" => self.user_agent = text.to_string(),
            "accept_language" => self.accept_language = text.to_string(),
            "referer" => self.referer = text.to_string(),
            "cookie" => self.cookie = text.to_string(),
            "origin" => self.origin = text.to_string(),
            "language" => self.language = text.to_string(),
            "sec_ch_ua" => self.sec_ch_ua = text.to_string(),
            "sec_ch_ua_mobile" => self.sec_ch_ua_mobile = text.to_string(),
            "sec_ch_ua_platform" => self.sec_ch_ua_platform = text.to_string(),
            "sec_fetch_dest" => self.sec_fetch_dest = text.to_string(),
            "sec_fetch_mode" => self.sec_fetch_mode = text.to_string(),
            "sec_fetch_site" => self.sec_fetch_site = text.to_string(),
            "account_id" => self.account_id = text.to_string(),
            "client_version" => self.client_version = text.to_string(),
            "priority" => self.priority = text.to_string(),
            "log_path" => self.log_path = text.to_string(),
            "anytype_base_url" => self.anytype_base_url = text.to_string(),
            "anytype_version" => self.anytype_version = text.to_string(),
            "anytype_space_id" => self.anytype_space_id = text.to_string(),
            "anytype_type_key" => self.anytype_type_key = text.to_string(),
            "anytype_token" => self.anytype_token = text.to_string(),
            "notion_base_url" => self.notion_base_url = text.to_string(),
            "notion_version" => self.notion_version = text.to_string(),
            "notion_token" => self.notion_token = text.to_string(),
            "notion_parent_type" => self.notion_parent_type = text.to_string(),
            "notion_parent_id" => self.notion_parent_id = text.to_string(),
            "notion_title_property" => self.notion_title_property = text.to_string(),
            _ => {}
        }
    }

    /// Normalizes the document in place: trims free-text fields, folds
    /// enumerated fields onto their closed sets, clamps numeric ranges and
    /// restores defaults for fields that must not be empty.
    pub fn normalize(&mut self) {
        self.listen = self.listen.trim().to_string();
        if self.listen.is_empty() {
            self.listen = DEFAULT_LISTEN.to_string();
        }
        self.timezone = self.timezone.trim().to_string();
        self.target = normalize_target(&self.target);
        self.base_url = ensure_base_url(&self.base_url);
        self.order = normalize_order(&self.order);
        self.page_size = clamp_page_size(self.page_size);
        self.max_conversations = non_negative(self.max_conversations);
        self.initial_offset = non_negative(self.initial_offset);
        self.token = self.token.trim().to_string();
        self.device_id = self.device_id.trim().to_string();
        self.user_agent = self.user_agent.trim().to_string();
        if self.user_agent.is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self.accept_language = self.accept_language.trim().to_string();
        self.referer = self.referer.trim().to_string();
        self.cookie = self.cookie.trim().to_string();
        self.origin = self.origin.trim().to_string();
        self.language = self.language.trim().to_string();
        self.sec_ch_ua = self.sec_ch_ua.trim().to_string();
        self.sec_ch_ua_mobile = self.sec_ch_ua_mobile.trim().to_string();
        self.sec_ch_ua_platform = self.sec_ch_ua_platform.trim().to_string();
        self.sec_fetch_dest = self.sec_fetch_dest.trim().to_string();
        self.sec_fetch_mode = self.sec_fetch_mode.trim().to_string();
        self.sec_fetch_site = self.sec_fetch_site.trim().to_string();
        self.account_id = self.account_id.trim().to_string();
        self.client_version = self.client_version.trim().to_string();
        self.priority = self.priority.trim().to_string();
        self.log_path = self.log_path.trim().to_string();
        self.anytype_base_url = self.anytype_base_url.trim().to_string();
        self.anytype_version = self.anytype_version.trim().to_string();
        self.anytype_space_id = self.anytype_space_id.trim().to_string();
        self.anytype_type_key = self.anytype_type_key.trim().to_string();
        self.anytype_token = self.anytype_token.trim().to_string();
        self.notion_base_url = self.notion_base_url.trim().to_string();
        self.notion_version = self.notion_version.trim().to_string();
        self.notion_token = self.notion_token.trim().to_string();
        self.notion_parent_type = normalize_parent_type(&self.notion_parent_type);
        self.notion_parent_id = self.notion_parent_id.trim().to_string();
        self.notion_title_property = self.notion_title_property.trim().to_string();
    }

    /// True if any always-encrypted field carries a value.
    #[must_use]
    pub fn has_sensitive_values(&self) -> bool {
        !self.token.trim().is_empty()
            || !self.cookie.trim().is_empty()
            || !self.anytype_token.trim().is_empty()
            || !self.notion_token.trim().is_empty()
    }

    /// Returns a copy with every sensitive field blanked.
    #[must_use]
    pub fn without_sensitive_values(&self) -> Self {
        let mut doc = self.clone();
        doc.token = String::new();
        doc.cookie = String::new();
        doc.anytype_token = String::new();
        doc.notion_token = String::new();
        doc
    }
}

/// A partial configuration update. Fields that are absent leave the
/// current value untouched; this is the patch half of the two update
/// semantics (the store itself always replaces the whole document).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub listen: Option<String>,
    pub timezone: Option<String>,
    pub target: Option<String>,
    pub base_url: Option<String>,
    pub order: Option<String>,
    pub page_size: Option<i64>,
    pub max_conversations: Option<i64>,
    pub initial_offset: Option<i64>,
    pub include_archived: Option<bool>,
    pub token: Option<String>,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub referer: Option<String>,
    pub cookie: Option<String>,
    pub origin: Option<String>,
    pub language: Option<String>,
    pub sec_ch_ua: Option<String>,
    pub sec_ch_ua_mobile: Option<String>,
    pub sec_ch_ua_platform: Option<String>,
    pub sec_fetch_dest: Option<String>,
    pub sec_fetch_mode: Option<String>,
    pub sec_fetch_site: Option<String>,
    pub account_id: Option<String>,
    pub client_version: Option<String>,
    pub priority: Option<String>,
    pub log_path: Option<String>,
    pub anytype_base_url: Option<String>,
    pub anytype_version: Option<String>,
    pub anytype_space_id: Option<String>,
    pub anytype_type_key: Option<String>,
    pub anytype_token: Option<String>,
    pub notion_base_url: Option<String>,
    pub notion_version: Option<String>,
    pub notion_token: Option<String>,
    pub notion_parent_type: Option<String>,
    pub notion_parent_id: Option<String>,
    pub notion_title_property: Option<String>,
}

macro_rules! patch_field {
    ($self:ident, $doc:ident, $field:ident) => {
        if let Some(value) = &$self.$field {
            $doc.$field = value.clone();
        }
    };
}

impl ConfigPatch {
    /// Merges the present fields onto `doc`. The caller is expected to run
    /// [`ConfigDocument::normalize`] afterwards.
    pub fn apply(&self, doc: &mut ConfigDocument) {
        patch_field!(self, doc, listen);
        patch_field!(self, doc, timezone);
        patch_field!(self, doc, target);
        patch_field!(self, doc, base_url);
        patch_field!(self, doc, order);
        if let Some(v) = self.page_size {
            doc.page_size = v;
        }
        if let Some(v) = self.max_conversations {
            doc.max_conversations = v;
        }
        if let Some(v) = self.initial_offset {
            doc.initial_offset = v;
        }
        if let Some(v) = self.include_archived {
            doc.include_archived = v;
        }
        patch_field!(self, doc, token);
        patch_field!(self, doc, device_id);
        patch_field!(self, doc, user_agent);
        patch_field!(self, doc, accept_language);
        patch_field!(self, doc, referer);
        patch_field!(self, doc, cookie);
        patch_field!(self, doc, origin);
        patch_field!(self, doc, language);
        patch_field!(self, doc, sec_ch_ua);
        patch_field!(self, doc, sec_ch_ua_mobile);
        patch_field!(self, doc, sec_ch_ua_platform);
        patch_field!(self, doc, sec_fetch_dest);
        patch_field!(self, doc, sec_fetch_mode);
        patch_field!(self, doc, sec_fetch_site);
        patch_field!(self, doc, account_id);
        patch_field!(self, doc, client_version);
        patch_field!(self, doc, priority);
        patch_field!(self, doc, log_path);
        patch_field!(self, doc, anytype_base_url);
        patch_field!(self, doc, anytype_version);
        patch_field!(self, doc, anytype_space_id);
        patch_field!(self, doc, anytype_type_key);
        patch_field!(self, doc, anytype_token);
        patch_field!(self, doc, notion_base_url);
        patch_field!(self, doc, notion_version);
        patch_field!(self, doc, notion_token);
        patch_field!(self, doc, notion_parent_type);
        patch_field!(self, doc, notion_parent_id);
        patch_field!(self, doc, notion_title_property);
    }
}

/// Folds a destination name onto the closed set; anything unrecognized
/// falls back to Anytype.
#[must_use]
pub fn normalize_target(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        TARGET_NOTION => TARGET_NOTION.to_string(),
        _ => TARGET_ANYTYPE.to_string(),
    }
}

/// Folds an ordering mode onto the closed set; anything unrecognized
/// falls back to `updated`.
#[must_use]
pub fn normalize_order(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        ORDER_CREATED => ORDER_CREATED.to_string(),
        _ => ORDER_UPDATED.to_string(),
    }
}

#[must_use]
pub fn ensure_base_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[must_use]
pub fn clamp_page_size(value: i64) -> i64 {
    if value <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        value.min(MAX_PAGE_SIZE)
    }
}

#[must_use]
pub fn non_negative(value: i64) -> i64 {
    value.max(0)
}

/// Notion parent types are `page` or `database`; anything else is cleared
/// so the client-side default applies.
#[must_use]
pub fn normalize_parent_type(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "page" => "page".to_string(),
        "database" => "database".to_string(),
        _ => String::new(),
    }
}
