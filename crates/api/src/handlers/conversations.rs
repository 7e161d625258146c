use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use recap_export::markdown::UNTITLED_CONVERSATION;
use recap_export::{ExportConversation, build_export_conversation, format_timestamp, sync_to_anytype, sync_to_notion};
use recap_store::document::{TARGET_ANYTYPE, TARGET_NOTION, clamp_page_size, normalize_target};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::PageKey;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationItem {
    pub id: String,
    pub title: String,
    pub create_time: String,
    pub update_time: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<ConversationItem>,
    pub total: i64,
    pub has_more: bool,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub role: String,
    pub timestamp: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub id: String,
    pub title: String,
    pub create_time: String,
    pub update_time: String,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    target: String,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub created: usize,
    pub skipped: Vec<String>,
    pub target: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: Vec<String>,
    pub count: usize,
}

fn wants_refresh(value: Option<&str>) -> bool {
    value == Some("1")
}

/// `GET /api/conversations?offset&limit&refresh=1`
///
/// # Errors
/// 400 without a source token, 502 when the upstream fetch fails.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let cfg = state.coordinator.document();
    let force = wants_refresh(query.refresh.as_deref());
    let offset = query.offset.unwrap_or(0).max(0);
    let limit = clamp_page_size(query.limit.unwrap_or(cfg.page_size));
    let key = PageKey { offset, limit };

    let page = match state.cache.get_page(key, force) {
        Some(page) => page,
        None => {
            let fetched = state.source.fetch_page(&cfg, offset, limit).await?;
            state.cache.put_page(key, fetched.clone());
            fetched
        }
    };

    let tz = state.coordinator.timezone();
    let items = page
        .items
        .iter()
        .map(|meta| ConversationItem {
            id: meta.id.clone(),
            title: if meta.title.trim().is_empty() {
                UNTITLED_CONVERSATION.to_string()
            } else {
                meta.title.clone()
            },
            create_time: format_timestamp(meta.create_time, tz),
            update_time: format_timestamp(meta.update_time, tz),
        })
        .collect();

    Ok(Json(ListResponse {
        items,
        total: page.total,
        has_more: page.has_more,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// `GET /api/conversations/{id}?refresh=1`
///
/// # Errors
/// 400 for a blank id or missing token, 502 on upstream failure.
pub async fn conversation_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> ApiResult<Json<DetailResponse>> {
    let force = wants_refresh(query.refresh.as_deref());
    let conv = load_export_conversation(&state, &id, force).await?;

    let tz = state.coordinator.timezone();
    let messages = conv
        .messages
        .iter()
        .map(|msg| MessageView {
            role: msg.role.clone(),
            timestamp: message_timestamp(msg.create_time, msg.update_time, tz),
            text: msg.text.clone(),
        })
        .collect();

    Ok(Json(DetailResponse {
        id: conv.id.clone(),
        title: if conv.title.trim().is_empty() {
            UNTITLED_CONVERSATION.to_string()
        } else {
            conv.title.clone()
        },
        create_time: format_timestamp(conv.create_time, tz),
        update_time: format_timestamp(conv.update_time, tz),
        messages,
    }))
}

fn message_timestamp(create_time: f64, update_time: f64, tz: chrono_tz::Tz) -> String {
    if create_time > 0.0 {
        format_timestamp(create_time, tz)
    } else if update_time > 0.0 {
        format_timestamp(update_time, tz)
    } else {
        "-".to_string()
    }
}

/// Reads a conversation through the detail cache, fetching and caching on
/// a miss. A missing title is back-filled from the listing cache when the
/// summary is still live there.
async fn load_export_conversation(
    state: &AppState,
    id: &str,
    force: bool,
) -> Result<ExportConversation, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("conversation id is required".into()));
    }

    if let Some(cached) = state.cache.get_detail(id, force) {
        return Ok(cached);
    }

    let cfg = state.coordinator.document();
    let detail = state.source.fetch_detail(&cfg, id).await?;

    // The detail endpoint sometimes omits the title; the listing cache
    // may still have it.
    let mut summary = if detail.title.trim().is_empty() {
        state.cache.lookup_summary(id).unwrap_or_default()
    } else {
        recap_export::ConversationSummary::default()
    };
    if summary.id.trim().is_empty() {
        summary.id = id.to_string();
    }

    let export = build_export_conversation(&summary, &detail);
    state.cache.put_detail(id, export.clone());
    Ok(export)
}

/// `POST /api/conversations/delete`
///
/// Deletes each selected conversation upstream, evicts its detail entry
/// and finally invalidates the page cache.
///
/// # Errors
/// 400 for an empty selection, 502 when an upstream delete fails.
pub async fn delete_conversations(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("select at least one conversation".into()));
    }
    let cfg = state.coordinator.document();
    if cfg.token.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "source token is not configured; set it on the configuration page".into(),
        ));
    }

    let mut seen = HashSet::new();
    let mut deleted = Vec::new();
    for raw_id in &request.ids {
        let id = raw_id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        state
            .source
            .delete_conversation(&cfg, id)
            .await
            .map_err(|err| ApiError::BadGateway(format!("deleting conversation {id} failed: {err}")))?;
        state.cache.remove_detail(id);
        deleted.push(id.to_string());
    }

    if deleted.is_empty() {
        return Err(ApiError::BadRequest("no valid conversations to delete".into()));
    }

    state.cache.invalidate_all();
    info!(count = deleted.len(), "conversations deleted");

    Ok(Json(DeleteResponse {
        count: deleted.len(),
        deleted,
    }))
}

/// `POST /api/import`
///
/// Force-fetches each selected conversation, skips the ones with no
/// exportable messages and republishes the rest to the requested (or
/// configured) destination platform.
///
/// # Errors
/// 400 for an empty or all-skipped selection or missing destination
/// credentials, 502 when fetching or publishing fails.
pub async fn import_conversations(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<Json<ImportResponse>> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("select at least one conversation".into()));
    }

    let mut seen = HashSet::new();
    let mut exports = Vec::new();
    let mut skipped = Vec::new();
    for raw_id in &request.ids {
        let id = raw_id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        let conv = load_export_conversation(&state, id, true).await?;
        if conv.messages.is_empty() {
            skipped.push(id.to_string());
            continue;
        }
        exports.push(conv);
    }

    if exports.is_empty() {
        return Err(ApiError::BadRequest(
            "the selected conversations have no exportable messages".into(),
        ));
    }

    let cfg = state.coordinator.document();
    let target = if request.target.trim().is_empty() {
        cfg.target.clone()
    } else {
        normalize_target(&request.target)
    };
    let tz = state.coordinator.timezone();

    info!(
        selected = request.ids.len(),
        exportable = exports.len(),
        target = %target,
        "import triggered"
    );

    let (created, pages) = match target.as_str() {
        TARGET_ANYTYPE => {
            let client = state.pool.anytype(&cfg)?;
            let created = sync_to_anytype(&client, &exports, tz).await?;
            (created, Vec::new())
        }
        TARGET_NOTION => {
            let client = state.pool.notion(&cfg)?;
            let (created, pages) = sync_to_notion(&client, &exports, tz).await?;
            (created, pages)
        }
        other => {
            return Err(ApiError::BadRequest(format!("unsupported export target: {other}")));
        }
    };

    Ok(Json(ImportResponse {
        created,
        skipped,
        target,
        pages,
    }))
}
