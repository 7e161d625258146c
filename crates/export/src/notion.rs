//! Notion destination client.

use chrono_tz::Tz;
use recap_store::document::{
    ConfigDocument, DEFAULT_NOTION_BASE_URL, DEFAULT_NOTION_VERSION, NOTION_DATABASE_TITLE_PROPERTY,
    NOTION_PAGE_TITLE_PROPERTY,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::assemble::ExportConversation;
use crate::error::{ExportError, Result};
use crate::markdown::{UNTITLED_CONVERSATION, format_timestamp};

/// Notion rejects rich text runs longer than 2000 characters; chunk a
/// little below the limit the way the web clients do.
const RICH_TEXT_CHUNK_LIMIT: usize = 1800;

#[derive(Debug, Serialize)]
pub(crate) struct PageRequest {
    parent: Parent,
    properties: HashMap<String, TitleProperty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Block>,
}

#[derive(Debug, Serialize)]
struct Parent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TitleProperty {
    title: Vec<RichText>,
}

#[derive(Debug, Serialize)]
struct RichText {
    #[serde(rename = "type")]
    kind: String,
    plain_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<Annotations>,
}

#[derive(Debug, Serialize)]
struct TextContent {
    content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Annotations {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    bold: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    italic: bool,
}

#[derive(Debug, Serialize)]
struct Block {
    object: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    paragraph: Option<Paragraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading_3: Option<Paragraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bulleted_list_item: Option<Paragraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    divider: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct Paragraph {
    rich_text: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

/// Client bound to one Notion parent (page or database). Construction
/// validates credentials and resolves the defaulted fields.
#[derive(Debug)]
pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    token: String,
    parent_type: String,
    parent_id: String,
    title_property: String,
}

impl NotionClient {
    /// Builds a client from the configuration snapshot.
    ///
    /// # Errors
    /// `MissingConfig` when the API key or parent id is absent or the
    /// parent type is outside `page`/`database`.
    pub fn from_config(cfg: &ConfigDocument, http: reqwest::Client) -> Result<Self> {
        let token = cfg.notion_token.trim();
        if token.is_empty() {
            return Err(ExportError::MissingConfig("Notion API key is not configured".into()));
        }
        let parent_id = cfg.notion_parent_id.trim();
        if parent_id.is_empty() {
            return Err(ExportError::MissingConfig("Notion parent id is not configured".into()));
        }
        let parent_type = match cfg.notion_parent_type.trim().to_lowercase().as_str() {
            "" | "page" => "page",
            "database" => "database",
            other => {
                return Err(ExportError::MissingConfig(format!(
                    "unsupported Notion parent type: {other}"
                )));
            }
        };
        let title_property = {
            let configured = cfg.notion_title_property.trim();
            if configured.is_empty() {
                if parent_type == "database" {
                    NOTION_DATABASE_TITLE_PROPERTY
                } else {
                    NOTION_PAGE_TITLE_PROPERTY
                }
            } else {
                configured
            }
        };
        let base_url = {
            let trimmed = cfg.notion_base_url.trim().trim_end_matches('/');
            if trimmed.is_empty() { DEFAULT_NOTION_BASE_URL } else { trimmed }
        };
        let version = {
            let trimmed = cfg.notion_version.trim();
            if trimmed.is_empty() { DEFAULT_NOTION_VERSION } else { trimmed }
        };

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            version: version.to_string(),
            token: token.to_string(),
            parent_type: parent_type.to_string(),
            parent_id: parent_id.to_string(),
            title_property: title_property.to_string(),
        })
    }

    /// Creates one page for a conversation and returns its id.
    ///
    /// # Errors
    /// `Upstream` on non-success responses, transport and decode errors
    /// otherwise.
    pub async fn create_page(&self, conv: &ExportConversation, tz: Tz) -> Result<String> {
        let payload = self.build_page_request(conv, tz);
        let url = format!("{}/v1/pages", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .ok()
                .filter(|e| !e.message.is_empty())
                .map_or_else(|| body.trim().to_string(), |e| e.message);
            return Err(ExportError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let created: PageResponse = response.json().await?;
        Ok(created.id)
    }

    pub(crate) fn build_page_request(&self, conv: &ExportConversation, tz: Tz) -> PageRequest {
        let title = if conv.title.trim().is_empty() {
            format!("{UNTITLED_CONVERSATION} {}", conv.id)
        } else {
            conv.title.trim().to_string()
        };

        let parent = if self.parent_type == "database" {
            Parent {
                kind: "database".into(),
                database_id: Some(self.parent_id.clone()),
                page_id: None,
            }
        } else {
            Parent {
                kind: "page".into(),
                database_id: None,
                page_id: Some(self.parent_id.clone()),
            }
        };

        let mut properties = HashMap::new();
        properties.insert(
            self.title_property.clone(),
            TitleProperty {
                title: vec![plain_text(&title, None)],
            },
        );

        let mut children = Vec::with_capacity(conv.messages.len() * 2 + 4);
        for line in [
            format!("Conversation ID: {}", conv.id),
            format!("Created: {}", format_timestamp(conv.create_time, tz)),
            format!("Updated: {}", format_timestamp(conv.update_time, tz)),
        ] {
            children.push(bulleted(&line));
        }
        children.push(divider());

        for (idx, msg) in conv.messages.iter().enumerate() {
            let mut role = msg.role.to_uppercase();
            if role.is_empty() {
                role = "UNKNOWN".to_string();
            }
            let heading = format!("{}. {} · {}", idx + 1, role, format_timestamp(msg.create_time, tz));
            children.push(heading_3(&heading));

            let annotations = role_annotations(&msg.role);
            let text = msg.text.trim();
            let text = if text.is_empty() { "(empty message)" } else { text };
            children.extend(paragraph_blocks(text, annotations));
        }

        PageRequest {
            parent,
            properties,
            children,
        }
    }
}

/// Renders and uploads each conversation in order, returning the created
/// count and the new page ids.
///
/// # Errors
/// Propagates the first creation failure.
pub async fn sync_to_notion(
    client: &NotionClient,
    conversations: &[ExportConversation],
    tz: Tz,
) -> Result<(usize, Vec<String>)> {
    let mut created = 0;
    let mut page_ids = Vec::new();
    for conv in conversations {
        let page_id = client.create_page(conv, tz).await?;
        created += 1;
        info!(conversation = %conv.id, page = %page_id, "Notion page created");
        page_ids.push(page_id);
    }
    Ok((created, page_ids))
}

fn role_annotations(role: &str) -> Option<Annotations> {
    if role.eq_ignore_ascii_case("user") {
        Some(Annotations {
            bold: true,
            italic: false,
        })
    } else if role.eq_ignore_ascii_case("system") {
        Some(Annotations {
            bold: false,
            italic: true,
        })
    } else {
        None
    }
}

/// Splits text on blank lines into paragraph blocks, chunking each run to
/// stay under the rich text limit. Only the first run of a paragraph
/// carries the role annotations.
fn paragraph_blocks(text: &str, annotations: Option<Annotations>) -> Vec<Block> {
    let normalized = text.replace("\r\n", "\n");
    let segments: Vec<&str> = normalized.split("\n\n").collect();

    let mut blocks = Vec::with_capacity(segments.len());
    for segment in segments {
        let parts = chunk_text(segment, RICH_TEXT_CHUNK_LIMIT);
        let mut rich_texts = Vec::with_capacity(parts.len().max(1));
        for (idx, part) in parts.iter().enumerate() {
            let ann = if idx == 0 { annotations } else { None };
            rich_texts.push(plain_text(part, ann));
        }
        if rich_texts.is_empty() {
            rich_texts.push(plain_text("", annotations));
        }
        blocks.push(Block {
            object: "block",
            kind: "paragraph",
            paragraph: Some(Paragraph { rich_text: rich_texts }),
            heading_3: None,
            bulleted_list_item: None,
            divider: None,
        });
    }
    blocks
}

fn plain_text(content: &str, annotations: Option<Annotations>) -> RichText {
    // Notion rejects empty text runs; a single space stands in.
    let content = if content.is_empty() { " " } else { content };
    RichText {
        kind: "text".into(),
        plain_text: content.to_string(),
        text: Some(TextContent {
            content: content.to_string(),
        }),
        annotations,
    }
}

fn bulleted(content: &str) -> Block {
    Block {
        object: "block",
        kind: "bulleted_list_item",
        paragraph: None,
        heading_3: None,
        bulleted_list_item: Some(Paragraph {
            rich_text: vec![plain_text(content, None)],
        }),
        divider: None,
    }
}

fn heading_3(content: &str) -> Block {
    Block {
        object: "block",
        kind: "heading_3",
        paragraph: None,
        heading_3: Some(Paragraph {
            rich_text: vec![plain_text(content, None)],
        }),
        bulleted_list_item: None,
        divider: None,
    }
}

fn divider() -> Block {
    Block {
        object: "block",
        kind: "divider",
        paragraph: None,
        heading_3: None,
        bulleted_list_item: None,
        divider: Some(serde_json::Map::new()),
    }
}

/// Splits on character (not byte) boundaries so multi-byte text never
/// lands mid-codepoint.
fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
