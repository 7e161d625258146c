//! Turns a raw conversation detail into the flat export model.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::convo::{ChatMessage, ConversationDetail, ConversationSummary, MessageContent};

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLink {
    pub title: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ExportMessage {
    pub role: String,
    pub create_time: f64,
    pub update_time: f64,
    pub text: String,
    pub references: Vec<ReferenceLink>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportConversation {
    pub id: String,
    pub title: String,
    pub create_time: f64,
    pub update_time: f64,
    pub messages: Vec<ExportMessage>,
}

/// Flattens the node mapping of a conversation detail into a
/// chronologically sorted message list, dropping tool chatter, hidden
/// system messages and empty content along the way.
#[must_use]
pub fn build_export_conversation(
    summary: &ConversationSummary,
    detail: &ConversationDetail,
) -> ExportConversation {
    let mut export = ExportConversation {
        id: first_non_empty(&[detail.id.as_str(), summary.id.as_str()]),
        title: first_non_empty(&[detail.title.as_str(), summary.title.as_str()]),
        create_time: choose_time(&[detail.create_time, summary.create_time]),
        update_time: choose_time(&[detail.update_time, summary.update_time]),
        messages: Vec::new(),
    };

    for node in detail.mapping.values() {
        let Some(msg) = &node.message else { continue };
        let text = render_message_content(&msg.content);
        if should_skip_message(msg, &text) {
            continue;
        }
        let role = choose_role(msg);
        let normalized = normalize_content(&text);
        if normalized.is_empty() || normalized.trim() == "\"\"" {
            continue;
        }
        export.messages.push(ExportMessage {
            role,
            create_time: msg.create_time,
            update_time: msg.update_time,
            text: normalized,
            references: gather_references(&msg.metadata),
        });
    }

    export.messages.sort_by(|a, b| {
        if a.create_time == 0.0 || b.create_time == 0.0 {
            a.text.cmp(&b.text)
        } else {
            a.create_time
                .partial_cmp(&b.create_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    });

    export
}

/// Filters out messages that would add noise to an export: tool output,
/// hidden or prompt-command system messages, and assistant code blocks
/// that are really tool invocations.
fn should_skip_message(msg: &ChatMessage, rendered: &str) -> bool {
    let role = choose_role(msg).to_lowercase();
    if role == "tool" {
        return true;
    }

    #[derive(Default, Deserialize)]
    struct SkipMeta {
        #[serde(default, rename = "is_visually_hidden_from_conversation")]
        is_hidden: bool,
        #[serde(default)]
        command: String,
    }
    let meta: SkipMeta = serde_json::from_value(msg.metadata.clone()).unwrap_or_default();
    if meta.is_hidden && role == "system" {
        return true;
    }
    if role == "system" && meta.command.eq_ignore_ascii_case("prompt") {
        return true;
    }

    if msg.content.content_type == "code" && role == "assistant" {
        if !msg.recipient.is_empty() && !msg.recipient.eq_ignore_ascii_case("all") {
            return true;
        }
        let lower = rendered.trim().to_lowercase();
        if lower.starts_with("search(") || lower.contains(" search(") {
            return true;
        }
        if msg
            .metadata
            .as_object()
            .is_some_and(|m| m.contains_key("sonic_classification_result"))
        {
            return true;
        }
    }

    false
}

/// Joins the `text` field and all string-ish `parts` into plain text.
#[must_use]
pub fn render_message_content(content: &MessageContent) -> String {
    let mut segments: Vec<String> = Vec::new();

    let trimmed = content.text.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }

    for part in &content.parts {
        match part {
            Value::String(s) => {
                let s = s.trim();
                if !s.is_empty() {
                    segments.push(s.to_string());
                }
            }
            Value::Object(map) => {
                if let Some(Value::String(text)) = map.get("text") {
                    let text = text.trim();
                    if !text.is_empty() {
                        segments.push(text.to_string());
                        continue;
                    }
                }
                let raw = part.to_string();
                if raw != "null" && !raw.trim().is_empty() {
                    segments.push(raw);
                }
            }
            Value::Null => {}
            other => {
                let raw = other.to_string();
                if !raw.trim().is_empty() {
                    segments.push(raw);
                }
            }
        }
    }

    segments.join("\n\n").trim().to_string()
}

fn choose_role(msg: &ChatMessage) -> String {
    if !msg.author.role.is_empty() {
        msg.author.role.clone()
    } else if !msg.role.is_empty() {
        msg.role.clone()
    } else {
        "unknown".to_string()
    }
}

/// Strips zero-width and byte-order-mark characters and trims whitespace.
#[must_use]
pub fn normalize_content(input: &str) -> String {
    input
        .trim()
        .replace(['\u{200B}', '\u{FEFF}'], "")
        .trim()
        .to_string()
}

#[derive(Default, Deserialize)]
struct MessageMetadata {
    #[serde(default)]
    content_references: Vec<ContentReference>,
    #[serde(default)]
    search_result_groups: Vec<SearchResultGroup>,
    #[serde(default)]
    citations: Vec<CitationRef>,
}

#[derive(Default, Deserialize)]
struct ContentReference {
    #[serde(default)]
    safe_urls: Vec<String>,
    #[serde(default)]
    items: Vec<ContentEntry>,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Default, Deserialize)]
struct ContentEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    attribution: String,
}

#[derive(Default, Deserialize)]
struct SearchResultGroup {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

#[derive(Default, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    attribution: String,
}

#[derive(Default, Deserialize)]
struct CitationRef {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    attribution: String,
}

/// Collects reference links (web citations, search results, safe URLs)
/// from message metadata, deduplicated by URL and sorted by source then
/// title.
#[must_use]
pub fn gather_references(metadata: &Value) -> Vec<ReferenceLink> {
    if metadata.is_null() {
        return Vec::new();
    }
    let Ok(meta) = serde_json::from_value::<MessageMetadata>(metadata.clone()) else {
        return Vec::new();
    };

    let mut seen: BTreeMap<String, ReferenceLink> = BTreeMap::new();
    let mut add = |url: &str, title: &str, source: &str| {
        let url = url.trim();
        if url.is_empty() || seen.contains_key(url) {
            return;
        }
        let mut title = title.trim().to_string();
        if title.is_empty() {
            title = fallback_title(url);
        }
        let mut source = source.trim().to_string();
        if source.is_empty() {
            source = host_from_url(url);
        }
        seen.insert(
            url.to_string(),
            ReferenceLink {
                title,
                url: url.to_string(),
                source,
            },
        );
    };

    for reference in &meta.content_references {
        for item in &reference.items {
            add(&item.url, &item.title, &item.attribution);
        }
        for url in &reference.safe_urls {
            add(url, "", &reference.kind);
        }
    }
    for group in &meta.search_result_groups {
        for entry in &group.entries {
            let source = if entry.attribution.is_empty() {
                &group.domain
            } else {
                &entry.attribution
            };
            add(&entry.url, &entry.title, source);
        }
    }
    for citation in &meta.citations {
        add(&citation.url, &citation.title, &citation.attribution);
    }

    let mut refs: Vec<ReferenceLink> = seen.into_values().collect();
    refs.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.title.cmp(&b.title)));
    refs
}

fn fallback_title(url: &str) -> String {
    let host = host_from_url(url);
    if host.is_empty() { url.to_string() } else { host }
}

fn host_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_default()
}

#[must_use]
pub fn first_non_empty(values: &[&str]) -> String {
    values
        .iter()
        .find(|v| !v.trim().is_empty())
        .map_or_else(String::new, ToString::to_string)
}

#[must_use]
pub fn choose_time(values: &[f64]) -> f64 {
    values.iter().copied().find(|v| *v > 0.0).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convo::{ConversationNode, MessageAuthor};
    use serde_json::json;

    fn message(role: &str, text: &str, create_time: f64) -> ChatMessage {
        ChatMessage {
            author: MessageAuthor {
                role: role.to_string(),
                name: String::new(),
            },
            create_time,
            content: MessageContent {
                content_type: "text".to_string(),
                parts: vec![json!(text)],
                text: String::new(),
            },
            metadata: Value::Null,
            ..ChatMessage::default()
        }
    }

    fn detail_with(messages: Vec<ChatMessage>) -> ConversationDetail {
        let mut detail = ConversationDetail {
            id: "conv-1".into(),
            title: "Example".into(),
            create_time: 100.0,
            update_time: 200.0,
            ..ConversationDetail::default()
        };
        for (idx, msg) in messages.into_iter().enumerate() {
            detail.mapping.insert(
                format!("node-{idx}"),
                ConversationNode {
                    id: format!("node-{idx}"),
                    message: Some(msg),
                    parent: None,
                    children: Vec::new(),
                },
            );
        }
        detail
    }

    #[test]
    fn test_messages_sorted_chronologically() {
        let detail = detail_with(vec![
            message("assistant", "second", 20.0),
            message("user", "first", 10.0),
            message("user", "third", 30.0),
        ]);
        let export = build_export_conversation(&ConversationSummary::default(), &detail);

        let texts: Vec<_> = export.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_tool_and_hidden_messages_are_skipped() {
        let mut hidden = message("system", "internal note", 5.0);
        hidden.metadata = json!({"is_visually_hidden_from_conversation": true});
        let mut prompt = message("system", "prompt text", 6.0);
        prompt.metadata = json!({"command": "prompt"});

        let detail = detail_with(vec![
            message("tool", "tool output", 1.0),
            hidden,
            prompt,
            message("user", "real question", 10.0),
        ]);
        let export = build_export_conversation(&ConversationSummary::default(), &detail);

        assert_eq!(export.messages.len(), 1);
        assert_eq!(export.messages[0].text, "real question");
    }

    #[test]
    fn test_assistant_search_invocations_are_skipped() {
        let mut search = message("assistant", "search(\"rust aes\")", 5.0);
        search.content.content_type = "code".into();
        let mut routed = message("assistant", "print(1)", 6.0);
        routed.content.content_type = "code".into();
        routed.recipient = "python".into();
        let mut classified = message("assistant", "classified", 7.0);
        classified.content.content_type = "code".into();
        classified.metadata = json!({"sonic_classification_result": {}});

        let detail = detail_with(vec![search, routed, classified, message("assistant", "answer", 8.0)]);
        let export = build_export_conversation(&ConversationSummary::default(), &detail);

        assert_eq!(export.messages.len(), 1);
        assert_eq!(export.messages[0].text, "answer");
    }

    #[test]
    fn test_summary_fills_missing_detail_fields() {
        let mut detail = detail_with(vec![message("user", "hi", 1.0)]);
        detail.id = String::new();
        detail.title = String::new();
        detail.create_time = 0.0;

        let summary = ConversationSummary {
            id: "from-summary".into(),
            title: "Summary title".into(),
            create_time: 42.0,
            update_time: 43.0,
        };
        let export = build_export_conversation(&summary, &detail);
        assert_eq!(export.id, "from-summary");
        assert_eq!(export.title, "Summary title");
        assert!((export.create_time - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_render_message_content_joins_parts() {
        let content = MessageContent {
            content_type: "text".into(),
            text: "  lead  ".into(),
            parts: vec![json!("part one"), json!({"text": "part two"}), json!(null), json!("")],
        };
        assert_eq!(render_message_content(&content), "lead\n\npart one\n\npart two");
    }

    #[test]
    fn test_normalize_content_strips_invisible_characters() {
        assert_eq!(normalize_content("  \u{FEFF}hello\u{200B} world  "), "hello world");
        assert_eq!(normalize_content("   "), "");
    }

    #[test]
    fn test_gather_references_dedupes_and_sorts() {
        let metadata = json!({
            "content_references": [{
                "type": "webpage",
                "safe_urls": ["https://b.example.com/page"],
                "items": [
                    {"url": "https://a.example.com/doc", "title": "Alpha doc", "attribution": "a.example.com"}
                ]
            }],
            "search_result_groups": [{
                "domain": "c.example.com",
                "entries": [
                    {"url": "https://c.example.com/hit", "title": "Hit", "attribution": ""},
                    {"url": "https://a.example.com/doc", "title": "Duplicate", "attribution": "dup"}
                ]
            }],
            "citations": [
                {"url": "https://a.example.com/doc", "title": "Another duplicate", "attribution": ""}
            ]
        });

        let refs = gather_references(&metadata);
        assert_eq!(refs.len(), 3);
        // Deduped by URL: the first occurrence wins.
        let alpha = refs.iter().find(|r| r.url == "https://a.example.com/doc").unwrap();
        assert_eq!(alpha.title, "Alpha doc");
        // Missing titles and sources fall back to the host.
        let safe = refs.iter().find(|r| r.url == "https://b.example.com/page").unwrap();
        assert_eq!(safe.title, "b.example.com");
        assert_eq!(safe.source, "webpage");
        // Sorted by source.
        let sources: Vec<_> = refs.iter().map(|r| r.source.as_str()).collect();
        let mut sorted = sources.clone();
        sorted.sort_unstable();
        assert_eq!(sources, sorted);
    }

    #[test]
    fn test_gather_references_empty_metadata() {
        assert!(gather_references(&Value::Null).is_empty());
        assert!(gather_references(&json!({})).is_empty());
    }
}
