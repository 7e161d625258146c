//! Markdown rendering and timestamp formatting for exported conversations.

use chrono::TimeZone;
use chrono_tz::Tz;
use tracing::warn;

use crate::assemble::ExportConversation;

pub const UNTITLED_CONVERSATION: &str = "(untitled conversation)";
const EMPTY_MESSAGE: &str = "(empty message)";

/// Resolves an operator-supplied timezone name.
///
/// Accepts `utc`, `local` (or empty, which means local) and IANA names.
/// Unrecognized names fall back to UTC with a warning, never an error;
/// formatting should not be able to break an export.
#[must_use]
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().to_lowercase().as_str() {
        "utc" => Tz::UTC,
        "" | "local" => match iana_time_zone::get_timezone() {
            Ok(local) => local.parse().unwrap_or(Tz::UTC),
            Err(_) => Tz::UTC,
        },
        other => other.parse().unwrap_or_else(|_| {
            warn!(timezone = %name, "unrecognized timezone, falling back to UTC");
            Tz::UTC
        }),
    }
}

/// Formats a unix timestamp as `YYYY-MM-DD HH:MM:SS` in `tz`.
/// Non-positive values render as `-`.
#[must_use]
pub fn format_timestamp(value: f64, tz: Tz) -> String {
    if value <= 0.0 {
        return "-".to_string();
    }
    #[allow(clippy::cast_possible_truncation)]
    let secs = value.trunc() as i64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (value.fract() * 1e9) as u32;
    match tz.timestamp_opt(secs, nanos) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        chrono::LocalResult::None => "-".to_string(),
    }
}

/// Renders one conversation as the Markdown body used for destination
/// objects: title heading, metadata bullets, one numbered section per
/// message with user text blockquoted and gathered references listed.
#[must_use]
pub fn render_conversation_markdown(conv: &ExportConversation, tz: Tz) -> String {
    let mut out = String::new();

    let title = if conv.title.trim().is_empty() {
        UNTITLED_CONVERSATION
    } else {
        conv.title.trim()
    };
    out.push_str(&format!("# {}\n\n", escape_heading(title)));
    out.push_str(&format!("- Conversation ID: `{}`\n", conv.id));
    out.push_str(&format!("- Created: {}\n", format_timestamp(conv.create_time, tz)));
    out.push_str(&format!("- Updated: {}\n\n", format_timestamp(conv.update_time, tz)));

    for (idx, msg) in conv.messages.iter().enumerate() {
        let mut label = msg.role.to_uppercase();
        if label.is_empty() {
            label = "UNKNOWN".to_string();
        }
        out.push_str(&format!(
            "## {}. {} · {}\n\n",
            idx + 1,
            label,
            format_timestamp(msg.create_time, tz)
        ));
        out.push_str(&blockquote(&msg.role, &msg.text));
        if msg.references.is_empty() {
            out.push('\n');
        } else {
            out.push_str("References:\n");
            for reference in &msg.references {
                let title = if reference.title.trim().is_empty() {
                    reference.url.as_str()
                } else {
                    reference.title.trim()
                };
                if reference.source.trim().is_empty() {
                    out.push_str(&format!("- [{}]({})\n", title, reference.url));
                } else {
                    out.push_str(&format!(
                        "- [{}]({}) · {}\n",
                        title,
                        reference.url,
                        reference.source.trim()
                    ));
                }
            }
            out.push('\n');
        }
    }

    out
}

/// User messages render as blockquotes so the two sides of the exchange
/// stay visually distinct; everything else stays plain text.
fn blockquote(role: &str, text: &str) -> String {
    let is_user = role.eq_ignore_ascii_case("user");
    if text.is_empty() {
        return if is_user {
            format!("> {EMPTY_MESSAGE}\n")
        } else {
            format!("{EMPTY_MESSAGE}\n")
        };
    }
    if !is_user {
        return format!("{text}\n");
    }
    let quoted: Vec<String> = text
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect();
    format!("{}\n", quoted.join("\n"))
}

fn escape_heading(input: &str) -> String {
    input.trim().replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{ExportMessage, ReferenceLink};

    fn conversation() -> ExportConversation {
        ExportConversation {
            id: "conv-9".into(),
            title: "A chat\nwith newline".into(),
            create_time: 1_700_000_000.0,
            update_time: 1_700_000_100.0,
            messages: vec![
                ExportMessage {
                    role: "user".into(),
                    create_time: 1_700_000_000.0,
                    update_time: 0.0,
                    text: "line one\n\nline three".into(),
                    references: Vec::new(),
                },
                ExportMessage {
                    role: "assistant".into(),
                    create_time: 1_700_000_050.0,
                    update_time: 0.0,
                    text: "the answer".into(),
                    references: vec![ReferenceLink {
                        title: "Source".into(),
                        url: "https://example.com/a".into(),
                        source: "example.com".into(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_format_timestamp_utc() {
        assert_eq!(format_timestamp(1_700_000_000.0, Tz::UTC), "2023-11-14 22:13:20");
        assert_eq!(format_timestamp(0.0, Tz::UTC), "-");
        assert_eq!(format_timestamp(-5.0, Tz::UTC), "-");
    }

    #[test]
    fn test_resolve_timezone_names() {
        assert_eq!(resolve_timezone("utc"), Tz::UTC);
        assert_eq!(resolve_timezone(" UTC "), Tz::UTC);
        assert_eq!(resolve_timezone("Europe/Helsinki"), chrono_tz::Europe::Helsinki);
        assert_eq!(resolve_timezone("definitely/not-a-zone"), Tz::UTC);
    }

    #[test]
    fn test_timezone_shifts_rendered_time() {
        let utc = format_timestamp(1_700_000_000.0, Tz::UTC);
        let helsinki = format_timestamp(1_700_000_000.0, chrono_tz::Europe::Helsinki);
        assert_ne!(utc, helsinki);
        assert_eq!(helsinki, "2023-11-15 00:13:20");
    }

    #[test]
    fn test_render_markdown_shape() {
        let body = render_conversation_markdown(&conversation(), Tz::UTC);

        assert!(body.starts_with("# A chat with newline\n\n"));
        assert!(body.contains("- Conversation ID: `conv-9`\n"));
        assert!(body.contains("## 1. USER · 2023-11-14 22:13:20"));
        assert!(body.contains("> line one\n>\n> line three\n"));
        assert!(body.contains("## 2. ASSISTANT"));
        assert!(body.contains("the answer\n"));
        assert!(body.contains("- [Source](https://example.com/a) · example.com"));
    }

    #[test]
    fn test_render_markdown_untitled_and_empty() {
        let conv = ExportConversation {
            id: "x".into(),
            messages: vec![ExportMessage {
                role: "user".into(),
                create_time: 0.0,
                update_time: 0.0,
                text: String::new(),
                references: Vec::new(),
            }],
            ..ExportConversation::default()
        };
        let body = render_conversation_markdown(&conv, Tz::UTC);
        assert!(body.starts_with(&format!("# {UNTITLED_CONVERSATION}")));
        assert!(body.contains("> (empty message)"));
    }
}
