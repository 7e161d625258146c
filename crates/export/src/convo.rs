//! Wire types for the source platform's conversation API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Deserializer for the service's loosely-typed timestamps: a float, an
/// integer, a numeric string, an RFC3339 string, or null/absent (0).
pub(crate) mod flex_time {
    use chrono::DateTime;
    use serde::Deserializer;
    use serde::de::{self, Visitor};

    struct FlexTimeVisitor;

    impl<'de> Visitor<'de> for FlexTimeVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a unix timestamp as number, numeric string or RFC3339 string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            #[allow(clippy::cast_precision_loss)]
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            #[allow(clippy::cast_precision_loss)]
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            if let Ok(parsed) = trimmed.parse::<f64>() {
                return Ok(parsed);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                #[allow(clippy::cast_precision_loss)]
                return Ok(parsed.timestamp_nanos_opt().unwrap_or_default() as f64 / 1e9);
            }
            Err(de::Error::custom(format!("unparsable timestamp: {trimmed}")))
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<f64, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(FlexTimeVisitor)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FlexTimeVisitor)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub items: Vec<ConversationSummary>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub create_time: f64,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub update_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub create_time: f64,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub update_time: f64,
    #[serde(default)]
    pub mapping: HashMap<String, ConversationNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author: MessageAuthor,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub create_time: f64,
    #[serde(default, deserialize_with = "flex_time::deserialize")]
    pub update_time: f64,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub end_turn: Option<bool>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAuthor {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub parts: Vec<serde_json::Value>,
    #[serde(default)]
    pub text: String,
}
