//! Anytype destination client.

use chrono_tz::Tz;
use recap_store::document::ConfigDocument;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assemble::ExportConversation;
use crate::error::{ExportError, Result};
use crate::markdown::{UNTITLED_CONVERSATION, render_conversation_markdown};

#[derive(Debug, Serialize)]
struct CreateObjectRequest<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    body: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    type_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

/// Client bound to one Anytype space. Construction validates that every
/// required credential is present so a misconfiguration surfaces before
/// any conversation is fetched.
#[derive(Debug)]
pub struct AnytypeClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    space_id: String,
    type_key: String,
    token: String,
}

impl AnytypeClient {
    /// Builds a client from the configuration snapshot.
    ///
    /// # Errors
    /// `MissingConfig` when the API key, space id, base URL or type key is
    /// absent, `Url` when the base URL does not parse as absolute.
    pub fn from_config(cfg: &ConfigDocument, http: reqwest::Client) -> Result<Self> {
        if cfg.anytype_token.trim().is_empty() {
            return Err(ExportError::MissingConfig("Anytype API key is not configured".into()));
        }
        if cfg.anytype_space_id.trim().is_empty() {
            return Err(ExportError::MissingConfig("Anytype space id is not configured".into()));
        }
        if cfg.anytype_type_key.trim().is_empty() {
            return Err(ExportError::MissingConfig("Anytype type key is not configured".into()));
        }
        let base = cfg.anytype_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ExportError::MissingConfig("Anytype base URL is not configured".into()));
        }
        if Url::parse(base).is_err() {
            return Err(ExportError::Url(format!("Anytype base URL is invalid: {base}")));
        }

        Ok(Self {
            http,
            base_url: base.to_string(),
            version: cfg.anytype_version.trim().to_string(),
            space_id: cfg.anytype_space_id.trim().to_string(),
            type_key: cfg.anytype_type_key.trim().to_string(),
            token: cfg.anytype_token.trim().to_string(),
        })
    }

    /// Creates one object for a conversation and returns its id.
    ///
    /// # Errors
    /// `Upstream` when the API answers anything but 201, transport and
    /// decode errors otherwise.
    pub async fn create_object(&self, conv: &ExportConversation, body: &str) -> Result<String> {
        let name = if conv.title.trim().is_empty() {
            format!("{UNTITLED_CONVERSATION} {}", conv.id)
        } else {
            conv.title.trim().to_string()
        };
        let payload = CreateObjectRequest {
            body,
            name: &name,
            type_key: &self.type_key,
        };

        let url = format!(
            "{}/v1/spaces/{}/objects",
            self.base_url,
            urlencode_path_segment(&self.space_id)
        );
        let mut request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&payload);
        if !self.version.is_empty() {
            request = request.header("Anytype-Version", &self.version);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
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

        let created: ObjectResponse = response.json().await?;
        Ok(created.id)
    }
}

/// Renders and uploads each conversation in order, returning how many
/// objects were created. Stops at the first failure so the caller can
/// report exactly how far the sync got.
///
/// # Errors
/// Propagates the first creation failure.
pub async fn sync_to_anytype(
    client: &AnytypeClient,
    conversations: &[ExportConversation],
    tz: Tz,
) -> Result<usize> {
    let mut created = 0;
    for conv in conversations {
        let body = render_conversation_markdown(conv, tz);
        let object_id = client.create_object(conv, &body).await?;
        created += 1;
        info!(conversation = %conv.id, object = %object_id, "Anytype object created");
    }
    Ok(created)
}

fn urlencode_path_segment(segment: &str) -> String {
    let mut url = Url::parse("http://localhost/").expect("static URL parses");
    url.path_segments_mut()
        .expect("URL accepts path segments")
        .push(segment);
    url.path()[1..].to_string()
}
