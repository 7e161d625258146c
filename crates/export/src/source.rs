//! Client for the source platform's conversation API.

use recap_store::document::ConfigDocument;
use reqwest::{RequestBuilder, Response, Url};
use serde_json::json;
use tracing::debug;

use crate::convo::{ConversationDetail, ConversationPage};
use crate::error::{ExportError, Result};

/// Upper bound on the error-body excerpt carried in upstream errors.
const ERROR_BODY_LIMIT: usize = 1024;

/// Thin client over the source platform. Stateless apart from the shared
/// HTTP connection pool; credentials and headers come from the document
/// snapshot passed per call, so a configuration change is picked up by the
/// very next request.
#[derive(Debug, Clone)]
pub struct SourceClient {
    http: reqwest::Client,
}

impl SourceClient {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetches one page of the conversation listing.
    ///
    /// # Errors
    /// `MissingConfig` without a bearer token, `Upstream` on non-success
    /// responses, transport/decode errors otherwise.
    pub async fn fetch_page(
        &self,
        cfg: &ConfigDocument,
        offset: i64,
        limit: i64,
    ) -> Result<ConversationPage> {
        let token = require_token(cfg)?;
        let url = join_url(&cfg.base_url, &["conversations"])?;
        debug!(offset, limit, "requesting conversation page");

        let request = self
            .http
            .get(url)
            .query(&[
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
                ("order", cfg.order.clone()),
                ("is_archived", cfg.include_archived.to_string()),
                ("is_starred", "false".to_string()),
            ]);
        let response = apply_common_headers(request, cfg, &token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Fetches the full detail (message mapping) of one conversation.
    ///
    /// # Errors
    /// Same contract as [`SourceClient::fetch_page`].
    pub async fn fetch_detail(&self, cfg: &ConfigDocument, id: &str) -> Result<ConversationDetail> {
        let token = require_token(cfg)?;
        let url = join_url(&cfg.base_url, &["conversation", id])?;
        debug!(conversation = id, "requesting conversation detail");

        let response = apply_common_headers(self.http.get(url), cfg, &token)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Deletes a conversation upstream. The service models deletion as a
    /// visibility PATCH rather than an HTTP DELETE.
    ///
    /// # Errors
    /// `MissingConfig` for a blank id or token, `Upstream` on non-success
    /// responses, transport errors otherwise.
    pub async fn delete_conversation(&self, cfg: &ConfigDocument, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(ExportError::MissingConfig("conversation id is required".into()));
        }
        let token = require_token(cfg)?;
        let url = join_url(&cfg.base_url, &["conversation", id])?;

        let response = apply_common_headers(self.http.patch(url), cfg, &token)
            .json(&json!({ "is_visible": false }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn require_token(cfg: &ConfigDocument) -> Result<String> {
    let token = cfg.token.trim();
    if token.is_empty() {
        return Err(ExportError::MissingConfig(
            "source token is not configured; set it on the configuration page".into(),
        ));
    }
    Ok(token.to_string())
}

fn join_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base.trim()).map_err(|_| ExportError::Url(format!("invalid base URL: {base}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| ExportError::Url(format!("base URL cannot carry paths: {base}")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

/// Applies the operator-configured header set. Empty fields are simply
/// not sent; the service treats absence and emptiness the same way.
fn apply_common_headers(
    mut request: RequestBuilder,
    cfg: &ConfigDocument,
    token: &str,
) -> RequestBuilder {
    request = request
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "*/*")
        .header("User-Agent", &cfg.user_agent);

    let optional = [
        ("oai-device-id", &cfg.device_id),
        ("oai-language", &cfg.language),
        ("Accept-Language", &cfg.accept_language),
        ("Referer", &cfg.referer),
        ("Cookie", &cfg.cookie),
        ("Origin", &cfg.origin),
        ("sec-ch-ua", &cfg.sec_ch_ua),
        ("sec-ch-ua-mobile", &cfg.sec_ch_ua_mobile),
        ("sec-ch-ua-platform", &cfg.sec_ch_ua_platform),
        ("sec-fetch-dest", &cfg.sec_fetch_dest),
        ("sec-fetch-mode", &cfg.sec_fetch_mode),
        ("sec-fetch-site", &cfg.sec_fetch_site),
        ("chatgpt-account-id", &cfg.account_id),
        ("oai-client-version", &cfg.client_version),
        ("priority", &cfg.priority),
    ];
    for (name, value) in optional {
        if !value.is_empty() {
            request = request.header(name, value);
        }
    }
    request
}

/// Maps non-success responses to `Upstream` errors carrying the status
/// and a bounded excerpt of the body.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    Err(ExportError::Upstream {
        status: status.as_u16(),
        message,
    })
}
