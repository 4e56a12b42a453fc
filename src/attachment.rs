//! Client for the mailbox service that serves attachment content

use std::time::Duration;

use anyhow::{Error, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(
        &self,
        email_id: &str,
        attachment_id: &str,
        mailbox: Option<&str>,
    ) -> Result<Vec<u8>, Error>;
}

#[derive(Serialize)]
struct AttachmentRequest<'a> {
    #[serde(rename = "emailId")]
    email_id: &'a str,
    #[serde(rename = "attachmentId")]
    attachment_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mailbox: Option<&'a str>,
}

#[derive(Deserialize)]
struct AttachmentResponse {
    #[serde(rename = "contentBytes", default)]
    content_bytes: Option<String>,
}

pub fn decode_content_bytes(content_bytes: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(content_bytes.trim())
        .map_err(|e| anyhow!("Invalid base64 attachment content: {}", e))
}

pub struct HttpAttachmentFetcher {
    http: reqwest::Client,
    // Not configured means every fetch fails with a readable error
    api_url: Option<String>,
}

impl HttpAttachmentFetcher {
    pub fn new(api_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { http, api_url }
    }
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(
        &self,
        email_id: &str,
        attachment_id: &str,
        mailbox: Option<&str>,
    ) -> Result<Vec<u8>, Error> {
        let Some(api_url) = &self.api_url else {
            bail!("GET_ATTACHMENT_API_URL not configured");
        };

        let payload = AttachmentRequest {
            email_id,
            attachment_id,
            mailbox,
        };
        let res = self.http.post(api_url).json(&payload).send().await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            bail!("Attachment API returned {} ({})", status, text);
        }

        let body: AttachmentResponse = res.json().await?;
        match body.content_bytes.as_deref() {
            Some(content) if !content.is_empty() => {
                let bytes = decode_content_bytes(content)?;
                tracing::debug!(
                    "Fetched attachment {} of email {} ({} bytes)",
                    attachment_id,
                    email_id,
                    bytes.len()
                );
                Ok(bytes)
            }
            _ => bail!("No content bytes returned from attachment API"),
        }
    }
}
