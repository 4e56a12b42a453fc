//! Best-effort alerts to a Teams channel.
//!
//! Sending an alert never fails from the caller's point of view. Errors
//! from the identity provider or the Graph API are logged and dropped
//! so a broken notification channel can't fail a compose request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result, bail};
use async_trait::async_trait;
use handlebars::{Handlebars, html_escape};
use serde::Deserialize;
use serde_json::json;

use crate::config::TeamsConfig;
use crate::email::EmailRecord;
use crate::prompt::{Prompt, templates};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post an HTML formatted alert. Must not panic or block for long.
    async fn send_alert(&self, subject: &str, message: &str);
}

/// Used when the Teams credentials are not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, subject: &str, message: &str) {
        tracing::warn!(
            "Teams integration not configured. Alert: {} - {}",
            subject,
            message
        );
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

const LOGIN_URL: &str = "https://login.microsoftonline.com";
const GRAPH_URL: &str = "https://graph.microsoft.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

pub struct TeamsNotifier {
    http: reqwest::Client,
    config: TeamsConfig,
    login_url: String,
    graph_url: String,
    templates: Handlebars<'static>,
}

impl TeamsNotifier {
    pub fn new(config: TeamsConfig) -> Self {
        Self::with_base_urls(config, LOGIN_URL, GRAPH_URL)
    }

    pub fn with_base_urls(config: TeamsConfig, login_url: &str, graph_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            config,
            login_url: login_url.trim_end_matches('/').to_string(),
            graph_url: graph_url.trim_end_matches('/').to_string(),
            templates: templates(),
        }
    }

    /// Client credentials grant for the service principal
    async fn access_token(&self) -> Result<String, Error> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_url, self.config.tenant_id
        );
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
            ("grant_type", "client_credentials"),
        ];
        let res = self.http.post(url).form(&params).send().await?;
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Token request failed: {} ({})", status, text);
        }
        let token: TokenResponse = serde_json::from_str(&text)?;
        Ok(token.access_token)
    }

    async fn post_message(&self, subject: &str, message: &str) -> Result<(), Error> {
        let content = self.templates.render(
            &Prompt::TeamsMessage.to_string(),
            &json!({"subject": subject, "message": message}),
        )?;
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1.0/teams/{}/channels/{}/messages",
            self.graph_url, self.config.team_id, self.config.channel_id
        );
        let payload = json!({
            "body": {
                "contentType": "html",
                "content": content,
            }
        });
        let res = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            bail!("Posting channel message failed: {} ({})", status, text);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TeamsNotifier {
    async fn send_alert(&self, subject: &str, message: &str) {
        match self.post_message(subject, message).await {
            Ok(()) => tracing::info!("Teams alert sent: {}", subject),
            Err(e) => tracing::error!("Failed to send Teams alert {}: {}", subject, e),
        }
    }
}

/// Formats the domain specific alerts and hands them to a `Notifier`.
#[derive(Clone)]
pub struct Alerts {
    notifier: Arc<dyn Notifier>,
    templates: Arc<Handlebars<'static>>,
}

impl Alerts {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            templates: Arc::new(templates()),
        }
    }

    fn render(&self, prompt: Prompt, data: serde_json::Value) -> String {
        self.templates
            .render(&prompt.to_string(), &data)
            .unwrap_or_else(|e| {
                tracing::error!("Rendering alert {} failed: {}", prompt, e);
                data.to_string()
            })
    }

    pub async fn content_not_available(&self, email: &EmailRecord, missing_subject: &str) {
        let message = self.render(
            Prompt::ContentNotAvailableAlert,
            json!({
                "missing_subject": missing_subject,
                "domain": email.domain,
                "from": email.sender,
                "subject": email.subject,
            }),
        );
        self.notifier
            .send_alert("SmartEmails - Content Not Available", &message)
            .await;
    }

    pub async fn function_not_implemented(&self, email: &EmailRecord, function_name: &str) {
        let message = self.render(
            Prompt::FunctionNotImplementedAlert,
            json!({
                "domain": email.domain,
                "from": email.sender,
                "subject": email.subject,
                "function_name": function_name,
            }),
        );
        self.notifier
            .send_alert("SmartEmails - Function Not Implemented", &message)
            .await;
    }

    pub async fn error(&self, email: &EmailRecord, details: &str) {
        let message = format!(
            "Detalhes do erro: {}<br/>Domain: {}<br/>From: {}<br/>Email Subject: {}",
            html_escape(details),
            html_escape(&email.domain),
            html_escape(&email.sender),
            html_escape(&email.subject),
        );
        self.notifier
            .send_alert("SmartEmails API Error", &message)
            .await;
    }
}
