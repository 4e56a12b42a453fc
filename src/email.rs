//! Inbound email record accepted by the compose endpoint

use serde::{Deserialize, Serialize};

use crate::error::ComposeError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    Text,
    #[default]
    Html,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    // Base64 encoded, only present when the caller inlined the content
    #[serde(
        rename = "contentBytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_bytes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailRecord {
    pub domain: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(rename = "bodyFormat", default)]
    pub body_format: BodyFormat,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(rename = "originalMailbox", default)]
    pub original_mailbox: Option<String>,
    #[serde(rename = "emailId", default)]
    pub email_id: Option<String>,
}

/// The view of an email the model gets to see. Inline attachment
/// content is left out, the model asks for it through a tool call.
#[derive(Serialize)]
struct EmailPromptView<'a> {
    #[serde(rename = "emailId")]
    email_id: &'a Option<String>,
    #[serde(rename = "originalMailbox")]
    original_mailbox: &'a Option<String>,
    to: &'a [String],
    cc: &'a [String],
    subject: &'a str,
    body: &'a str,
    #[serde(rename = "bodyFormat")]
    body_format: BodyFormat,
    attachments: Vec<AttachmentMeta<'a>>,
}

#[derive(Serialize)]
struct AttachmentMeta<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(rename = "contentType")]
    content_type: &'a str,
    size: u64,
}

impl EmailRecord {
    /// Reject records missing the fields alerts identify an email by.
    /// Subject and recipients may be empty.
    pub fn validate(&self) -> Result<(), ComposeError> {
        let mut problems = Vec::new();
        if self.domain.trim().is_empty() {
            problems.push("domain must not be empty");
        }
        if self.sender.trim().is_empty() {
            problems.push("from must not be empty");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ComposeError::Validation(problems.join("; ")))
        }
    }

    pub fn attachment(&self, id: &str) -> Option<&AttachmentRef> {
        self.attachments.iter().find(|a| a.id == id)
    }

    /// Serialize the fields the model needs to compose a reply.
    pub fn to_prompt_json(&self) -> String {
        let view = EmailPromptView {
            email_id: &self.email_id,
            original_mailbox: &self.original_mailbox,
            to: &self.recipients,
            cc: &self.cc,
            subject: &self.subject,
            body: &self.body,
            body_format: self.body_format,
            attachments: self
                .attachments
                .iter()
                .map(|a| AttachmentMeta {
                    id: &a.id,
                    name: &a.display_name,
                    content_type: &a.content_type,
                    size: a.size_bytes,
                })
                .collect(),
        };
        serde_json::to_string(&view).unwrap_or_default()
    }
}
