//! Scripted collaborators for exercising the agent without network access

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::attachment::AttachmentFetcher;
use crate::error::UpstreamError;
use crate::notification::Notifier;
use crate::openai::{InputItem, ModelClient, ModelResponse};

pub fn message_response(id: &str, text: &str) -> ModelResponse {
    serde_json::from_value(json!({
        "id": id,
        "output": [{
            "type": "message",
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text}]
        }]
    }))
    .unwrap()
}

/// A response requesting the given `(name, arguments, call_id)` calls.
pub fn tool_call_response(id: &str, calls: &[(&str, &str, &str)]) -> ModelResponse {
    let output: Vec<Value> = calls
        .iter()
        .map(|(name, arguments, call_id)| {
            json!({
                "type": "function_call",
                "id": format!("fc_{}", call_id),
                "name": name,
                "arguments": arguments,
                "call_id": call_id,
                "status": "completed"
            })
        })
        .collect();
    serde_json::from_value(json!({"id": id, "output": output})).unwrap()
}

#[derive(Clone, Debug)]
pub struct CompleteCall {
    pub input: Vec<InputItem>,
    pub previous_response_id: Option<String>,
    pub tool_names: Vec<String>,
    pub instructions: String,
}

/// Returns the scripted responses in order. The last one is repeated
/// once the script runs out.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    failure: Option<String>,
    analysis: Option<ModelResponse>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompleteCall>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    analyses: Mutex<Vec<(String, String, Option<String>)>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_analysis(mut self, analysis: ModelResponse) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Stall every completion, for exercising deadlines.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CompleteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn analyses(&self) -> Vec<(String, String, Option<String>)> {
        self.analyses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        input: &[InputItem],
        tools: &[Value],
        previous_response_id: Option<&str>,
        instructions: &str,
    ) -> Result<ModelResponse, UpstreamError> {
        self.calls.lock().unwrap().push(CompleteCall {
            input: input.to_vec(),
            previous_response_id: previous_response_id.map(String::from),
            tool_names: tools
                .iter()
                .filter_map(|t| t["name"].as_str().map(String::from))
                .collect(),
            instructions: instructions.to_string(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(UpstreamError::Permanent {
                endpoint: String::from("/v1/responses"),
                message: message.clone(),
            });
        }
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        next.ok_or_else(|| UpstreamError::Permanent {
            endpoint: String::from("/v1/responses"),
            message: String::from("script exhausted"),
        })
    }

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, UpstreamError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((filename.to_string(), bytes));
        Ok(format!("file-{}", uploads.len()))
    }

    async fn analyze_document(
        &self,
        file_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<ModelResponse, UpstreamError> {
        self.analyses.lock().unwrap().push((
            file_id.to_string(),
            prompt.to_string(),
            system_prompt.map(String::from),
        ));
        self.analysis.clone().ok_or_else(|| UpstreamError::Permanent {
            endpoint: String::from("/v1/responses"),
            message: String::from("no analysis scripted"),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_alert(&self, subject: &str, message: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), message.to_string()));
    }
}

/// Serves attachments from memory, optionally slowing some of them down.
#[derive(Default)]
pub struct StaticFetcher {
    content: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, String, Option<String>)>>,
}

impl StaticFetcher {
    pub fn with_attachment(mut self, attachment_id: &str, bytes: &[u8]) -> Self {
        self.content.insert(attachment_id.to_string(), bytes.to_vec());
        self
    }

    pub fn with_delay(mut self, attachment_id: &str, delay: Duration) -> Self {
        self.delays.insert(attachment_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentFetcher for StaticFetcher {
    async fn fetch(
        &self,
        email_id: &str,
        attachment_id: &str,
        mailbox: Option<&str>,
    ) -> Result<Vec<u8>, Error> {
        self.calls.lock().unwrap().push((
            email_id.to_string(),
            attachment_id.to_string(),
            mailbox.map(String::from),
        ));
        if let Some(delay) = self.delays.get(attachment_id) {
            tokio::time::sleep(*delay).await;
        }
        self.content
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| anyhow!("Attachment API returned 404 Not Found"))
    }
}
