use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::error::UpstreamError;
use crate::retry::{Backoff, with_backoff};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputFile { file_id: String },
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

// Items sent in the `input` array of the responses endpoint:
//
// {"type": "message", "role": "user", "content": "..."}
// {"type": "function_call", "name": "...", "arguments": "{...}", "call_id": "call_..."}
// {"type": "function_call_output", "call_id": "call_...", "output": "{...}"}
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: Role,
        content: MessageContent,
    },
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl InputItem {
    pub fn new(role: Role, content: &str) -> Self {
        InputItem::Message {
            role,
            content: MessageContent::Text(content.to_string()),
        }
    }
    pub fn new_tool_call_request(call: &FunctionCall) -> Self {
        InputItem::FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            call_id: call.call_id.clone(),
        }
    }
    pub fn new_tool_call_response(output: &str, call_id: &str) -> Self {
        InputItem::FunctionCallOutput {
            call_id: call_id.to_string(),
            output: output.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct Property {
    pub r#type: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct Parameters<Props: Serialize> {
    pub r#type: String,
    pub properties: Props,
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties")]
    pub additional_properties: bool,
}

#[derive(Serialize)]
pub struct Function<Props: Serialize> {
    pub name: String,
    pub description: String,
    pub parameters: Parameters<Props>,
    pub strict: bool,
}

#[derive(Serialize)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

// The responses endpoint expects function tools flattened:
// {"type": "function", "name": "...", "description": "...", "parameters": {...}}
#[derive(Serialize)]
pub struct ToolDefinition<Props: Serialize> {
    pub r#type: ToolType,
    #[serde(flatten)]
    pub function: Function<Props>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        text: String,
    },
    Refusal {
        refusal: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct OutputMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Vec<OutputContent>,
}

impl OutputMessage {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                OutputContent::OutputText { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
    pub call_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl FunctionCall {
    /// Arguments that fail to parse as a JSON object are treated as empty.
    pub fn parsed_arguments(&self) -> Value {
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(v) if v.is_object() => v,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    "Ignoring unparseable arguments for {}: {}",
                    self.name,
                    self.arguments
                );
                json!({})
            }
        }
    }
}

// Reasoning items, web search calls and anything else the backend may
// emit are ignored by the agent.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message(OutputMessage),
    FunctionCall(FunctionCall),
    #[serde(other)]
    Other,
}

const COMPLETED: &str = "completed";

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ModelResponse {
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl ModelResponse {
    pub fn completed_messages(&self) -> Vec<&OutputMessage> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message(m) if m.status.as_deref() == Some(COMPLETED) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn completed_tool_calls(&self) -> Vec<&FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall(c) if c.status.as_deref() == Some(COMPLETED) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Text of the last completed message, if any.
    pub fn final_text(&self) -> Option<String> {
        self.completed_messages().last().map(|m| m.text())
    }
}

/// Everything the agent needs from the model backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        input: &[InputItem],
        tools: &[Value],
        previous_response_id: Option<&str>,
        instructions: &str,
    ) -> Result<ModelResponse, UpstreamError>;

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, UpstreamError>;

    async fn analyze_document(
        &self,
        file_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<ModelResponse, UpstreamError>;
}

/// Models in the reasoning tier reject `temperature` and accept the
/// cheaper `flex` service tier.
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with('o') || model.starts_with("gpt-5")
}

/// Remove null fields recursively. The backend rejects explicit nulls
/// for optional fields.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

fn text_format(output_format: &str) -> Value {
    match output_format {
        "json" | "json_object" => json!({"type": "json_object"}),
        "" | "text" => json!({"type": "text"}),
        other => json!({"type": other}),
    }
}

const DEFAULT_ANALYSIS_INSTRUCTIONS: &str =
    "You are a helpful assistant that analyzes documents.";

pub struct OpenAiClient {
    http: reqwest::Client,
    api_hostname: String,
    api_key: String,
    model: String,
    reasoning_level: String,
    output_format: String,
    document_model: String,
    max_output_tokens: u32,
    backoff: Backoff,
}

impl OpenAiClient {
    pub fn new(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60 * 5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_hostname: config.openai_api_hostname.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.default_model.clone(),
            reasoning_level: config.reasoning_level.clone(),
            output_format: config.output_format.clone(),
            document_model: config.document_model.clone(),
            max_output_tokens: config.max_output_tokens,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the request body for a conversational turn.
    pub fn completion_payload(
        &self,
        input: &[InputItem],
        tools: &[Value],
        previous_response_id: Option<&str>,
        instructions: &str,
    ) -> Value {
        let reasoning = is_reasoning_model(&self.model);
        let payload = json!({
            "model": self.model,
            "max_output_tokens": self.max_output_tokens,
            "temperature": if reasoning { Value::Null } else { json!(0) },
            "tool_choice": "auto",
            "service_tier": if reasoning { "flex" } else { "auto" },
            "stream": false,
            "reasoning": if reasoning { json!({"effort": self.reasoning_level}) } else { Value::Null },
            "previous_response_id": previous_response_id,
            "parallel_tool_calls": true,
            "instructions": instructions,
            "input": input,
            "tools": tools,
            "text": {"format": text_format(&self.output_format)},
        });
        strip_nulls(payload)
    }

    pub fn analysis_payload(
        &self,
        file_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Value {
        let input = vec![InputItem::Message {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::InputText {
                    text: prompt.to_string(),
                },
                ContentPart::InputFile {
                    file_id: file_id.to_string(),
                },
            ]),
        }];
        let instructions = system_prompt
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_ANALYSIS_INSTRUCTIONS);
        strip_nulls(json!({
            "model": self.document_model,
            "instructions": instructions,
            "input": input,
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_hostname, path)
    }

    async fn post_responses(&self, payload: &Value) -> Result<ModelResponse, UpstreamError> {
        let endpoint = "/v1/responses";
        tracing::debug!("POST {} payload: {}", endpoint, payload);
        let this = self;
        with_backoff(&self.backoff, endpoint, move || {
            this.post_json_once(endpoint, payload)
        })
        .await
    }

    async fn post_json_once<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> Result<T, UpstreamError> {
        let response = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        read_json(endpoint, response).await
    }

    async fn upload_once(
        &self,
        endpoint: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<UploadedFile, UpstreamError> {
        // Multipart forms can't be cloned so build one per attempt
        let form = Form::new()
            .text("purpose", "assistants")
            .part("file", Part::bytes(bytes.to_vec()).file_name(filename.to_string()));
        let response = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        read_json(endpoint, response).await
    }
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(
        &self,
        input: &[InputItem],
        tools: &[Value],
        previous_response_id: Option<&str>,
        instructions: &str,
    ) -> Result<ModelResponse, UpstreamError> {
        let payload = self.completion_payload(input, tools, previous_response_id, instructions);
        self.post_responses(&payload).await
    }

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, UpstreamError> {
        let endpoint = "/v1/files";
        let this = self;
        let bytes = bytes.as_slice();
        let uploaded = with_backoff(&self.backoff, endpoint, move || {
            this.upload_once(endpoint, bytes, filename)
        })
        .await?;
        tracing::debug!("Uploaded {} ({} bytes) as {}", filename, bytes.len(), uploaded.id);
        Ok(uploaded.id)
    }

    async fn analyze_document(
        &self,
        file_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<ModelResponse, UpstreamError> {
        let payload = self.analysis_payload(file_id, prompt, system_prompt);
        self.post_responses(&payload).await
    }
}

fn request_error(endpoint: &str, err: reqwest::Error) -> UpstreamError {
    let message = err.to_string();
    // A body cut off mid-read is as retryable as a dropped connection
    if err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.is_body()
        || err.is_decode()
    {
        UpstreamError::Transient {
            endpoint: endpoint.to_string(),
            message,
        }
    } else {
        UpstreamError::Permanent {
            endpoint: endpoint.to_string(),
            message,
        }
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, UpstreamError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| request_error(endpoint, e))?;
    if status.is_success() {
        return serde_json::from_str(&text).map_err(|e| UpstreamError::Permanent {
            endpoint: endpoint.to_string(),
            message: format!("Invalid response body: {}", e),
        });
    }

    let message = format!("{} ({})", status, text);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(UpstreamError::Transient {
            endpoint: endpoint.to_string(),
            message,
        })
    } else {
        Err(UpstreamError::Permanent {
            endpoint: endpoint.to_string(),
            message,
        })
    }
}
