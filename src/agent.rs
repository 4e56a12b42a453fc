//! The reply composition loop.
//!
//! Each round sends the conversation to the model. A completed message
//! ends the loop, tool calls are executed and their results sent back
//! in the next round. The conversation is kept as two sequences: the
//! fixed prefix (persona and email) and the tool exchange of the latest
//! round. Earlier rounds are only reachable through the continuation id.

use std::sync::Arc;
use std::time::Duration;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachment::{AttachmentFetcher, HttpAttachmentFetcher};
use crate::config::AppConfig;
use crate::email::EmailRecord;
use crate::error::ComposeError;
use crate::notification::{Alerts, LogNotifier, Notifier, TeamsNotifier};
use crate::openai::{InputItem, ModelClient, OpenAiClient, Role};
use crate::prompt::{persona, templates};
use crate::tools::ToolExecutor;

pub const MAX_ROUNDS: usize = 10;

const DEFAULT_LANGUAGE: &str = "pt-PT";
const DEFAULT_CONFIDENCE: u8 = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyResult {
    #[serde(rename = "subjectPrefix")]
    pub subject_prefix: String,
    pub body: String,
    pub confidence: u8,
    pub language: String,
}

// What the model is asked to return. Every field is optional here so a
// partially valid answer still yields a reply.
#[derive(Deserialize)]
struct RawReply {
    #[serde(rename = "subjectPrefix")]
    subject_prefix: Option<String>,
    body: Option<String>,
    confidence: Option<Value>,
    language: Option<String>,
}

fn parse_confidence(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok()?,
        _ => return None,
    };
    Some(n.round().clamp(0.0, 100.0) as u8)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

impl ReplyResult {
    /// Reply used when the model's answer isn't the expected JSON.
    pub fn fallback(text: &str) -> Self {
        Self {
            subject_prefix: String::new(),
            body: text.to_string(),
            confidence: DEFAULT_CONFIDENCE,
            language: String::from(DEFAULT_LANGUAGE),
        }
    }

    /// Parse the final message of the model. Never fails, malformed
    /// output degrades to `ReplyResult::fallback`.
    pub fn from_model_text(text: &str) -> Self {
        let raw = match serde_json::from_str::<RawReply>(strip_code_fence(text)) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Final message is not valid reply JSON: {}", e);
                return Self::fallback(text);
            }
        };
        let Some(body) = raw.body.filter(|b| !b.trim().is_empty()) else {
            tracing::warn!("Final message has no body");
            return Self::fallback(text);
        };
        Self {
            subject_prefix: raw.subject_prefix.unwrap_or_default(),
            body,
            confidence: raw
                .confidence
                .as_ref()
                .and_then(parse_confidence)
                .unwrap_or(DEFAULT_CONFIDENCE),
            language: raw
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| String::from(DEFAULT_LANGUAGE)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    prefix: Vec<InputItem>,
    tool_exchange: Vec<InputItem>,
}

impl Conversation {
    pub fn seed(persona: &str, email: &EmailRecord) -> Self {
        let user_turn = format!(
            "Analisa e processa o seguinte email:\n{}",
            email.to_prompt_json()
        );
        Self {
            prefix: vec![
                InputItem::new(Role::System, persona),
                InputItem::new(Role::User, &user_turn),
            ],
            tool_exchange: Vec::new(),
        }
    }

    /// Everything sent to the model this round, in order.
    pub fn input(&self) -> Vec<InputItem> {
        self.prefix
            .iter()
            .chain(self.tool_exchange.iter())
            .cloned()
            .collect()
    }

    pub fn replace_tool_exchange(&mut self, items: Vec<InputItem>) {
        self.tool_exchange = items;
    }
}

pub struct ComposeAgent {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    alerts: Alerts,
    templates: Handlebars<'static>,
    max_rounds: usize,
    // Upper bound on one run, None means unbounded
    deadline: Option<Duration>,
}

impl ComposeAgent {
    pub fn new(
        model: Arc<dyn ModelClient>,
        fetcher: Arc<dyn AttachmentFetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let alerts = Alerts::new(notifier);
        Self {
            executor: ToolExecutor::new(model.clone(), fetcher, alerts.clone()),
            model,
            alerts,
            templates: templates(),
            max_rounds: MAX_ROUNDS,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Wire up the real collaborators from the configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.teams {
            Some(teams) => Arc::new(TeamsNotifier::new(teams.clone())),
            None => {
                tracing::warn!("Teams integration not configured - missing Azure credentials");
                Arc::new(LogNotifier)
            }
        };
        Self::new(
            Arc::new(OpenAiClient::new(config)),
            Arc::new(HttpAttachmentFetcher::new(config.attachment_api_url.clone())),
            notifier,
        )
        .with_deadline(config.request_timeout)
    }

    /// Compose a reply for `email`. Failures are reported to the
    /// notification channel once before being returned.
    pub async fn run(&self, email: &EmailRecord) -> Result<ReplyResult, ComposeError> {
        let outcome = match self.deadline {
            // Timing out drops the run along with any in-flight model call
            Some(limit) => tokio::time::timeout(limit, self.run_rounds(email))
                .await
                .unwrap_or_else(|_| {
                    Err(ComposeError::Upstream(format!(
                        "Composing reply timed out after {}s",
                        limit.as_secs_f32()
                    )))
                }),
            None => self.run_rounds(email).await,
        };
        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::error!("Composing reply for {} failed: {}", email.sender, e);
                self.alerts.error(email, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_rounds(&self, email: &EmailRecord) -> Result<ReplyResult, ComposeError> {
        let current_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let instructions = persona(&self.templates, &current_date)
            .map_err(|e| ComposeError::Generation(format!("Rendering persona failed: {}", e)))?;
        let tools = self.executor.schemas();

        let mut conversation = Conversation::seed(&instructions, email);
        let mut previous_response_id: Option<String> = None;

        for round in 1..=self.max_rounds {
            tracing::info!("Processing round {}", round);
            let response = self
                .model
                .complete(
                    &conversation.input(),
                    &tools,
                    previous_response_id.as_deref(),
                    &instructions,
                )
                .await?;
            tracing::debug!("Model response id: {}", response.id);
            previous_response_id = Some(response.id.clone());

            if let Some(text) = response.final_text().filter(|t| !t.trim().is_empty()) {
                let reply = ReplyResult::from_model_text(&text);
                tracing::info!(
                    "Reply composed in {} round(s), confidence {}",
                    round,
                    reply.confidence
                );
                return Ok(reply);
            }

            let calls = response.completed_tool_calls();
            if calls.is_empty() {
                return Err(ComposeError::Generation(String::from(
                    "Model returned neither a message nor a tool call",
                )));
            }

            tracing::info!("Processing {} function call(s)", calls.len());
            let exchange = self.executor.execute_all(&calls, email).await;
            conversation.replace_tool_exchange(exchange);
        }

        Err(ComposeError::Generation(format!(
            "Failed to get response from AI after {} rounds",
            self.max_rounds
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::email::tests::sample_email;
    use crate::testing::{
        RecordingNotifier, ScriptedModel, StaticFetcher, message_response, tool_call_response,
    };

    fn agent(model: ScriptedModel) -> (ComposeAgent, Arc<ScriptedModel>, Arc<RecordingNotifier>) {
        let model = Arc::new(model);
        let notifier = Arc::new(RecordingNotifier::default());
        let agent = ComposeAgent::new(
            model.clone(),
            Arc::new(StaticFetcher::default()),
            notifier.clone(),
        );
        (agent, model, notifier)
    }

    const REPLY: &str = r#"{"subjectPrefix": "RE: ", "body": "<p>Bom dia,</p><p>Segue a fatura.</p>", "confidence": 87, "language": "pt-PT"}"#;

    #[tokio::test]
    async fn it_returns_the_first_final_message() {
        let (agent, model, notifier) = agent(ScriptedModel::new(vec![message_response(
            "resp_1", REPLY,
        )]));

        let reply = agent.run(&sample_email()).await.unwrap();

        assert_eq!(
            reply,
            ReplyResult {
                subject_prefix: String::from("RE: "),
                body: String::from("<p>Bom dia,</p><p>Segue a fatura.</p>"),
                confidence: 87,
                language: String::from("pt-PT"),
            }
        );
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].previous_response_id.is_none());
        assert_eq!(
            calls[0].tool_names,
            vec!["content_not_available", "analyze_email_attachment"]
        );
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test]
    async fn it_seeds_the_conversation_with_persona_and_email() {
        let (agent, model, _) = agent(ScriptedModel::new(vec![message_response("resp_1", REPLY)]));
        agent.run(&sample_email()).await.unwrap();

        let calls = model.calls();
        let input = &calls[0].input;
        assert_eq!(input.len(), 2);
        let InputItem::Message { role, content } = &input[0] else {
            panic!("expected a system message");
        };
        assert_eq!(*role, Role::System);
        let persona = json!(content).as_str().unwrap().to_string();
        assert!(persona.contains("Today's date is"));
        // The rendered persona also goes out as the request instructions
        assert_eq!(calls[0].instructions, persona);
        let InputItem::Message { role, content } = &input[1] else {
            panic!("expected a user message");
        };
        assert_eq!(*role, Role::User);
        let text = json!(content).as_str().unwrap().to_string();
        assert!(text.contains("\"emailId\":\"msg-42\""));
        assert!(text.contains("Fatura de março"));
    }

    #[tokio::test]
    async fn it_runs_tools_then_asks_again() {
        let (agent, model, notifier) = agent(ScriptedModel::new(vec![
            tool_call_response(
                "resp_1",
                &[("content_not_available", r#"{"Subject": "tarifa social"}"#, "call_1")],
            ),
            message_response("resp_2", REPLY),
        ]));

        let reply = agent.run(&sample_email()).await.unwrap();
        assert_eq!(reply.confidence, 87);

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "SmartEmails - Content Not Available");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].previous_response_id.as_deref(), Some("resp_1"));
        let input = &calls[1].input;
        assert_eq!(input.len(), 4);
        assert_eq!(input[..2], calls[0].input[..]);
        assert!(matches!(
            &input[2],
            InputItem::FunctionCall { name, call_id, .. }
                if name == "content_not_available" && call_id == "call_1"
        ));
        let InputItem::FunctionCallOutput { call_id, output } = &input[3] else {
            panic!("expected a tool result");
        };
        assert_eq!(call_id, "call_1");
        assert_eq!(serde_json::from_str::<Value>(output).unwrap()["success"], true);
    }

    #[tokio::test]
    async fn it_only_resends_the_latest_tool_exchange() {
        let (agent, model, _) = agent(ScriptedModel::new(vec![
            tool_call_response(
                "resp_1",
                &[("content_not_available", r#"{"Subject": "a"}"#, "call_1")],
            ),
            tool_call_response(
                "resp_2",
                &[
                    ("content_not_available", r#"{"Subject": "b"}"#, "call_2"),
                    ("foo", "{}", "call_3"),
                ],
            ),
            message_response("resp_3", REPLY),
        ]));

        agent.run(&sample_email()).await.unwrap();

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        let call_ids: Vec<&str> = calls[2].input[2..]
            .iter()
            .map(|item| match item {
                InputItem::FunctionCall { call_id, .. } => call_id.as_str(),
                InputItem::FunctionCallOutput { call_id, .. } => call_id.as_str(),
                InputItem::Message { .. } => "message",
            })
            .collect();
        assert_eq!(call_ids, vec!["call_2", "call_2", "call_3", "call_3"]);
        assert_eq!(calls[2].previous_response_id.as_deref(), Some("resp_2"));
        // Unknown tools degrade to an empty output
        assert_eq!(
            calls[2].input[5],
            InputItem::new_tool_call_response("", "call_3")
        );
    }

    #[tokio::test]
    async fn it_gives_up_after_max_rounds() {
        // Missing prompt: the tool errors without notifying anyone
        let (agent, model, notifier) = agent(ScriptedModel::new(vec![tool_call_response(
            "resp_n",
            &[("analyze_email_attachment", r#"{"emailId": "msg-42"}"#, "call_1")],
        )]));

        let err = agent.run(&sample_email()).await.unwrap_err();

        assert!(matches!(err, ComposeError::Generation(_)));
        assert_eq!(model.calls().len(), MAX_ROUNDS);
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "SmartEmails API Error");
    }

    #[tokio::test]
    async fn it_fails_when_the_model_returns_nothing() {
        let empty = serde_json::from_value(json!({"id": "resp_1", "output": []})).unwrap();
        let (agent, model, notifier) = agent(ScriptedModel::new(vec![empty]));

        let err = agent.run(&sample_email()).await.unwrap_err();

        assert!(matches!(err, ComposeError::Generation(_)));
        assert_eq!(model.calls().len(), 1);
        assert_eq!(notifier.alerts().len(), 1);
    }

    #[tokio::test]
    async fn it_ignores_incomplete_output() {
        let incomplete = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {"type": "message", "status": "incomplete", "content": [{"type": "output_text", "text": REPLY}]},
                {"type": "function_call", "status": "in_progress", "name": "content_not_available", "arguments": "{}", "call_id": "call_1"}
            ]
        }))
        .unwrap();
        let (agent, _, _) = agent(ScriptedModel::new(vec![incomplete]));

        let err = agent.run(&sample_email()).await.unwrap_err();
        assert!(matches!(err, ComposeError::Generation(_)));
    }

    #[tokio::test]
    async fn it_reports_upstream_failures() {
        let (agent, _, notifier) = agent(ScriptedModel::failing("400 Bad Request"));

        let err = agent.run(&sample_email()).await.unwrap_err();

        assert!(matches!(err, ComposeError::Upstream(_)));
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].1.contains("400 Bad Request"));
    }

    #[tokio::test]
    async fn it_abandons_runs_past_the_deadline() {
        let model = ScriptedModel::new(vec![message_response("resp_1", REPLY)])
            .with_delay(Duration::from_secs(5));
        let (agent, _, notifier) = agent(model);
        let agent = agent.with_deadline(Duration::from_millis(20));

        let err = agent.run(&sample_email()).await.unwrap_err();

        assert!(matches!(err, ComposeError::Upstream(_)));
        assert!(err.to_string().contains("timed out"));
        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "SmartEmails API Error");
    }

    #[tokio::test]
    async fn it_degrades_malformed_replies() {
        let (agent, _, notifier) = agent(ScriptedModel::new(vec![message_response(
            "resp_1",
            "Olá! Obrigado pelo contacto.",
        )]));

        let reply = agent.run(&sample_email()).await.unwrap();

        assert_eq!(reply, ReplyResult::fallback("Olá! Obrigado pelo contacto."));
        assert_eq!(reply.confidence, 50);
        assert_eq!(reply.language, "pt-PT");
        assert!(notifier.alerts().is_empty());
    }

    #[test]
    fn it_normalizes_reply_fields() {
        let reply = ReplyResult::from_model_text(
            "```json\n{\"body\": \"<p>Olá</p>\", \"confidence\": 140.2, \"subjectPrefix\": null}\n```",
        );
        assert_eq!(reply.body, "<p>Olá</p>");
        assert_eq!(reply.confidence, 100);
        assert_eq!(reply.subject_prefix, "");
        assert_eq!(reply.language, "pt-PT");

        let reply = ReplyResult::from_model_text(r#"{"body": "x", "confidence": "35", "language": "en-US"}"#);
        assert_eq!(reply.confidence, 35);
        assert_eq!(reply.language, "en-US");

        let reply = ReplyResult::from_model_text(r#"{"body": "x", "confidence": -4}"#);
        assert_eq!(reply.confidence, 0);
    }

    #[test]
    fn it_falls_back_when_body_is_missing() {
        let text = r#"{"confidence": 90}"#;
        assert_eq!(ReplyResult::from_model_text(text), ReplyResult::fallback(text));
    }
}
