use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Value, json};

use super::{ToolContext, ToolRegistry};
use crate::attachment::AttachmentFetcher;
use crate::email::EmailRecord;
use crate::notification::Alerts;
use crate::openai::{FunctionCall, InputItem, ModelClient};

/// Runs the tool calls requested by the model. Never fails: handler
/// errors become `{"error": ...}` outputs so the model can react.
pub struct ToolExecutor {
    registry: ToolRegistry,
    model: Arc<dyn ModelClient>,
    fetcher: Arc<dyn AttachmentFetcher>,
    alerts: Alerts,
}

impl ToolExecutor {
    pub fn new(
        model: Arc<dyn ModelClient>,
        fetcher: Arc<dyn AttachmentFetcher>,
        alerts: Alerts,
    ) -> Self {
        Self {
            registry: ToolRegistry::default(),
            model,
            fetcher,
            alerts,
        }
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.registry.schemas()
    }

    pub async fn execute(&self, call: &FunctionCall, email: &EmailRecord) -> String {
        tracing::debug!("\nTool call: {}\nargs: {}", call.name, call.arguments);

        let Some(tool) = self.registry.find(&call.name) else {
            tracing::warn!("Function {} not implemented", call.name);
            self.alerts.function_not_implemented(email, &call.name).await;
            return String::new();
        };

        let args = call.parsed_arguments();
        let ctx = ToolContext {
            email,
            model: self.model.as_ref(),
            fetcher: self.fetcher.as_ref(),
            alerts: &self.alerts,
        };
        match tool.call(&args, &ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", call.name, e);
                json!({"error": e.to_string()}).to_string()
            }
        }
    }

    /// Run every call concurrently and return the invocation/result
    /// pairs in the order the calls were requested.
    pub async fn execute_all(&self, calls: &[&FunctionCall], email: &EmailRecord) -> Vec<InputItem> {
        let futures = calls.iter().map(|call| self.execute(call, email));
        let outputs = join_all(futures).await;

        calls
            .iter()
            .zip(outputs)
            .flat_map(|(call, output)| {
                [
                    InputItem::new_tool_call_request(call),
                    InputItem::new_tool_call_response(&output, &call.call_id),
                ]
            })
            .collect()
    }
}
