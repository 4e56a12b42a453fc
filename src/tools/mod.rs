//! Tools the model can call while composing a reply.
//!
//! The set is closed: `ToolRegistry` owns one instance of each tool and
//! resolves calls by name. Adding a tool means adding a field and a
//! match arm, nothing is registered at runtime.

use async_trait::async_trait;
use serde_json::Value;

use crate::attachment::AttachmentFetcher;
use crate::email::EmailRecord;
use crate::error::ToolError;
use crate::notification::Alerts;
use crate::openai::ModelClient;

pub mod analyze_attachment;
pub use analyze_attachment::AnalyzeAttachmentTool;

pub mod content_not_available;
pub use content_not_available::ContentNotAvailableTool;

pub mod executor;
pub use executor::ToolExecutor;

/// Collaborators available to a tool while handling one call.
pub struct ToolContext<'a> {
    pub email: &'a EmailRecord,
    pub model: &'a dyn ModelClient,
    pub fetcher: &'a dyn AttachmentFetcher,
    pub alerts: &'a Alerts,
}

#[async_trait]
pub trait ToolCall: Send + Sync {
    async fn call(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError>;
    fn function_name(&self) -> String;
    /// JSON schema declaration sent to the model
    fn schema(&self) -> Value;
}

pub struct ToolRegistry {
    content_not_available: ContentNotAvailableTool,
    analyze_attachment: AnalyzeAttachmentTool,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            content_not_available: ContentNotAvailableTool::new(),
            analyze_attachment: AnalyzeAttachmentTool::new(),
        }
    }
}

impl ToolRegistry {
    fn all(&self) -> [&dyn ToolCall; 2] {
        [&self.content_not_available, &self.analyze_attachment]
    }

    pub fn find(&self, name: &str) -> Option<&dyn ToolCall> {
        self.all()
            .into_iter()
            .find(|tool| tool.function_name() == name)
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.all().iter().map(|tool| tool.schema()).collect()
    }
}

/// Read a required string argument, treating blanks as absent.
pub(crate) fn string_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
