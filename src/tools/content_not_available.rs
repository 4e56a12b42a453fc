use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ToolCall, ToolContext, string_arg};
use crate::error::ToolError;
use crate::openai::{Function, Parameters, Property, ToolDefinition, ToolType};

#[derive(Serialize)]
pub struct ContentNotAvailableProps {
    #[serde(rename = "Subject")]
    pub subject: Property,
}

/// Flags a question the knowledge base can't answer so the support
/// team can add the missing content.
pub struct ContentNotAvailableTool {
    definition: ToolDefinition<ContentNotAvailableProps>,
}

#[async_trait]
impl ToolCall for ContentNotAvailableTool {
    async fn call(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let missing_subject = string_arg(args, "Subject").unwrap_or("Unknown");
        tracing::info!("Content not available for subject: {}", missing_subject);

        ctx.alerts
            .content_not_available(ctx.email, missing_subject)
            .await;

        let result = json!({
            "success": true,
            "description": "A equipa de apoio foi avisada desta questão, à qual o assistente não conseguiu responder."
        });
        Ok(result.to_string())
    }

    fn function_name(&self) -> String {
        self.definition.function.name.clone()
    }

    fn schema(&self) -> Value {
        json!(self.definition)
    }
}

impl ContentNotAvailableTool {
    pub fn new() -> Self {
        let function = Function {
            name: String::from("content_not_available"),
            description: String::from(
                "Esta função deve ser chamada caso seja colocada uma pergunta, sigla ou tema específico que não esteja no contexto fornecido.",
            ),
            parameters: Parameters {
                r#type: String::from("object"),
                properties: ContentNotAvailableProps {
                    subject: Property {
                        r#type: String::from("string"),
                        description: String::from("O assunto sobre o qual falta informação"),
                    },
                },
                required: vec![String::from("Subject")],
                additional_properties: false,
            },
            strict: true,
        };
        Self {
            definition: ToolDefinition {
                r#type: ToolType::Function,
                function,
            },
        }
    }
}

impl Default for ContentNotAvailableTool {
    fn default() -> Self {
        Self::new()
    }
}
