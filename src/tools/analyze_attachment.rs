use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ToolCall, ToolContext, string_arg};
use crate::attachment::decode_content_bytes;
use crate::error::ToolError;
use crate::openai::{Function, Parameters, Property, ToolDefinition, ToolType};

#[derive(Serialize)]
pub struct AnalyzeAttachmentProps {
    #[serde(rename = "emailId")]
    pub email_id: Property,
    #[serde(rename = "attachmentFileName")]
    pub attachment_file_name: Property,
    #[serde(rename = "attachmentId")]
    pub attachment_id: Property,
    pub prompt: Property,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Property,
}

const DEFAULT_FILE_NAME: &str = "document";

/// Reads an email attachment with a document analysis model and
/// returns what it found.
pub struct AnalyzeAttachmentTool {
    definition: ToolDefinition<AnalyzeAttachmentProps>,
}

#[async_trait]
impl ToolCall for AnalyzeAttachmentTool {
    async fn call(&self, args: &Value, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let email_id = string_arg(args, "emailId");
        let attachment_id = string_arg(args, "attachmentId");
        let prompt = string_arg(args, "prompt");
        let system_prompt = string_arg(args, "systemPrompt");

        let (Some(email_id), Some(attachment_id), Some(prompt)) = (email_id, attachment_id, prompt)
        else {
            let missing = [
                ("emailId", email_id),
                ("attachmentId", attachment_id),
                ("prompt", prompt),
            ]
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.to_string())
            .collect();
            return Err(ToolError::MissingParameter {
                tool: self.function_name(),
                missing,
            });
        };

        let attachment = ctx.email.attachment(attachment_id);
        let file_name = string_arg(args, "attachmentFileName")
            .or(attachment.map(|a| a.display_name.as_str()))
            .unwrap_or(DEFAULT_FILE_NAME);

        // Content the caller already inlined saves a round trip
        let bytes = match attachment.and_then(|a| a.content_bytes.as_deref()) {
            Some(inline) if !inline.is_empty() => decode_content_bytes(inline),
            _ => {
                ctx.fetcher
                    .fetch(email_id, attachment_id, ctx.email.original_mailbox.as_deref())
                    .await
            }
        }
        .map_err(|e| ToolError::Attachment(e.to_string()))?;
        tracing::debug!(
            "Analyzing attachment {} ({} bytes) of email {}",
            file_name,
            bytes.len(),
            email_id
        );

        let file_id = ctx.model.upload_file(bytes, file_name).await?;
        let analysis = ctx
            .model
            .analyze_document(&file_id, prompt, system_prompt)
            .await?;

        let description = analysis
            .final_text()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| String::from("Document analyzed successfully"));

        let result = json!({
            "success": true,
            "description": description,
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

impl AnalyzeAttachmentTool {
    pub fn new() -> Self {
        let string_property = |description: &str| Property {
            r#type: String::from("string"),
            description: description.to_string(),
        };
        let function = Function {
            name: String::from("analyze_email_attachment"),
            description: String::from(
                "Esta função deve ser chamada caso seja necessário analisar o conteúdo de um documento. \
                São permitidos ficheiros do tipo: Documentos: .pdf, .docx, .pptx; Texto marcado: .md, .txt, .html; \
                Dados estruturados: .csv, .xml, .json; Imagens: PNG (.png), JPEG (.jpeg, .jpg), WEBP (.webp) e GIF não animados (.gif).",
            ),
            parameters: Parameters {
                r#type: String::from("object"),
                properties: AnalyzeAttachmentProps {
                    email_id: string_property("ID do email que contém o anexo."),
                    attachment_file_name: string_property(
                        "Nome do ficheiro, incluindo a extensão. Se não estiver disponível, inventa um nome.",
                    ),
                    attachment_id: string_property("ID do anexo a ser analisado."),
                    prompt: string_property(
                        "Pergunta (prompt) a ser usada pela AI para extrair a informação necessária do documento.",
                    ),
                    system_prompt: string_property(
                        "Prompt com o contexto necessário para a AI poder analisar o documento.",
                    ),
                },
                required: vec![
                    String::from("emailId"),
                    String::from("attachmentFileName"),
                    String::from("attachmentId"),
                    String::from("prompt"),
                ],
                additional_properties: false,
            },
            // systemPrompt is optional, which strict mode doesn't allow
            strict: false,
        };
        Self {
            definition: ToolDefinition {
                r#type: ToolType::Function,
                function,
            },
        }
    }
}

impl Default for AnalyzeAttachmentTool {
    fn default() -> Self {
        Self::new()
    }
}
