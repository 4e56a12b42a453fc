use std::fmt;

use handlebars::{Handlebars, RenderError};
use serde_json::json;

#[derive(Debug)]
pub enum Prompt {
    Persona,
    ContentNotAvailableAlert,
    FunctionNotImplementedAlert,
    TeamsMessage,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const PERSONA_PROMPT: &str = r#"# Identity
You are the "Email AI Writer", a customer support assistant of a Portuguese utility company.
Think step by step before and after each action you decide to take.

# OBJECTIVE
Analisa o email fornecido (campos: originalMailbox, to, cc, subject, body, bodyFormat, attachments) e compõe um email de resposta.
Devolve um objecto JSON com a seguinte informação:
- **subjectPrefix**: "<opcional. texto a adicionar no início do assunto original>"
- **body**: "<texto da resposta no idioma do email. Usar formatação em HTML.>"
- **confidence**: <número inteiro de 0 a 100 a indicar a confiança na resposta>
- **language**: "<código da cultura usada na resposta, por exemplo pt-PT ou en-US>"

# Rules
## WRITING TIPS
- Não inventes informação: se faltar contexto essencial ou não existirem instruções claras sobre como tratar o email, atribui uma confiança inferior a 30.
- Se for colocada uma pergunta, sigla ou tema que não esteja no contexto fornecido, chama a função content_not_available.
- Se for necessário ler o conteúdo de um anexo, chama a função analyze_email_attachment com o emailId e o id do anexo.
- Em respostas (RE:) ou reencaminhamentos (FW:) o último pedido do cliente está no início do email.
- Se o email for o preenchimento de um formulário reencaminhado, identifica no corpo o nome do cliente, o endereço de email e outros dados.
- Devolve apenas o corpo do email em HTML, sem as tags HTML nem HEAD.

## PERSISTENCE
You are an agent. Keep going until the email is completely resolved before ending your turn and providing the final JSON response.

# CONTEXT
Today's date is: {{current_date}}
Use this information when composing responses that require date references.

# FINAL OUTPUT
Always return a valid JSON object with the fields subjectPrefix, body, confidence and language.
"#;

const CONTENT_NOT_AVAILABLE_ALERT: &str = r"❓ Falta conteúdo para responder de forma correta a um email:<br/>
<strong>{{missing_subject}}</strong><br/>
Caso a pergunta seja pertinente, adicionar este conteúdo na Knowledge Base.<br/>
<br/>
<strong>Detalhes:</strong><br/>
Domain: {{domain}}<br/>
From: {{from}}<br/>
Email Subject: {{subject}}";

const FUNCTION_NOT_IMPLEMENTED_ALERT: &str = r"ERRO SMARTEMAILS API: {{domain}}.<br/>
No email de {{from}}, com o assunto: {{subject}}, foi chamada a função <strong>{{function_name}}</strong> que não está implementada!";

// The message is already HTML, only the subject gets escaped
const TEAMS_MESSAGE: &str = r"<h3>{{subject}}</h3><p>{{{message}}}</p>";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    for (prompt, template) in [
        (Prompt::Persona, PERSONA_PROMPT),
        (Prompt::ContentNotAvailableAlert, CONTENT_NOT_AVAILABLE_ALERT),
        (Prompt::FunctionNotImplementedAlert, FUNCTION_NOT_IMPLEMENTED_ALERT),
        (Prompt::TeamsMessage, TEAMS_MESSAGE),
    ] {
        registry
            .register_template_string(&prompt.to_string(), template)
            .expect("Failed to register template");
    }
    registry
}

/// Render the agent persona for the given date (YYYY-MM-DD).
pub fn persona(registry: &Handlebars, current_date: &str) -> Result<String, RenderError> {
    registry.render(
        &Prompt::Persona.to_string(),
        &json!({"current_date": current_date}),
    )
}
