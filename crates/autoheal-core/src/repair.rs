//! Repair generator: defect + file text → replacement file text.
//!
//! The production implementation calls an OpenAI-compatible chat-completions
//! endpoint (Mistral's `codestral-latest` by default). Any failure is
//! returned as a [`RepairError`]; the orchestrator records the defect as
//! unfixed and does not retry within the same round.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Defect;

/// Errors produced by a repair generator.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("repair service not configured: {0}")]
    NotConfigured(String),

    #[error("repair request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("repair service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("repair service returned no content")]
    EmptyResponse,
}

/// Produces replacement content for a whole file.
#[async_trait]
pub trait RepairGenerator: Send + Sync {
    async fn repair(&self, defect: &Defect, file_content: &str) -> Result<String, RepairError>;
}

/// Settings for [`ChatCompletionRepairer`]. The API key is never serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            model: "codestral-latest".to_string(),
            timeout_secs: 120,
            temperature: 0.0,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for RepairConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

const SYSTEM_PROMPT: &str = "You repair source files. Reply with the complete corrected file \
content only: no explanations, no markdown fences.";

/// User prompt for one defect.
pub fn repair_prompt(defect: &Defect, file_content: &str) -> String {
    format!(
        "Fix the {category} defect in {file} at line {line}.\n\
         Description: {description}\n\
         Hint: {hint}\n\n\
         ### ORIGINAL FILE\n{file_content}\n\n\
         ### INSTRUCTION\n\
         Correct only this defect and return the entire file.",
        category = defect.category,
        file = defect.file,
        line = defect.line,
        description = defect.description,
        hint = defect.remediation_hint,
    )
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().is_some_and(|l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Repairer backed by a chat-completions HTTP API.
pub struct ChatCompletionRepairer {
    config: RepairConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl ChatCompletionRepairer {
    pub fn new(config: RepairConfig) -> Result<Self, RepairError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RepairError::NotConfigured("API key is missing".to_string()))?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("autoheal/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl RepairGenerator for ChatCompletionRepairer {
    async fn repair(&self, defect: &Defect, file_content: &str) -> Result<String, RepairError> {
        let prompt = repair_prompt(defect, file_content);
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepairError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| strip_code_fences(&c))
            .unwrap_or_default();
        if content.is_empty() {
            return Err(RepairError::EmptyResponse);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DefectCategory;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fences("```\nx = 1\ny = 2\n```\n"), "x = 1\ny = 2");
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
    }

    #[test]
    fn test_prompt_names_defect() {
        let defect = Defect::new(
            "calc.py",
            3,
            DefectCategory::Import,
            "ImportError: No module named 'foo'",
            "Install 'foo' or remove the import",
        );
        let prompt = repair_prompt(&defect, "import foo\n");
        assert!(prompt.contains("IMPORT defect in calc.py at line 3"));
        assert!(prompt.contains("import foo"));
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = ChatCompletionRepairer::new(RepairConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, RepairError::NotConfigured(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = RepairConfig {
            api_key: Some("sk-secret".to_string()),
            ..RepairConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
