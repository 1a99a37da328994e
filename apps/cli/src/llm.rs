use async_trait::async_trait;
use sublingo_core::Translator;

use crate::{
    error::{CliError, Result},
    provider::{Endpoint, Provider},
};

static TRANSLATION_PROMPT: &str = r#"
  You translate single subtitle lines for a language learner.

  RULES:
  - Translate the whole line faithfully, keep names as they are
  - Keep it about as short as the original, it has to fit on screen
  - Output ONLY the translation: no quotes, notes, or alternatives
"#;

/// Chat-completions translator for the configured provider.
///
/// The API key is looked up when the translator is built; a missing key
/// only fails the calls that actually need it.
pub struct LlmTranslator {
    provider: Provider,
    endpoint: Endpoint,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmTranslator {
    pub fn new(provider: Provider, model: Option<&str>) -> Self {
        let endpoint = provider.endpoint(model);
        tracing::debug!(provider = provider.name(), model = %endpoint.model, "translator configured");
        Self {
            provider,
            endpoint,
            api_key: provider.api_key().ok(),
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => self.provider.api_key()?,
        };

        let response = self
            .client
            .post(self.endpoint.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request_body(&self.endpoint.model, text, source_lang, target_lang))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        extract_content(&response)
    }
}

fn request_body(model: &str, text: &str, source_lang: &str, target_lang: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": TRANSLATION_PROMPT,
            },
            {
                "role": "user",
                "content": format!("Translate from {} to {}:\n{}", source_lang, target_lang, text),
            },
        ],
        "temperature": 0.2,
    })
}

/// Pull the assistant message out of a chat-completions response.
fn extract_content(response: &serde_json::Value) -> Result<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CliError::TranslationFailed {
            reason: format!("Invalid API response structure: {}", response),
        })
}

#[async_trait]
impl Translator for LlmTranslator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String> {
        Ok(self.complete(text, source_lang, target_lang).await?)
    }
}
