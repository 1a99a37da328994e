#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider_name}: set {env_var}")]
    MissingApiKey {
        provider_name: &'static str,
        env_var: &'static str,
    },
}

/// Chat-completions backends the translator can talk to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Grok,
    Openai,
    Gemini,
}

/// Where translation requests go and which model answers them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub url: &'static str,
    pub model: String,
}

impl Provider {
    fn url(self) -> &'static str {
        match self {
            Provider::Grok => "https://api.x.ai/v1/chat/completions",
            Provider::Openai => "https://api.openai.com/v1/chat/completions",
            Provider::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
        }
    }

    /// Model used when no override is given.
    pub fn default_translation_model(self) -> &'static str {
        match self {
            Provider::Grok => "grok-3-mini",
            Provider::Openai => "gpt-4o-mini",
            Provider::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn key_var(self) -> &'static str {
        match self {
            Provider::Grok => "XAI_API_KEY",
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Endpoint for translation, with `model` replacing the default when set.
    pub fn endpoint(self, model: Option<&str>) -> Endpoint {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_translation_model());
        Endpoint {
            url: self.url(),
            model: model.to_string(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::Grok => "Grok",
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }

    /// API key from the provider's environment variable. Blank counts as missing.
    pub fn api_key(self) -> Result<String, ProviderError> {
        match std::env::var(self.key_var()) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ProviderError::MissingApiKey {
                provider_name: self.name(),
                env_var: self.key_var(),
            }),
        }
    }
}
