use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::ServiceResult;
use crate::prompt;

pub mod openai;

/// A hosted model plus the system prompt variant that goes with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backend {
    pub id: &'static str,
    pub system_template: &'static str,
    pub temperature: Option<f32>,
}

pub const GPT35: Backend = Backend {
    id: "gpt-3.5-turbo-1106",
    system_template: prompt::SYSTEM_GPT35,
    temperature: Some(0.5),
};

pub const GPT4: Backend = Backend {
    id: "gpt-4-1106-preview",
    system_template: prompt::SYSTEM_GPT4,
    temperature: Some(0.5),
};

/// Used for plain Python function generation; provider-default temperature.
pub const PYTHON: Backend = Backend {
    id: "gpt-3.5-turbo-1106",
    system_template: prompt::PYTHON_SYSTEM,
    temperature: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    Default,
    Gpt35,
    Gpt4,
}

impl ModelChoice {
    /// Unknown or missing selectors fall back to the default backend.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            Some("GPT-3.5") => ModelChoice::Gpt35,
            Some("GPT-4") => ModelChoice::Gpt4,
            _ => ModelChoice::Default,
        }
    }

    pub fn backend(self) -> Backend {
        match self {
            ModelChoice::Gpt4 => GPT4,
            ModelChoice::Gpt35 | ModelChoice::Default => GPT35,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the trimmed text of the primary choice.
    async fn generate(&self, system: &str, user: &str, backend: &Backend) -> ServiceResult<String>;
}

pub type DynProvider = Arc<dyn Provider>;

pub fn make_provider(cfg: &Config) -> ServiceResult<DynProvider> {
    let inner = openai::OpenAIProvider::new(
        cfg.api_base.clone(),
        cfg.api_key.clone(),
        Duration::from_secs(cfg.timeout_secs),
    )?;
    match &cfg.replies_dir {
        Some(dir) => Ok(Arc::new(crate::log::Journaled::new(inner, dir.clone()))),
        None => Ok(Arc::new(inner)),
    }
}
